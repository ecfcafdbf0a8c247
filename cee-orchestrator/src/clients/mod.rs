///! Capability clients
///!
///! One trait per plane. The orchestrator, the status cache and the health
///! checker only ever see these traits; the concrete adapters below speak
///! REST (OpenStack, VxSDS) or drive `ovs-vsctl`.

pub mod block;
pub mod openstack;
pub mod ovs;
pub mod vxsds;

use async_trait::async_trait;
use cee_common::{DatapathType, Error, RateLimits, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub use block::BlockStorageClient;
pub use openstack::OpenStackClient;
pub use ovs::OvsClient;
pub use vxsds::VxSdsClient;

/// Compute-plane resource kinds that carry a status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Server,
    Volume,
    Network,
    Project,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Volume => write!(f, "volume"),
            Self::Network => write!(f, "network"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// Compute and network control plane (OpenStack)
#[async_trait]
pub trait ComputeClient: Send + Sync {
    async fn create_project(&self, name: &str, description: &str) -> Result<String>;

    async fn create_user(&self, name: &str, password: &str, project_id: &str) -> Result<String>;

    async fn assign_role(&self, user_id: &str, project_id: &str, role: &str) -> Result<()>;

    /// Quota keys are resource names, e.g. `gigabytes`
    async fn set_quota(&self, project_id: &str, quotas: &HashMap<String, u64>) -> Result<()>;

    async fn create_network(&self, project_id: &str, name: &str, cidr: &str) -> Result<String>;

    async fn create_subnet(&self, project_id: &str, network_id: &str, cidr: &str) -> Result<String>;

    async fn create_router(&self, project_id: &str, name: &str) -> Result<String>;

    async fn add_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()>;

    /// Creates the group and then each of its ingress rules
    async fn create_security_group(
        &self,
        project_id: &str,
        group: &SecurityGroupSpec,
    ) -> Result<String>;

    /// Boots from `volume_id` when given, in which case the image is
    /// expected to be on the volume already
    async fn create_vm(
        &self,
        name: &str,
        image: &str,
        flavor: &str,
        volume_id: Option<&str>,
    ) -> Result<String>;

    /// Lowercase status string, e.g. `active`, `build`, `error`
    async fn get_resource_status(&self, resource: ResourceType, id: &str) -> Result<String>;

    async fn get_cluster_status(&self) -> Result<serde_json::Value>;

    async fn list_projects(&self) -> Result<Vec<String>>;
}

/// Software-defined storage plane (VxSDS)
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// `image` seeds a bootable volume
    async fn create_volume(
        &self,
        name: &str,
        size_gb: u64,
        volume_type: &str,
        image: Option<&str>,
    ) -> Result<String>;

    async fn delete_volume(&self, volume_id: &str) -> Result<()>;

    async fn attach_volume(&self, volume_id: &str, node_id: &str) -> Result<()>;

    async fn get_volume_status(&self, volume_id: &str) -> Result<String>;

    /// Shape of [`StorageSummary`]
    async fn get_storage_summary(&self) -> Result<serde_json::Value>;

    async fn get_system_info(&self) -> Result<serde_json::Value>;
}

/// Virtual switching plane (Open vSwitch)
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn create_bridge(
        &self,
        name: &str,
        physical_iface: Option<&str>,
        datapath_type: DatapathType,
    ) -> Result<()>;

    async fn create_vxlan_tunnel(&self, bridge: &str, local_ip: &str, remote_ip: &str) -> Result<()>;

    async fn set_qos(&self, port: &str, limits: &RateLimits) -> Result<()>;

    async fn get_topology(&self) -> Result<serde_json::Value>;

    async fn get_bridge_status(&self, name: &str) -> Result<bool>;
}

/// One ingress rule of a security group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngressRule {
    pub protocol: String,
    pub port_min: u16,
    pub port_max: u16,
    pub remote_ip_prefix: String,
}

impl IngressRule {
    pub fn tcp(port: u16, remote_ip_prefix: &str) -> Self {
        Self {
            protocol: "tcp".to_string(),
            port_min: port,
            port_max: port,
            remote_ip_prefix: remote_ip_prefix.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub description: String,
    pub rules: Vec<IngressRule>,
}

impl SecurityGroupSpec {
    /// HTTP and HTTPS from anywhere
    pub fn web() -> Self {
        Self {
            name: "web-sg".to_string(),
            description: "Security group for web servers".to_string(),
            rules: vec![IngressRule::tcp(80, "0.0.0.0/0"), IngressRule::tcp(443, "0.0.0.0/0")],
        }
    }

    /// SSH from internal networks only
    pub fn ssh() -> Self {
        Self {
            name: "ssh-sg".to_string(),
            description: "Security group for SSH access".to_string(),
            rules: vec![IngressRule::tcp(22, "10.0.0.0/8")],
        }
    }
}

/// Aggregate capacity of the storage plane
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageCapacity {
    pub total_gb: u64,
    pub free_gb: u64,
    pub used_gb: u64,
}

impl StorageCapacity {
    /// None when the plane reports no capacity at all
    pub fn free_percent(&self) -> Option<f64> {
        if self.total_gb == 0 {
            None
        } else {
            Some(self.free_gb as f64 / self.total_gb as f64 * 100.0)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolSummary {
    pub capacity_gb: u64,
    pub free_capacity_gb: u64,
    pub num_volumes: u64,
    pub media_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VolumeStats {
    pub total_count: u64,
    pub total_size_gb: u64,
    pub mapped_count: u64,
}

/// SDC (client) and SDS (server) node counts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeStats {
    pub sdc_count: u64,
    pub sds_count: u64,
    pub sdc_online: u64,
    pub sds_online: u64,
}

/// Typed view of `StorageClient::get_storage_summary`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSummary {
    pub capacity: StorageCapacity,
    pub storage_pools: BTreeMap<String, PoolSummary>,
    pub volumes: VolumeStats,
    pub nodes: NodeStats,
}

impl StorageSummary {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::Backend(format!("Malformed storage summary: {}", e)))
    }
}

/// Map a non-success HTTP response onto the error taxonomy
pub fn classify_http(status: u16, body: &str) -> Error {
    let detail = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, truncate(body, 512))
    };
    let mentions_quota = {
        let lower = body.to_lowercase();
        lower.contains("quota") || lower.contains("limit exceeded")
    };

    match status {
        409 => Error::ResourceConflict(detail),
        401 => Error::AuthenticationFailure(detail),
        403 | 413 if mentions_quota => Error::QuotaExceeded(detail),
        403 => Error::AuthenticationFailure(detail),
        404 => Error::NotFound(detail),
        408 | 429 | 500..=599 => Error::TransientUnavailable(detail),
        _ => Error::Backend(detail),
    }
}

/// Map a transport-level failure onto the error taxonomy
pub fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        Error::TransientUnavailable(err.to_string())
    } else if err.is_decode() {
        Error::Backend(format!("Undecodable response: {}", err))
    } else {
        Error::Backend(err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cee_common::ErrorKind;

    #[test]
    fn test_http_status_classification() {
        assert_eq!(classify_http(409, "Conflict").kind(), ErrorKind::ResourceConflict);
        assert_eq!(classify_http(401, "").kind(), ErrorKind::AuthenticationFailure);
        assert_eq!(
            classify_http(413, "Quota exceeded for resources: ['gigabytes']").kind(),
            ErrorKind::QuotaExceeded
        );
        assert_eq!(classify_http(403, "Policy forbids").kind(), ErrorKind::AuthenticationFailure);
        assert_eq!(classify_http(404, "").kind(), ErrorKind::NotFound);
        assert_eq!(classify_http(503, "").kind(), ErrorKind::TransientUnavailable);
        assert_eq!(classify_http(400, "bad request").kind(), ErrorKind::Backend);
    }

    #[test]
    fn test_storage_summary_tolerates_missing_sections() {
        let value = serde_json::json!({
            "capacity": {"total_gb": 1000, "free_gb": 150, "used_gb": 850},
            "nodes": {"sds_count": 3, "sds_online": 3}
        });

        let summary = StorageSummary::from_value(&value).unwrap();
        assert_eq!(summary.capacity.free_percent(), Some(15.0));
        assert_eq!(summary.nodes.sdc_count, 0);
        assert!(summary.storage_pools.is_empty());
    }

    #[test]
    fn test_default_security_groups() {
        let web = SecurityGroupSpec::web();
        let ports: Vec<u16> = web.rules.iter().map(|r| r.port_min).collect();
        assert_eq!(ports, vec![80, 443]);

        let ssh = SecurityGroupSpec::ssh();
        assert_eq!(ssh.rules, vec![IngressRule::tcp(22, "10.0.0.0/8")]);
    }

    #[test]
    fn test_empty_capacity_has_no_percentage() {
        assert_eq!(StorageCapacity::default().free_percent(), None);
    }
}
