//! Common test utilities and helpers
//!
//! In-memory capability clients with scriptable failures, delays and call
//! counters, plus request builders shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use cee_common::{
    DatapathType, Error, NetworkSetupRequest, PortQos, RateLimits, Result,
    TenantEnvironmentRequest, VmWithStorageRequest,
};
use cee_orchestrator::clients::{
    ComputeClient, NetworkClient, ResourceType, SecurityGroupSpec, StorageClient,
};
use cee_orchestrator::orchestrator::{CancelToken, Orchestrator, OrchestratorSettings};
use cee_orchestrator::retry::RetryPolicy;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Per-method call counting, delays and injected failures
#[derive(Default)]
pub struct Behavior {
    calls: Mutex<HashMap<&'static str, usize>>,
    fail_once: Mutex<HashMap<&'static str, VecDeque<Error>>>,
    fail_always: Mutex<HashMap<&'static str, fn() -> Error>>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    cancel_on: Mutex<HashMap<&'static str, CancelToken>>,
}

impl Behavior {
    /// Called at the top of every fake method
    async fn enter(&self, method: &'static str) -> Result<()> {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;

        if let Some(token) = self.cancel_on.lock().unwrap().get(method) {
            token.cancel();
        }

        let delay = self.delays.lock().unwrap().get(method).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(make_error) = self.fail_always.lock().unwrap().get(method) {
            return Err(make_error());
        }
        if let Some(err) = self
            .fail_once
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        Ok(())
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    /// Queue an error for the next call of `method`
    pub fn fail_once(&self, method: &'static str, err: Error) {
        self.fail_once
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push_back(err);
    }

    pub fn fail_always(&self, method: &'static str, make_error: fn() -> Error) {
        self.fail_always.lock().unwrap().insert(method, make_error);
    }

    pub fn delay(&self, method: &'static str, delay: Duration) {
        self.delays.lock().unwrap().insert(method, delay);
    }

    /// Trip `token` as soon as `method` is called
    pub fn cancel_on(&self, method: &'static str, token: CancelToken) {
        self.cancel_on.lock().unwrap().insert(method, token);
    }
}

/// Pops scripted statuses, repeating the last one forever
fn next_status(script: &Mutex<VecDeque<String>>, default: &str) -> String {
    let mut script = script.lock().unwrap();
    if script.len() > 1 {
        script.pop_front().unwrap()
    } else {
        script.front().cloned().unwrap_or_else(|| default.to_string())
    }
}

#[derive(Default)]
pub struct FakeCompute {
    pub behavior: Behavior,
    projects: Mutex<HashSet<String>>,
    quotas: Mutex<HashMap<String, HashMap<String, u64>>>,
    router_interfaces: Mutex<Vec<(String, String)>>,
    security_groups: Mutex<Vec<(String, SecurityGroupSpec)>>,
    server_volumes: Mutex<Vec<Option<String>>>,
    server_statuses: Mutex<VecDeque<String>>,
    cluster: Mutex<Option<Value>>,
    next_id: AtomicUsize,
}

impl FakeCompute {
    fn id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn script_server_statuses(&self, statuses: &[&str]) {
        *self.server_statuses.lock().unwrap() = statuses.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_cluster_status(&self, value: Value) {
        *self.cluster.lock().unwrap() = Some(value);
    }

    pub fn quota_for(&self, project_id: &str) -> Option<HashMap<String, u64>> {
        self.quotas.lock().unwrap().get(project_id).cloned()
    }

    pub fn has_project(&self, name: &str) -> bool {
        self.projects.lock().unwrap().contains(name)
    }

    /// (router id, subnet id) pairs
    pub fn router_interfaces(&self) -> Vec<(String, String)> {
        self.router_interfaces.lock().unwrap().clone()
    }

    /// (project id, group) pairs
    pub fn security_groups(&self) -> Vec<(String, SecurityGroupSpec)> {
        self.security_groups.lock().unwrap().clone()
    }

    /// Boot volume of each server created, in order
    pub fn server_volumes(&self) -> Vec<Option<String>> {
        self.server_volumes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeClient for FakeCompute {
    async fn create_project(&self, name: &str, _description: &str) -> Result<String> {
        self.behavior.enter("create_project").await?;
        if !self.projects.lock().unwrap().insert(name.to_string()) {
            return Err(Error::ResourceConflict(format!("Project {} already exists", name)));
        }
        Ok(self.id("project"))
    }

    async fn create_user(&self, _name: &str, _password: &str, _project_id: &str) -> Result<String> {
        self.behavior.enter("create_user").await?;
        Ok(self.id("user"))
    }

    async fn assign_role(&self, _user_id: &str, _project_id: &str, _role: &str) -> Result<()> {
        self.behavior.enter("assign_role").await
    }

    async fn set_quota(&self, project_id: &str, quotas: &HashMap<String, u64>) -> Result<()> {
        self.behavior.enter("set_quota").await?;
        self.quotas
            .lock()
            .unwrap()
            .insert(project_id.to_string(), quotas.clone());
        Ok(())
    }

    async fn create_network(&self, _project_id: &str, _name: &str, _cidr: &str) -> Result<String> {
        self.behavior.enter("create_network").await?;
        Ok(self.id("network"))
    }

    async fn create_subnet(&self, _project_id: &str, _network_id: &str, _cidr: &str) -> Result<String> {
        self.behavior.enter("create_subnet").await?;
        Ok(self.id("subnet"))
    }

    async fn create_router(&self, _project_id: &str, _name: &str) -> Result<String> {
        self.behavior.enter("create_router").await?;
        Ok(self.id("router"))
    }

    async fn add_router_interface(&self, router_id: &str, subnet_id: &str) -> Result<()> {
        self.behavior.enter("add_router_interface").await?;
        self.router_interfaces
            .lock()
            .unwrap()
            .push((router_id.to_string(), subnet_id.to_string()));
        Ok(())
    }

    async fn create_security_group(
        &self,
        project_id: &str,
        group: &SecurityGroupSpec,
    ) -> Result<String> {
        self.behavior.enter("create_security_group").await?;
        self.security_groups
            .lock()
            .unwrap()
            .push((project_id.to_string(), group.clone()));
        Ok(self.id("secgroup"))
    }

    async fn create_vm(
        &self,
        _name: &str,
        _image: &str,
        _flavor: &str,
        volume_id: Option<&str>,
    ) -> Result<String> {
        self.behavior.enter("create_vm").await?;
        self.server_volumes
            .lock()
            .unwrap()
            .push(volume_id.map(str::to_string));
        Ok(self.id("server"))
    }

    async fn get_resource_status(&self, _resource: ResourceType, _id: &str) -> Result<String> {
        self.behavior.enter("get_resource_status").await?;
        Ok(next_status(&self.server_statuses, "active"))
    }

    async fn get_cluster_status(&self) -> Result<Value> {
        self.behavior.enter("get_cluster_status").await?;
        Ok(self.cluster.lock().unwrap().clone().unwrap_or_else(healthy_cluster_status))
    }

    async fn list_projects(&self) -> Result<Vec<String>> {
        self.behavior.enter("list_projects").await?;
        Ok(self.projects.lock().unwrap().iter().cloned().collect())
    }
}

#[derive(Default)]
pub struct FakeStorage {
    pub behavior: Behavior,
    volumes: Mutex<HashSet<String>>,
    volume_images: Mutex<HashMap<String, Option<String>>>,
    volume_statuses: Mutex<VecDeque<String>>,
    summary: Mutex<Option<Value>>,
    next_id: AtomicUsize,
}

impl FakeStorage {
    pub fn script_volume_statuses(&self, statuses: &[&str]) {
        *self.volume_statuses.lock().unwrap() = statuses.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_summary(&self, value: Value) {
        *self.summary.lock().unwrap() = Some(value);
    }

    pub fn volume_exists(&self, id: &str) -> bool {
        self.volumes.lock().unwrap().contains(id)
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.lock().unwrap().len()
    }

    /// Image a volume was written from
    pub fn image_of(&self, id: &str) -> Option<String> {
        self.volume_images.lock().unwrap().get(id).cloned().flatten()
    }
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn create_volume(
        &self,
        _name: &str,
        _size_gb: u64,
        _volume_type: &str,
        image: Option<&str>,
    ) -> Result<String> {
        self.behavior.enter("create_volume").await?;
        let id = format!("vol-{:04x}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.volumes.lock().unwrap().insert(id.clone());
        self.volume_images
            .lock()
            .unwrap()
            .insert(id.clone(), image.map(str::to_string));
        Ok(id)
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.behavior.enter("delete_volume").await?;
        if !self.volumes.lock().unwrap().remove(volume_id) {
            return Err(Error::NotFound(format!("Volume {}", volume_id)));
        }
        Ok(())
    }

    async fn attach_volume(&self, _volume_id: &str, _node_id: &str) -> Result<()> {
        self.behavior.enter("attach_volume").await
    }

    async fn get_volume_status(&self, _volume_id: &str) -> Result<String> {
        self.behavior.enter("get_volume_status").await?;
        Ok(next_status(&self.volume_statuses, "available"))
    }

    async fn get_storage_summary(&self) -> Result<Value> {
        self.behavior.enter("get_storage_summary").await?;
        Ok(self.summary.lock().unwrap().clone().unwrap_or_else(|| storage_summary(1000, 500)))
    }

    async fn get_system_info(&self) -> Result<Value> {
        self.behavior.enter("get_system_info").await?;
        Ok(json!({ "id": "sys-1", "systemVersionName": "VxSDS 3.6" }))
    }
}

#[derive(Default)]
pub struct FakeNetwork {
    pub behavior: Behavior,
    bridges: Mutex<BTreeSet<String>>,
    rejected_bridges: Mutex<HashSet<String>>,
    tunnels: Mutex<Vec<(String, String, String)>>,
    qos: Mutex<HashMap<String, RateLimits>>,
}

impl FakeNetwork {
    pub fn with_bridges(bridges: &[&str]) -> Self {
        let network = Self::default();
        network
            .bridges
            .lock()
            .unwrap()
            .extend(bridges.iter().map(|b| b.to_string()));
        network
    }

    /// (bridge, local, remote) per tunnel port
    pub fn tunnels(&self) -> Vec<(String, String, String)> {
        self.tunnels.lock().unwrap().clone()
    }

    /// `create_bridge` fails for this name
    pub fn reject_bridge(&self, name: &str) {
        self.rejected_bridges.lock().unwrap().insert(name.to_string());
    }

    pub fn has_bridge(&self, name: &str) -> bool {
        self.bridges.lock().unwrap().contains(name)
    }

    pub fn qos_for(&self, port: &str) -> Option<RateLimits> {
        self.qos.lock().unwrap().get(port).copied()
    }
}

#[async_trait]
impl NetworkClient for FakeNetwork {
    async fn create_bridge(
        &self,
        name: &str,
        _physical_iface: Option<&str>,
        _datapath_type: DatapathType,
    ) -> Result<()> {
        self.behavior.enter("create_bridge").await?;
        if self.rejected_bridges.lock().unwrap().contains(name) {
            return Err(Error::Backend(format!("ovs-vsctl: cannot create bridge {}", name)));
        }
        self.bridges.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn create_vxlan_tunnel(&self, bridge: &str, local_ip: &str, remote_ip: &str) -> Result<()> {
        self.behavior.enter("create_vxlan_tunnel").await?;
        if !self.has_bridge(bridge) {
            return Err(Error::NotFound(format!("ovs-vsctl: no bridge named {}", bridge)));
        }
        self.tunnels
            .lock()
            .unwrap()
            .push((bridge.to_string(), local_ip.to_string(), remote_ip.to_string()));
        Ok(())
    }

    async fn set_qos(&self, port: &str, limits: &RateLimits) -> Result<()> {
        self.behavior.enter("set_qos").await?;
        self.qos.lock().unwrap().insert(port.to_string(), *limits);
        Ok(())
    }

    async fn get_topology(&self) -> Result<Value> {
        self.behavior.enter("get_topology").await?;
        let bridges: serde_json::Map<String, Value> = self
            .bridges
            .lock()
            .unwrap()
            .iter()
            .map(|b| (b.clone(), json!({ "ports": [] })))
            .collect();
        Ok(json!({ "bridges": bridges, "ovs_version": "2.17.9" }))
    }

    async fn get_bridge_status(&self, name: &str) -> Result<bool> {
        self.behavior.enter("get_bridge_status").await?;
        Ok(self.bridges.lock().unwrap().contains(name))
    }
}

/// One fake per plane, shared with whatever is under test
pub struct Fakes {
    pub compute: Arc<FakeCompute>,
    pub storage: Arc<FakeStorage>,
    pub network: Arc<FakeNetwork>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            compute: Arc::new(FakeCompute::default()),
            storage: Arc::new(FakeStorage::default()),
            network: Arc::new(FakeNetwork::with_bridges(&["br-int", "br-tun"])),
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(fast_settings())
    }

    pub fn orchestrator_with(&self, settings: OrchestratorSettings) -> Orchestrator {
        Orchestrator::new(
            self.compute.clone(),
            self.storage.clone(),
            self.network.clone(),
            settings,
        )
    }
}

/// Short delays so paused-clock tests stay readable
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        control_call_timeout: Duration::from_secs(5),
        storage_call_timeout: Duration::from_secs(10),
        transient_retry: RetryPolicy::with_max_attempts(3, Duration::from_millis(10)).without_jitter(),
        poll: RetryPolicy::polling(
            Duration::from_millis(100),
            Duration::from_secs(1),
            Duration::from_secs(10),
        ),
        member_role: "member".to_string(),
        tunnel_bridge: "br-tun".to_string(),
    }
}

pub fn healthy_cluster_status() -> Value {
    json!({
        "compute": {
            "compute_services": 3,
            "services_down": 0,
            "total_hypervisors": 3,
            "total_instances": 12
        },
        "network": {
            "network_agents": 6,
            "agents_dead": 0,
            "ovs_agents": 3,
            "total_networks": 4,
            "total_subnets": 4
        }
    })
}

pub fn storage_summary(total_gb: u64, free_gb: u64) -> Value {
    json!({
        "capacity": { "total_gb": total_gb, "free_gb": free_gb, "used_gb": total_gb - free_gb },
        "storage_pools": {
            "pool1": { "capacity_gb": total_gb, "free_capacity_gb": free_gb, "num_volumes": 4, "media_type": "SSD" }
        },
        "volumes": { "total_count": 4, "total_size_gb": 400, "mapped_count": 3 },
        "nodes": { "sdc_count": 3, "sds_count": 3, "sdc_online": 3, "sds_online": 3 }
    })
}

pub fn tenant_request(name: &str) -> TenantEnvironmentRequest {
    TenantEnvironmentRequest {
        tenant_name: name.to_string(),
        description: "Integration test tenant".to_string(),
        admin_user: "tenant-admin".to_string(),
        admin_password: "S3curePassw0rd".to_string(),
        network_cidr: "192.168.100.0/24".to_string(),
        storage_quota_gb: 500,
        create_router: true,
        security_groups: true,
    }
}

pub fn vm_request(name: &str) -> VmWithStorageRequest {
    VmWithStorageRequest {
        name: name.to_string(),
        image: "ubuntu-22.04".to_string(),
        flavor: "m1.medium".to_string(),
        volume_size_gb: 40,
        volume_type: "vxsds_thin_SSD".to_string(),
        attach_node: None,
        qos: None,
    }
}

pub fn network_request(remote_ips: &[&str]) -> NetworkSetupRequest {
    NetworkSetupRequest {
        bridge_name: "br-ex".to_string(),
        physical_iface: Some("eth1".to_string()),
        datapath_type: DatapathType::System,
        local_ip: "10.0.0.1".to_string(),
        remote_ips: remote_ips.iter().map(|s| s.to_string()).collect(),
        qos: vec![PortQos {
            port: "tap-web01".to_string(),
            limits: RateLimits {
                max_kbps: 100_000,
                burst_kbps: None,
            },
        }],
    }
}
