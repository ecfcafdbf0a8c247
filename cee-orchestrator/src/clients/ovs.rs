///! Open vSwitch adapter
///!
///! Drives `ovs-vsctl` on the local node. CEE runs OVS on the kernel
///! datapath, so bridges are always created with `datapath_type=system`
///! unless told otherwise.

use super::NetworkClient;
use crate::config::OvsConfig;
use async_trait::async_trait;
use cee_common::{DatapathType, Error, RateLimits, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tokio::process::Command;
use tracing::{debug, info};

/// Role of a bridge in a Neutron OVS deployment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BridgeRole {
    Integration,  // br-int
    Tunnel,       // br-tun
    Provider,     // br-ex, br-provider*
    Unknown,
}

impl BridgeRole {
    pub fn of(bridge_name: &str) -> Self {
        match bridge_name {
            "br-int" => Self::Integration,
            "br-tun" => Self::Tunnel,
            name if name.starts_with("br-ex") || name.starts_with("br-provider") => Self::Provider,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeTopology {
    pub datapath_type: String,
    pub ports: Vec<String>,
    pub role: BridgeRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TunnelTopology {
    pub bridge: String,
    pub kind: String,
    pub remote_ip: Option<String>,
}

/// Parsed `ovs-vsctl show`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SwitchTopology {
    pub bridges: BTreeMap<String, BridgeTopology>,
    pub tunnels: BTreeMap<String, TunnelTopology>,
    pub ovs_version: Option<String>,
}

impl SwitchTopology {
    pub fn parse(output: &str) -> Self {
        let mut topology = SwitchTopology::default();
        let mut bridge: Option<String> = None;
        let mut port: Option<String> = None;

        for line in output.lines().map(str::trim) {
            if let Some(name) = line.strip_prefix("Bridge ") {
                let name = unquote(name);
                topology.bridges.insert(
                    name.clone(),
                    BridgeTopology {
                        // Not printed for the default datapath
                        datapath_type: DatapathType::System.to_string(),
                        ports: Vec::new(),
                        role: BridgeRole::of(&name),
                    },
                );
                bridge = Some(name);
                port = None;
            } else if let Some(name) = line.strip_prefix("Port ") {
                let name = unquote(name);
                if let Some(b) = bridge.as_ref().and_then(|b| topology.bridges.get_mut(b)) {
                    b.ports.push(name.clone());
                }
                port = Some(name);
            } else if let Some(dp) = line.strip_prefix("datapath_type: ") {
                if let Some(b) = bridge.as_ref().and_then(|b| topology.bridges.get_mut(b)) {
                    b.datapath_type = unquote(dp);
                }
            } else if let Some(kind) = line.strip_prefix("type: ") {
                let kind = unquote(kind);
                if matches!(kind.as_str(), "vxlan" | "gre" | "geneve") {
                    if let (Some(b), Some(p)) = (&bridge, &port) {
                        topology.tunnels.insert(
                            p.clone(),
                            TunnelTopology {
                                bridge: b.clone(),
                                kind,
                                remote_ip: None,
                            },
                        );
                    }
                }
            } else if let Some(options) = line.strip_prefix("options: ") {
                if let Some(tunnel) = port.as_ref().and_then(|p| topology.tunnels.get_mut(p)) {
                    tunnel.remote_ip = option_value(options, "remote_ip");
                }
            } else if let Some(version) = line.strip_prefix("ovs_version: ") {
                topology.ovs_version = Some(unquote(version));
            }
        }

        topology
    }
}

fn unquote(s: &str) -> String {
    s.trim().trim_matches('"').to_string()
}

/// Extract `key` from `{key=flow, local_ip="10.0.0.1", remote_ip="10.0.0.2"}`
fn option_value(options: &str, key: &str) -> Option<String> {
    options
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| unquote(v))
}

/// Neutron-style tunnel port name, e.g. `vxlan-0a000002`
pub fn tunnel_port_name(remote_ip: &str) -> Result<String> {
    let addr: Ipv4Addr = remote_ip
        .parse()
        .map_err(|_| Error::Validation(format!("Invalid tunnel remote '{}'", remote_ip)))?;
    Ok(format!("vxlan-{:08x}", u32::from(addr)))
}

/// Map `ovs-vsctl` stderr onto the error taxonomy
fn classify_stderr(stderr: &str) -> Error {
    let detail = stderr.trim().to_string();
    let lower = detail.to_lowercase();

    if lower.contains("already exists") {
        Error::ResourceConflict(detail)
    } else if lower.contains("database connection failed")
        || lower.contains("connection refused")
        || lower.contains("timed out")
    {
        Error::TransientUnavailable(detail)
    } else if lower.contains("no bridge named")
        || lower.contains("no port named")
        || lower.contains("no row")
    {
        Error::NotFound(detail)
    } else {
        Error::Backend(detail)
    }
}

pub struct OvsClient {
    config: OvsConfig,
}

impl OvsClient {
    pub fn new(config: OvsConfig) -> Self {
        Self { config }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!(args = ?args, "ovs-vsctl");
        Command::new(&self.config.vsctl_path)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Backend(format!("Failed to run {}: {}", self.config.vsctl_path, e)))
    }

    /// Run and require success, returning stdout
    async fn vsctl(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(classify_stderr(&String::from_utf8_lossy(&output.stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl NetworkClient for OvsClient {
    async fn create_bridge(
        &self,
        name: &str,
        physical_iface: Option<&str>,
        datapath_type: DatapathType,
    ) -> Result<()> {
        let datapath = format!("datapath_type={}", datapath_type);
        self.vsctl(&["--may-exist", "add-br", name, "--", "set", "bridge", name, &datapath])
            .await?;

        if let Some(iface) = physical_iface {
            self.vsctl(&["--may-exist", "add-port", name, iface]).await?;
        }

        info!(bridge = %name, datapath = %datapath_type, "OVS bridge ready");
        Ok(())
    }

    async fn create_vxlan_tunnel(&self, bridge: &str, local_ip: &str, remote_ip: &str) -> Result<()> {
        let port = tunnel_port_name(remote_ip)?;
        let local = format!("options:local_ip={}", local_ip);
        let remote = format!("options:remote_ip={}", remote_ip);

        self.vsctl(&[
            "--may-exist", "add-port", bridge, &port,
            "--", "set", "interface", &port, "type=vxlan",
            &local, &remote, "options:key=flow",
        ])
        .await?;

        info!(bridge = %bridge, port = %port, remote = %remote_ip, "VXLAN tunnel ready");
        Ok(())
    }

    async fn set_qos(&self, port: &str, limits: &RateLimits) -> Result<()> {
        let rate = format!("ingress_policing_rate={}", limits.max_kbps);
        let burst = format!("ingress_policing_burst={}", limits.burst());

        self.vsctl(&["set", "interface", port, &rate, &burst]).await?;
        Ok(())
    }

    async fn get_topology(&self) -> Result<serde_json::Value> {
        let output = self.vsctl(&["show"]).await?;
        serde_json::to_value(SwitchTopology::parse(&output))
            .map_err(|e| Error::Backend(e.to_string()))
    }

    async fn get_bridge_status(&self, name: &str) -> Result<bool> {
        let output = self.run(&["br-exists", name]).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(2) => Ok(false),
            _ => Err(classify_stderr(&String::from_utf8_lossy(&output.stderr))),
        }
    }
}
