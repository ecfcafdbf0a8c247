//! Switching plane setup workflow

use super::workflow::{StepSpec, WorkflowRun};
use super::{CancelToken, Orchestrator};
use crate::validation::validate_network_request;
use cee_common::{Error, NetworkSetupRequest, Plane, ProvisioningResult, Result};
use tracing::info;

pub mod steps {
    pub const WORKFLOW: &str = "network_setup";
    pub const CREATE_BRIDGE: &str = "create-bridge";
    pub const CREATE_TUNNEL_BRIDGE: &str = "create-tunnel-bridge";
    pub const VERIFY_BRIDGE: &str = "verify-bridge";

    pub fn create_tunnel(remote_ip: &str) -> String {
        format!("create-vxlan-tunnel:{}", remote_ip)
    }

    pub fn configure_qos(port: &str) -> String {
        format!("configure-qos:{}", port)
    }
}

use steps::*;

impl Orchestrator {
    /// bridge → tunnel bridge → one tunnel per peer → verify → per-port
    /// QoS (optional).
    ///
    /// Tunnel ports live on the configured tunnel bridge, so they depend on
    /// that bridge and not on the requested one. One failed peer leaves the
    /// others in place.
    pub async fn setup_network(&self, request: &NetworkSetupRequest) -> Result<ProvisioningResult> {
        self.setup_network_with_cancel(request, &CancelToken::new()).await
    }

    pub async fn setup_network_with_cancel(
        &self,
        request: &NetworkSetupRequest,
        cancel: &CancelToken,
    ) -> Result<ProvisioningResult> {
        validate_network_request(request)?;

        info!(
            bridge = %request.bridge_name,
            peers = request.remote_ips.len(),
            "Setting up switching plane"
        );

        let mut run = WorkflowRun::start(WORKFLOW, &self.settings, cancel);
        let timeout = self.settings.control_call_timeout;
        let network = &self.network;
        let bridge = request.bridge_name.as_str();

        run.execute(StepSpec::required(CREATE_BRIDGE, Plane::Network), timeout, move || async move {
            network
                .create_bridge(bridge, request.physical_iface.as_deref(), request.datapath_type)
                .await
                .map(|()| bridge.to_string())
        })
        .await;

        let tunnel_bridge = self.settings.tunnel_bridge.as_str();
        let tunnels_after = if tunnel_bridge == bridge || request.remote_ips.is_empty() {
            CREATE_BRIDGE
        } else {
            run.execute(
                StepSpec::required(CREATE_TUNNEL_BRIDGE, Plane::Network),
                timeout,
                move || async move {
                    network
                        .create_bridge(tunnel_bridge, None, request.datapath_type)
                        .await
                        .map(|()| tunnel_bridge.to_string())
                },
            )
            .await;
            CREATE_TUNNEL_BRIDGE
        };

        for remote_ip in &request.remote_ips {
            run.execute(
                StepSpec::required(create_tunnel(remote_ip), Plane::Network).after(&[tunnels_after]),
                timeout,
                || network.create_vxlan_tunnel(tunnel_bridge, &request.local_ip, remote_ip),
            )
            .await;
        }

        run.execute(
            StepSpec::required(VERIFY_BRIDGE, Plane::Network).after(&[CREATE_BRIDGE]),
            timeout,
            move || async move {
                if network.get_bridge_status(bridge).await? {
                    Ok(bridge.to_string())
                } else {
                    Err(Error::DependencyNotReady(format!("Bridge {} not present", bridge)))
                }
            },
        )
        .await;

        for qos in &request.qos {
            run.execute(
                StepSpec::optional(configure_qos(&qos.port), Plane::Network).after(&[CREATE_BRIDGE]),
                timeout,
                || network.set_qos(&qos.port, &qos.limits),
            )
            .await;
        }

        Ok(run.finish())
    }
}
