//! Provisioning orchestrator
//!
//! Sequences multi-step workflows across the compute, storage and network
//! planes. Input is validated before any remote call; after that the caller
//! always gets a `ProvisioningResult`, whatever happened on the way.

mod network;
mod tenant;
mod vm;
pub mod workflow;

use crate::clients::{ComputeClient, NetworkClient, StorageClient};
use crate::config::CeeConfig;
use crate::retry::RetryPolicy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use network::steps as network_steps;
pub use tenant::steps as tenant_steps;
pub use vm::steps as vm_steps;

/// Execution parameters shared by every workflow
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub control_call_timeout: Duration,
    pub storage_call_timeout: Duration,
    /// Applied to every step; only transient errors are retried
    pub transient_retry: RetryPolicy,
    /// Waiting for volumes and servers to become ready
    pub poll: RetryPolicy,
    /// Role granted to a tenant's admin user
    pub member_role: String,
    /// Bridge that carries VXLAN tunnel ports
    pub tunnel_bridge: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            control_call_timeout: Duration::from_secs(30),
            storage_call_timeout: Duration::from_secs(60),
            transient_retry: RetryPolicy::with_max_attempts(3, Duration::from_millis(500)),
            poll: RetryPolicy::polling(
                Duration::from_secs(2),
                Duration::from_secs(30),
                Duration::from_secs(300),
            ),
            member_role: "member".to_string(),
            tunnel_bridge: "br-tun".to_string(),
        }
    }
}

impl From<&CeeConfig> for OrchestratorSettings {
    fn from(config: &CeeConfig) -> Self {
        let o = &config.orchestrator;
        Self {
            control_call_timeout: o.control_call_timeout(),
            storage_call_timeout: o.storage_call_timeout(),
            transient_retry: RetryPolicy::with_max_attempts(
                o.transient_retry_attempts,
                Duration::from_millis(o.transient_retry_delay_ms),
            ),
            poll: RetryPolicy::polling(
                Duration::from_secs(o.poll_base_delay_secs),
                Duration::from_secs(o.poll_max_delay_secs),
                Duration::from_secs(o.poll_budget_secs),
            ),
            member_role: config.openstack.member_role.clone(),
            tunnel_bridge: config.ovs.tunnel_bridge.clone(),
        }
    }
}

/// Cooperative cancellation, checked between steps
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Orchestrator {
    compute: Arc<dyn ComputeClient>,
    storage: Arc<dyn StorageClient>,
    network: Arc<dyn NetworkClient>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        compute: Arc<dyn ComputeClient>,
        storage: Arc<dyn StorageClient>,
        network: Arc<dyn NetworkClient>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            compute,
            storage,
            network,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }
}
