//! Application State
//!
//! Everything the CLI commands share, built once from configuration

use crate::cache::{CachedStatusAggregator, StatusCache};
use crate::clients::{
    BlockStorageClient, ComputeClient, NetworkClient, OpenStackClient, OvsClient, StorageClient,
    VxSdsClient,
};
use crate::config::CeeConfig;
use crate::health::HealthChecker;
use crate::monitor::{HealthMonitor, StatusAggregator};
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use cee_common::Result;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CeeConfig>,
    pub status: Arc<CachedStatusAggregator>,
    pub aggregator: Arc<StatusAggregator>,
    pub health_checker: Arc<HealthChecker>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Connect the real OpenStack, VxSDS and OVS adapters. Volumes are
    /// provisioned through Cinder on top of VxSDS.
    pub fn from_config(config: CeeConfig) -> Result<Self> {
        let o = &config.orchestrator;
        let openstack = Arc::new(OpenStackClient::new(
            config.openstack.clone(),
            o.control_call_timeout(),
        )?);
        let vxsds = Arc::new(VxSdsClient::new(config.vxsds.clone(), o.storage_call_timeout())?);
        let storage = Arc::new(BlockStorageClient::new(openstack.clone(), vxsds));
        let compute = openstack;
        let network = Arc::new(OvsClient::new(config.ovs.clone()));

        info!(
            keystone = %config.openstack.auth_url,
            gateway = %config.vxsds.gateway_url,
            "Capability clients configured"
        );

        Self::with_clients(config, compute, storage, network)
    }

    pub fn with_clients(
        config: CeeConfig,
        compute: Arc<dyn ComputeClient>,
        storage: Arc<dyn StorageClient>,
        network: Arc<dyn NetworkClient>,
    ) -> Result<Self> {
        let o = &config.orchestrator;
        let cache = Arc::new(StatusCache::new(config.cache.ttl()));
        let status = Arc::new(
            CachedStatusAggregator::new(cache, compute.clone(), storage.clone(), network.clone())
                .with_timeouts(o.control_call_timeout(), o.storage_call_timeout()),
        );

        let health_checker = Arc::new(HealthChecker::from_config(
            &config.health,
            compute.clone(),
            storage.clone(),
            network.clone(),
        )?);
        let aggregator = Arc::new(StatusAggregator::new(status.clone(), &config.health));
        let orchestrator = Arc::new(Orchestrator::new(
            compute,
            storage,
            network,
            OrchestratorSettings::from(&config),
        ));

        Ok(Self {
            config: Arc::new(config),
            status,
            aggregator,
            health_checker,
            orchestrator,
        })
    }

    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(self.health_checker.clone(), self.config.health.interval())
    }
}
