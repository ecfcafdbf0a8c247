//! Health checks across the three planes
//!
//! Each registered probe runs in its own task under a timeout, so a probe
//! that fails, hangs or panics only ever produces a failed entry for itself.
//! Probes are read-only: they list, query or test existence, nothing else.

use crate::clients::{ComputeClient, NetworkClient, StorageClient, StorageSummary};
use crate::config::HealthConfig;
use crate::retry::{call_with_timeout, retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use cee_common::{CheckOutcome, Error, HealthCheckReport, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const COMPUTE_API: &str = "compute_api";
pub const STORAGE_GATEWAY: &str = "storage_gateway";
pub const OVS_BRIDGES: &str = "ovs_bridges";
pub const STORAGE_CAPACITY: &str = "storage_capacity";

/// A named, read-only check against one plane
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    /// Diagnostic detail on success
    async fn probe(&self) -> Result<String>;
}

/// Identity API reachability
pub struct ComputeApiProbe {
    compute: Arc<dyn ComputeClient>,
}

impl ComputeApiProbe {
    pub fn new(compute: Arc<dyn ComputeClient>) -> Self {
        Self { compute }
    }
}

#[async_trait]
impl HealthProbe for ComputeApiProbe {
    fn name(&self) -> &str {
        COMPUTE_API
    }

    async fn probe(&self) -> Result<String> {
        let projects = self.compute.list_projects().await?;
        Ok(format!("API reachable, {} project(s) visible", projects.len()))
    }
}

/// VxSDS gateway reachability
pub struct StorageGatewayProbe {
    storage: Arc<dyn StorageClient>,
}

impl StorageGatewayProbe {
    pub fn new(storage: Arc<dyn StorageClient>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl HealthProbe for StorageGatewayProbe {
    fn name(&self) -> &str {
        STORAGE_GATEWAY
    }

    async fn probe(&self) -> Result<String> {
        let system = self.storage.get_system_info().await?;
        match system["systemVersionName"].as_str() {
            Some(version) => Ok(format!("Gateway reachable ({})", version)),
            None => Ok("Gateway reachable".to_string()),
        }
    }
}

/// Required OVS bridges exist
pub struct OvsBridgeProbe {
    network: Arc<dyn NetworkClient>,
    required_bridges: Vec<String>,
}

impl OvsBridgeProbe {
    pub fn new(network: Arc<dyn NetworkClient>, required_bridges: Vec<String>) -> Self {
        Self {
            network,
            required_bridges,
        }
    }
}

#[async_trait]
impl HealthProbe for OvsBridgeProbe {
    fn name(&self) -> &str {
        OVS_BRIDGES
    }

    async fn probe(&self) -> Result<String> {
        let mut missing = Vec::new();
        for bridge in &self.required_bridges {
            if !self.network.get_bridge_status(bridge).await? {
                missing.push(bridge.as_str());
            }
        }

        if !missing.is_empty() {
            return Err(Error::ProbeFailure(format!(
                "Missing bridge(s): {}",
                missing.join(", ")
            )));
        }
        Ok(format!("{} present", self.required_bridges.join(", ")))
    }
}

/// Free capacity and node availability on the storage plane
pub struct StorageCapacityProbe {
    storage: Arc<dyn StorageClient>,
    critical_pct: f64,
}

impl StorageCapacityProbe {
    pub fn new(storage: Arc<dyn StorageClient>, critical_pct: f64) -> Self {
        Self {
            storage,
            critical_pct,
        }
    }
}

#[async_trait]
impl HealthProbe for StorageCapacityProbe {
    fn name(&self) -> &str {
        STORAGE_CAPACITY
    }

    async fn probe(&self) -> Result<String> {
        let summary = StorageSummary::from_value(&self.storage.get_storage_summary().await?)?;

        if summary.nodes.sds_online == 0 {
            return Err(Error::ProbeFailure("No SDS nodes online".to_string()));
        }
        if summary.nodes.sdc_online == 0 {
            return Err(Error::ProbeFailure("No SDC nodes online".to_string()));
        }

        let free = summary.capacity.free_percent().ok_or_else(|| {
            Error::ProbeFailure("Storage plane reports no capacity".to_string())
        })?;

        if free < self.critical_pct {
            return Err(Error::ProbeFailure(format!(
                "Free capacity critically low: {:.1}%",
                free
            )));
        }

        Ok(format!(
            "{:.1}% free of {} GB, {}/{} SDS online",
            free, summary.capacity.total_gb, summary.nodes.sds_online, summary.nodes.sds_count
        ))
    }
}

/// Runs every registered probe and builds a report
pub struct HealthChecker {
    probes: Vec<Arc<dyn HealthProbe>>,
    probe_timeout: Duration,
    retry: RetryPolicy,
}

impl HealthChecker {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            probe_timeout,
            retry: RetryPolicy::with_max_attempts(2, Duration::from_secs(1)),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the configured probe set
    pub fn from_config(
        config: &HealthConfig,
        compute: Arc<dyn ComputeClient>,
        storage: Arc<dyn StorageClient>,
        network: Arc<dyn NetworkClient>,
    ) -> Result<Self> {
        let mut checker = Self::new(config.probe_timeout());

        for name in &config.probes {
            let probe: Arc<dyn HealthProbe> = match name.as_str() {
                COMPUTE_API => Arc::new(ComputeApiProbe::new(compute.clone())),
                STORAGE_GATEWAY => Arc::new(StorageGatewayProbe::new(storage.clone())),
                OVS_BRIDGES => Arc::new(OvsBridgeProbe::new(
                    network.clone(),
                    config.required_bridges.clone(),
                )),
                STORAGE_CAPACITY => Arc::new(StorageCapacityProbe::new(
                    storage.clone(),
                    config.capacity_critical_pct,
                )),
                other => {
                    return Err(Error::InvalidConfig(format!("Unknown health probe '{}'", other)))
                }
            };
            checker.register(probe)?;
        }

        Ok(checker)
    }

    /// Check names must be unique
    pub fn register(&mut self, probe: Arc<dyn HealthProbe>) -> Result<()> {
        if self.probes.iter().any(|p| p.name() == probe.name()) {
            return Err(Error::InvalidConfig(format!(
                "Health probe '{}' registered twice",
                probe.name()
            )));
        }
        self.probes.push(probe);
        Ok(())
    }

    pub fn probe_names(&self) -> Vec<&str> {
        self.probes.iter().map(|p| p.name()).collect()
    }

    pub async fn run_health_check(&self) -> HealthCheckReport {
        let handles: Vec<_> = self
            .probes
            .iter()
            .map(|probe| {
                let probe = probe.clone();
                let timeout = self.probe_timeout;
                let retry = self.retry.clone();
                tokio::spawn(async move { run_probe(probe.as_ref(), timeout, &retry).await })
            })
            .collect();

        let joined = futures::future::join_all(handles).await;

        let checks = self.probes.iter().zip(joined).map(|(probe, result)| {
            let outcome = result.unwrap_or_else(|e| {
                warn!(probe = %probe.name(), error = %e, "Health probe task aborted");
                CheckOutcome::fail(format!("Probe aborted: {}", e), 0)
            });
            (probe.name().to_string(), outcome)
        });

        let report = HealthCheckReport::from_checks(checks);
        debug!(
            passed = report.passed_count,
            failed = report.failed_count,
            "Health check complete"
        );
        report
    }
}

async fn run_probe(probe: &dyn HealthProbe, timeout: Duration, retry: &RetryPolicy) -> CheckOutcome {
    let start = Instant::now();

    let outcome = retry_with_backoff(retry, probe.name(), Error::is_transient, || {
        call_with_timeout(timeout, probe.name(), probe.probe())
    })
    .await;

    let latency_ms = start.elapsed().as_millis() as u64;

    match outcome.result {
        Ok(detail) => CheckOutcome::pass(detail, latency_ms),
        Err(e) => {
            warn!(probe = %probe.name(), attempts = outcome.attempts, error = %e, "Health probe failed");
            CheckOutcome::fail(e.to_string(), latency_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProbe {
        name: &'static str,
        result: fn() -> Result<String>,
    }

    #[async_trait]
    impl HealthProbe for StaticProbe {
        fn name(&self) -> &str {
            self.name
        }

        async fn probe(&self) -> Result<String> {
            (self.result)()
        }
    }

    struct PanickingProbe;

    #[async_trait]
    impl HealthProbe for PanickingProbe {
        fn name(&self) -> &str {
            "panics"
        }

        async fn probe(&self) -> Result<String> {
            panic!("probe bug")
        }
    }

    #[test]
    fn test_duplicate_probe_rejected() {
        let mut checker = HealthChecker::new(Duration::from_secs(1));
        let probe = || Arc::new(StaticProbe { name: "a", result: || Ok("ok".to_string()) });

        checker.register(probe()).unwrap();
        assert!(matches!(checker.register(probe()), Err(Error::InvalidConfig(_))));
        assert_eq!(checker.probe_names(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_panicking_probe_is_isolated() {
        let mut checker = HealthChecker::new(Duration::from_secs(1)).with_retry(RetryPolicy::once());
        checker
            .register(Arc::new(StaticProbe { name: "ok", result: || Ok("fine".to_string()) }))
            .unwrap();
        checker.register(Arc::new(PanickingProbe)).unwrap();

        let report = checker.run_health_check().await;

        assert_eq!(report.checks.len(), 2);
        assert!(report.checks["ok"].passed);
        assert!(!report.checks["panics"].passed);
        assert_eq!(report.failed_count, 1);
    }

    #[tokio::test]
    async fn test_probe_failure_detail_recorded() {
        let mut checker = HealthChecker::new(Duration::from_secs(1)).with_retry(RetryPolicy::once());
        checker
            .register(Arc::new(StaticProbe {
                name: OVS_BRIDGES,
                result: || Err(Error::ProbeFailure("Missing bridge(s): br-int".to_string())),
            }))
            .unwrap();

        let report = checker.run_health_check().await;
        assert!(report.checks[OVS_BRIDGES].detail.contains("br-int"));
    }
}
