//! Cluster-wide status verdict and the periodic health monitor loop

use crate::cache::CachedStatusAggregator;
use crate::clients::StorageSummary;
use crate::config::HealthConfig;
use crate::health::HealthChecker;
use cee_common::HealthCheckReport;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Free capacity below which adding capacity is recommended
const CAPACITY_RECOMMEND_PCT: f64 = 15.0;

/// Overall verdict, ordered by severity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Warning,
    Critical,
    /// No plane could be queried at all
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComprehensiveStatus {
    pub timestamp: DateTime<Utc>,
    pub overall: OverallHealth,
    pub components: BTreeMap<String, Value>,
    pub alerts: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ComprehensiveStatus {
    fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            overall: OverallHealth::Healthy,
            components: BTreeMap::new(),
            alerts: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    fn alert(&mut self, severity: OverallHealth, message: String) {
        self.overall = self.overall.max(severity);
        self.alerts.push(message);
    }

    fn recommend(&mut self, message: &str) {
        if !self.recommendations.iter().any(|r| r == message) {
            self.recommendations.push(message.to_string());
        }
    }
}

/// Builds one verdict out of all three planes' cached status
pub struct StatusAggregator {
    status: Arc<CachedStatusAggregator>,
    required_bridges: Vec<String>,
    capacity_critical_pct: f64,
    capacity_warning_pct: f64,
}

impl StatusAggregator {
    pub fn new(status: Arc<CachedStatusAggregator>, config: &HealthConfig) -> Self {
        Self {
            status,
            required_bridges: config.required_bridges.clone(),
            capacity_critical_pct: config.capacity_critical_pct,
            capacity_warning_pct: config.capacity_warning_pct,
        }
    }

    pub async fn comprehensive_status(&self) -> ComprehensiveStatus {
        let (cluster, storage, topology) = tokio::join!(
            self.status.cluster_status(),
            self.status.storage_summary(),
            self.status.topology(),
        );

        let mut verdict = ComprehensiveStatus::new();
        let mut reachable = 0;

        match cluster {
            Ok(cluster) => {
                reachable += 1;
                self.assess_compute(&cluster, &mut verdict);
                verdict.components.insert("compute".to_string(), cluster);
            }
            Err(e) => verdict.alert(
                OverallHealth::Warning,
                format!("Compute status unavailable: {}", e),
            ),
        }

        match storage {
            Ok(summary) => {
                reachable += 1;
                self.assess_storage(&summary, &mut verdict);
                verdict.components.insert(
                    "storage".to_string(),
                    serde_json::to_value(&summary).unwrap_or(Value::Null),
                );
            }
            Err(e) => verdict.alert(
                OverallHealth::Critical,
                format!("Storage status unavailable: {}", e),
            ),
        }

        match topology {
            Ok(topology) => {
                reachable += 1;
                self.assess_bridges(&mut verdict).await;
                verdict.components.insert("network".to_string(), topology);
            }
            Err(e) => verdict.alert(
                OverallHealth::Warning,
                format!("Network status unavailable: {}", e),
            ),
        }

        if reachable == 0 {
            verdict.overall = OverallHealth::Error;
        }
        verdict
    }

    fn assess_compute(&self, cluster: &Value, verdict: &mut ComprehensiveStatus) {
        let down = cluster["compute"]["services_down"].as_u64().unwrap_or(0);
        if down > 0 {
            verdict.alert(OverallHealth::Warning, format!("{} compute service(s) down", down));
        }

        let dead = cluster["network"]["agents_dead"].as_u64().unwrap_or(0);
        if dead > 0 {
            verdict.alert(OverallHealth::Warning, format!("{} network agent(s) not alive", dead));
            verdict.recommend("Check neutron agents on the affected nodes");
        }
    }

    fn assess_storage(&self, summary: &StorageSummary, verdict: &mut ComprehensiveStatus) {
        let nodes = &summary.nodes;

        if nodes.sds_count == 0 {
            verdict.alert(OverallHealth::Critical, "No SDS nodes available".to_string());
        } else if nodes.sds_online < nodes.sds_count {
            verdict.alert(
                OverallHealth::Warning,
                format!("SDS nodes online: {}/{}", nodes.sds_online, nodes.sds_count),
            );
        }

        if nodes.sdc_count == 0 {
            verdict.alert(OverallHealth::Critical, "No SDC nodes available".to_string());
        } else if nodes.sdc_online < nodes.sdc_count {
            verdict.alert(
                OverallHealth::Warning,
                format!("SDC nodes online: {}/{}", nodes.sdc_online, nodes.sdc_count),
            );
        }

        if let Some(free) = summary.capacity.free_percent() {
            if free < self.capacity_critical_pct {
                verdict.alert(
                    OverallHealth::Critical,
                    format!("Free storage capacity critically low: {:.1}%", free),
                );
            } else if free < self.capacity_warning_pct {
                verdict.alert(
                    OverallHealth::Warning,
                    format!("Free storage capacity low: {:.1}%", free),
                );
            }

            if free < CAPACITY_RECOMMEND_PCT {
                verdict.recommend("Add storage capacity to the VxSDS pools");
            }
        }
    }

    /// Each required bridge goes through its own cache entry
    async fn assess_bridges(&self, verdict: &mut ComprehensiveStatus) {
        let statuses = join_all(
            self.required_bridges
                .iter()
                .map(|bridge| self.status.bridge_status(bridge)),
        )
        .await;

        for (bridge, status) in self.required_bridges.iter().zip(statuses) {
            match status {
                Ok(true) => {}
                Ok(false) => {
                    verdict.alert(OverallHealth::Warning, format!("Required bridge {} missing", bridge));
                    verdict.recommend("Run network setup for the missing bridges");
                }
                Err(e) => verdict.alert(
                    OverallHealth::Warning,
                    format!("Bridge {} status unavailable: {}", bridge, e),
                ),
            }
        }
    }
}

/// Runs the health check on a fixed period until shutdown
pub struct HealthMonitor {
    checker: Arc<HealthChecker>,
    interval: Duration,
    last_report: RwLock<Option<HealthCheckReport>>,
    runs: AtomicU64,
}

impl HealthMonitor {
    pub fn new(checker: Arc<HealthChecker>, interval: Duration) -> Self {
        Self {
            checker,
            interval,
            last_report: RwLock::new(None),
            runs: AtomicU64::new(0),
        }
    }

    pub async fn last_report(&self) -> Option<HealthCheckReport> {
        self.last_report.read().await.clone()
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Check once per interval, the first one immediately
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Health monitor started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.checker.run_health_check().await;
                    if report.is_healthy() {
                        info!(passed = report.passed_count, "{}", report.summary());
                    } else {
                        error!(
                            passed = report.passed_count,
                            failed = report.failed_count,
                            "{}",
                            report.summary()
                        );
                    }
                    *self.last_report.write().await = Some(report);
                    self.runs.fetch_add(1, Ordering::SeqCst);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        warn!(runs = self.runs(), "Health monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_raises_but_never_lowers_severity() {
        let mut status = ComprehensiveStatus::new();
        status.alert(OverallHealth::Critical, "storage".to_string());
        status.alert(OverallHealth::Warning, "network".to_string());

        assert_eq!(status.overall, OverallHealth::Critical);
        assert_eq!(status.alerts.len(), 2);
    }

    #[test]
    fn test_recommendations_are_deduplicated() {
        let mut status = ComprehensiveStatus::new();
        status.recommend("Run network setup for the missing bridges");
        status.recommend("Run network setup for the missing bridges");
        assert_eq!(status.recommendations.len(), 1);
    }

    #[test]
    fn test_overall_health_serializes_lowercase() {
        let json = serde_json::to_string(&OverallHealth::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        assert!(OverallHealth::Error > OverallHealth::Critical);
    }
}
