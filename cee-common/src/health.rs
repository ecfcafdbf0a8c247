//! Health check report types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of one probe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub detail: String,
    pub latency_ms: u64,
}

impl CheckOutcome {
    pub fn pass(detail: impl Into<String>, latency_ms: u64) -> Self {
        Self { passed: true, detail: detail.into(), latency_ms }
    }

    pub fn fail(detail: impl Into<String>, latency_ms: u64) -> Self {
        Self { passed: false, detail: detail.into(), latency_ms }
    }
}

/// Full health check report, rebuilt on every run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckReport {
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, CheckOutcome>,
    pub passed_count: usize,
    pub failed_count: usize,
}

impl HealthCheckReport {
    /// Build a report; tallies are computed from the checks
    pub fn from_checks(checks: impl IntoIterator<Item = (String, CheckOutcome)>) -> Self {
        let checks: BTreeMap<String, CheckOutcome> = checks.into_iter().collect();
        let passed_count = checks.values().filter(|c| c.passed).count();
        let failed_count = checks.len() - passed_count;

        Self {
            timestamp: Utc::now(),
            checks,
            passed_count,
            failed_count,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.failed_count == 0
    }

    pub fn failed_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|(_, c)| !c.passed)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn summary(&self) -> String {
        let mut msg = format!("Health checks: {} passed", self.passed_count);
        if self.failed_count > 0 {
            msg.push_str(&format!(", {} failed", self.failed_count));
            for (name, check) in self.checks.iter().filter(|(_, c)| !c.passed) {
                msg.push_str(&format!("\n  - {}: {}", name, check.detail));
            }
        }
        msg
    }
}
