//! Provisioning requests and workflow results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ErrorKind;

/// Request to build a complete tenant environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantEnvironmentRequest {
    pub tenant_name: String,
    #[serde(default)]
    pub description: String,
    pub admin_user: String,
    pub admin_password: String,
    pub network_cidr: String,     // IPv4 CIDR, e.g. "192.168.100.0/24"
    pub storage_quota_gb: u64,
    /// `<tenant>-router` with an interface on the tenant subnet
    #[serde(default = "default_true")]
    pub create_router: bool,
    /// Baseline `web-sg` and `ssh-sg` groups
    #[serde(default = "default_true")]
    pub security_groups: bool,
}

fn default_true() -> bool {
    true
}

/// Request to create a VM booted from a freshly provisioned volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmWithStorageRequest {
    pub name: String,
    pub image: String,
    pub flavor: String,
    pub volume_size_gb: u64,
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
    /// Compute node the volume gets mapped to (SDC), if any
    #[serde(default)]
    pub attach_node: Option<String>,
    #[serde(default)]
    pub qos: Option<PortQos>,
}

fn default_volume_type() -> String {
    "vxsds_thin_SSD".to_string()
}

/// OVS datapath type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatapathType {
    #[default]
    System,    // Kernel datapath
    Netdev,    // Userspace datapath (DPDK)
}

impl std::fmt::Display for DatapathType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Netdev => write!(f, "netdev"),
        }
    }
}

/// Ingress policing limits for a switch port
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimits {
    pub max_kbps: u64,
    /// Defaults to `max_kbps` when unset
    #[serde(default)]
    pub burst_kbps: Option<u64>,
}

impl RateLimits {
    pub fn burst(&self) -> u64 {
        self.burst_kbps.unwrap_or(self.max_kbps)
    }
}

/// QoS to apply on one switch port
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortQos {
    pub port: String,
    pub limits: RateLimits,
}

/// Request to prepare the switching plane on a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSetupRequest {
    pub bridge_name: String,
    #[serde(default)]
    pub physical_iface: Option<String>,
    #[serde(default)]
    pub datapath_type: DatapathType,
    pub local_ip: String,
    #[serde(default)]
    pub remote_ips: Vec<String>,
    #[serde(default)]
    pub qos: Vec<PortQos>,
}

/// Whether a step's failure fails the whole workflow
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepRequirement {
    Required,
    Optional,
}

/// Outcome of a single workflow step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Failed,
    Skipped,
}

/// Final classification of a workflow run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Success,
    Partial,
    Failed,
}

/// Lifecycle of a workflow instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Pending,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl From<OverallStatus> for WorkflowState {
    fn from(status: OverallStatus) -> Self {
        match status {
            OverallStatus::Success => WorkflowState::Completed,
            OverallStatus::Partial => WorkflowState::PartiallyCompleted,
            OverallStatus::Failed => WorkflowState::Failed,
        }
    }
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::PartiallyCompleted | WorkflowState::Failed
        )
    }
}

/// Record of one executed (or skipped) step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub requirement: StepRequirement,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn is_ok(&self) -> bool {
        self.status == StepStatus::Ok
    }

    pub fn is_required(&self) -> bool {
        self.requirement == StepRequirement::Required
    }
}

/// Result of one workflow invocation, steps in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningResult {
    pub run_id: Uuid,
    pub workflow: String,
    pub overall_status: OverallStatus,
    pub cancelled: bool,
    pub steps: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProvisioningResult {
    /// Seal a finished run; the status is derived from the steps
    pub fn finalize(
        run_id: Uuid,
        workflow: impl Into<String>,
        steps: Vec<StepResult>,
        cancelled: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        let overall_status = Self::classify(&steps, cancelled);
        Self {
            run_id,
            workflow: workflow.into(),
            overall_status,
            cancelled,
            steps,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Derive the overall status of a run from its steps
    pub fn classify(steps: &[StepResult], cancelled: bool) -> OverallStatus {
        let required_failed = steps
            .iter()
            .any(|s| s.is_required() && s.status == StepStatus::Failed);

        if required_failed {
            return OverallStatus::Failed;
        }
        if cancelled {
            return OverallStatus::Partial;
        }

        // A required step skipped because something upstream did not complete
        let required_incomplete = steps
            .iter()
            .any(|s| s.is_required() && s.status != StepStatus::Ok);

        if required_incomplete {
            OverallStatus::Failed
        } else if steps.iter().all(StepResult::is_ok) {
            OverallStatus::Success
        } else {
            OverallStatus::Partial
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.overall_status.into()
    }

    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_name == name)
    }

    pub fn resource_id(&self, name: &str) -> Option<&str> {
        self.step(name).and_then(|s| s.resource_id.as_deref())
    }

    /// First step that failed, i.e. where the workflow stopped
    pub fn first_failure(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, requirement: StepRequirement, status: StepStatus) -> StepResult {
        StepResult {
            step_name: name.to_string(),
            requirement,
            status,
            resource_id: None,
            error_kind: None,
            error_detail: None,
            attempts: 1,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_all_ok_is_success() {
        let steps = vec![
            step("a", StepRequirement::Required, StepStatus::Ok),
            step("b", StepRequirement::Optional, StepStatus::Ok),
        ];
        assert_eq!(ProvisioningResult::classify(&steps, false), OverallStatus::Success);
    }

    #[test]
    fn test_optional_failure_is_partial() {
        let steps = vec![
            step("a", StepRequirement::Required, StepStatus::Ok),
            step("quota", StepRequirement::Optional, StepStatus::Failed),
            step("b", StepRequirement::Required, StepStatus::Ok),
        ];
        assert_eq!(ProvisioningResult::classify(&steps, false), OverallStatus::Partial);
    }

    #[test]
    fn test_required_failure_dominates() {
        let steps = vec![
            step("a", StepRequirement::Required, StepStatus::Failed),
            step("cleanup", StepRequirement::Optional, StepStatus::Ok),
        ];
        assert_eq!(ProvisioningResult::classify(&steps, false), OverallStatus::Failed);
        assert_eq!(ProvisioningResult::classify(&steps, true), OverallStatus::Failed);
    }

    #[test]
    fn test_cancelled_run_without_required_failure_is_partial() {
        let steps = vec![
            step("a", StepRequirement::Required, StepStatus::Ok),
            step("b", StepRequirement::Required, StepStatus::Skipped),
        ];
        assert_eq!(ProvisioningResult::classify(&steps, true), OverallStatus::Partial);
        assert_eq!(ProvisioningResult::classify(&steps, false), OverallStatus::Failed);
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(WorkflowState::from(OverallStatus::Partial), WorkflowState::PartiallyCompleted);
        assert!(WorkflowState::Failed.is_terminal());
        assert!(!WorkflowState::Running.is_terminal());
    }

    #[test]
    fn test_rate_limit_burst_defaults_to_max() {
        let limits = RateLimits { max_kbps: 100_000, burst_kbps: None };
        assert_eq!(limits.burst(), 100_000);
    }
}
