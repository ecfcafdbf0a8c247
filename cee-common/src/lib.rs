//! Common types shared between the CEE orchestrator library, its binary and tests

pub mod health;
pub mod provisioning;

use serde::{Deserialize, Serialize};

pub use health::{CheckOutcome, HealthCheckReport};
pub use provisioning::{
    DatapathType, NetworkSetupRequest, OverallStatus, PortQos, ProvisioningResult, RateLimits,
    StepRequirement, StepResult, StepStatus, TenantEnvironmentRequest, VmWithStorageRequest,
    WorkflowState,
};

/// One of the independently-owned subsystems the orchestrator coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Plane {
    Compute,  // OpenStack control plane
    Storage,  // VxSDS
    Network,  // Open vSwitch
}

impl std::fmt::Display for Plane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compute => write!(f, "compute"),
            Self::Storage => write!(f, "storage"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Error taxonomy shared by capability clients and the orchestrator
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Resource conflict: {0}")]
    ResourceConflict(String),

    #[error("Service temporarily unavailable: {0}")]
    TransientUnavailable(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Dependency not ready: {0}")]
    DependencyNotReady(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Probe failed: {0}")]
    ProbeFailure(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Serializable classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ResourceConflict(_) => ErrorKind::ResourceConflict,
            Error::TransientUnavailable(_) => ErrorKind::TransientUnavailable,
            Error::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            Error::DependencyNotReady(_) => ErrorKind::DependencyNotReady,
            Error::AuthenticationFailure(_) => ErrorKind::AuthenticationFailure,
            Error::ProbeFailure(_) => ErrorKind::ProbeFailure,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Validation,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::Backend(_) | Error::Io(_) => ErrorKind::Backend,
        }
    }

    /// Only transient unavailability is eligible for local retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientUnavailable(_))
    }
}

/// Error classification recorded on step results
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ResourceConflict,
    TransientUnavailable,
    QuotaExceeded,
    DependencyNotReady,
    AuthenticationFailure,
    ProbeFailure,
    NotFound,
    Validation,
    InvalidConfig,
    Backend,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ResourceConflict => "resource_conflict",
            Self::TransientUnavailable => "transient_unavailable",
            Self::QuotaExceeded => "quota_exceeded",
            Self::DependencyNotReady => "dependency_not_ready",
            Self::AuthenticationFailure => "authentication_failure",
            Self::ProbeFailure => "probe_failure",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::InvalidConfig => "invalid_config",
            Self::Backend => "backend",
        };
        write!(f, "{}", name)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(Error::TransientUnavailable("timeout".to_string()).is_transient());
        assert!(!Error::ResourceConflict("tenant-a".to_string()).is_transient());
        assert!(!Error::QuotaExceeded("gigabytes".to_string()).is_transient());
        assert!(!Error::DependencyNotReady("vol-1".to_string()).is_transient());
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            Error::ResourceConflict("x".to_string()).kind(),
            ErrorKind::ResourceConflict
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "broken pipe");
        assert_eq!(Error::from(io).kind(), ErrorKind::Backend);
    }

    #[test]
    fn test_plane_serialization() {
        let json = serde_json::to_string(&Plane::Storage).unwrap();
        assert_eq!(json, "\"storage\"");
        assert_eq!(Plane::Network.to_string(), "network");
    }
}
