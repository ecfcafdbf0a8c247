//! Configuration management for the CEE orchestrator
//!
//! Settings are loaded from:
//! 1. Environment variables (highest priority)
//! 2. Configuration file (TOML format)
//! 3. Default values (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::health::{COMPUTE_API, OVS_BRIDGES, STORAGE_CAPACITY, STORAGE_GATEWAY};
use crate::logging::LoggingConfig;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CeeConfig {
    /// OpenStack control plane
    pub openstack: OpenStackConfig,
    /// VxSDS storage gateway
    pub vxsds: VxSdsConfig,
    /// Open vSwitch
    pub ovs: OvsConfig,
    /// Workflow timeouts and polling
    pub orchestrator: OrchestratorConfig,
    /// Status cache
    pub cache: CacheConfig,
    /// Health checks and monitor loop
    pub health: HealthConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// OpenStack API endpoints and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenStackConfig {
    /// Keystone v3 endpoint
    pub auth_url: String,
    /// Nova endpoint
    pub compute_url: String,
    /// Neutron endpoint
    pub network_url: String,
    /// Cinder endpoint including the admin project, used for quotas and volumes
    pub volume_url: String,
    pub username: String,
    pub password: String,
    pub project_name: String,
    pub user_domain_id: String,
    pub project_domain_id: String,
    /// Role granted to a tenant's admin user
    pub member_role: String,
    /// Neutron network type for tenant networks
    pub tenant_network_type: String,
    pub verify_tls: bool,
}

/// VxSDS gateway connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VxSdsConfig {
    pub gateway_url: String,
    pub username: String,
    pub password: String,
    pub verify_tls: bool,
}

/// Open vSwitch command wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OvsConfig {
    /// Path to ovs-vsctl
    pub vsctl_path: String,
    /// Bridge VXLAN tunnel ports are attached to, created by network setup
    pub tunnel_bridge: String,
}

/// Workflow execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Per-call timeout for control plane calls
    pub control_call_timeout_secs: u64,
    /// Per-call timeout for storage calls
    pub storage_call_timeout_secs: u64,
    /// Attempts for a call failing with a transient error
    pub transient_retry_attempts: u32,
    /// First delay between transient retries
    pub transient_retry_delay_ms: u64,
    /// First delay between status polls
    pub poll_base_delay_secs: u64,
    /// Cap on the delay between status polls
    pub poll_max_delay_secs: u64,
    /// Overall time allowed for a resource to become ready
    pub poll_budget_secs: u64,
}

/// Status cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

/// Health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Probes to register, in report order
    pub probes: Vec<String>,
    pub probe_timeout_secs: u64,
    /// Period of the monitor loop
    pub interval_secs: u64,
    /// Bridges that must exist on the switching plane
    pub required_bridges: Vec<String>,
    /// Free capacity below this percentage is critical
    pub capacity_critical_pct: f64,
    /// Free capacity below this percentage is a warning
    pub capacity_warning_pct: f64,
}

impl Default for OpenStackConfig {
    fn default() -> Self {
        Self {
            auth_url: "http://192.168.2.13:5000/v3".to_string(),
            compute_url: "http://192.168.2.13:8774/v2.1".to_string(),
            network_url: "http://192.168.2.13:9696".to_string(),
            volume_url: "http://192.168.2.13:8776/v3".to_string(),
            username: "admin".to_string(),
            password: String::new(),
            project_name: "admin".to_string(),
            user_domain_id: "default".to_string(),
            project_domain_id: "default".to_string(),
            member_role: "member".to_string(),
            tenant_network_type: "vxlan".to_string(),
            verify_tls: true,
        }
    }
}

impl Default for VxSdsConfig {
    fn default() -> Self {
        Self {
            gateway_url: "https://192.168.2.13:4443".to_string(),
            username: "admin".to_string(),
            password: String::new(),
            verify_tls: false,
        }
    }
}

impl Default for OvsConfig {
    fn default() -> Self {
        Self {
            vsctl_path: "ovs-vsctl".to_string(),
            tunnel_bridge: "br-tun".to_string(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            control_call_timeout_secs: 30,
            storage_call_timeout_secs: 60,
            transient_retry_attempts: 3,
            transient_retry_delay_ms: 500,
            poll_base_delay_secs: 2,
            poll_max_delay_secs: 30,
            poll_budget_secs: 300,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probes: vec![
                COMPUTE_API.to_string(),
                STORAGE_GATEWAY.to_string(),
                OVS_BRIDGES.to_string(),
            ],
            probe_timeout_secs: 30,
            interval_secs: 60,
            required_bridges: vec!["br-int".to_string()],
            capacity_critical_pct: 10.0,
            capacity_warning_pct: 20.0,
        }
    }
}

impl OrchestratorConfig {
    pub fn control_call_timeout(&self) -> Duration {
        Duration::from_secs(self.control_call_timeout_secs)
    }

    pub fn storage_call_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_call_timeout_secs)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl HealthConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl CeeConfig {
    /// Load configuration from environment variables and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Like `load`, but an explicit path wins over the standard locations
    pub fn load_with(path: Option<&PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match path.cloned().or_else(Self::find_config_file) {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("CEE_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/cee/orchestrator.toml")),
            Some(PathBuf::from("./cee-orchestrator.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // OpenStack
        if let Ok(url) = std::env::var("CEE_OS_AUTH_URL") {
            self.openstack.auth_url = url;
        }
        if let Ok(user) = std::env::var("CEE_OS_USERNAME") {
            self.openstack.username = user;
        }
        if let Ok(password) = std::env::var("CEE_OS_PASSWORD") {
            self.openstack.password = password;
        }
        if let Ok(project) = std::env::var("CEE_OS_PROJECT_NAME") {
            self.openstack.project_name = project;
        }

        // VxSDS
        if let Ok(url) = std::env::var("CEE_VXSDS_GATEWAY") {
            self.vxsds.gateway_url = url;
        }
        if let Ok(user) = std::env::var("CEE_VXSDS_USERNAME") {
            self.vxsds.username = user;
        }
        if let Ok(password) = std::env::var("CEE_VXSDS_PASSWORD") {
            self.vxsds.password = password;
        }

        // OVS
        if let Ok(path) = std::env::var("CEE_OVS_VSCTL") {
            self.ovs.vsctl_path = path;
        }

        // Cache and health
        if let Ok(ttl) = std::env::var("CEE_CACHE_TTL_SECS") {
            if let Ok(ttl) = ttl.parse() {
                self.cache.ttl_secs = ttl;
            }
        }
        if let Ok(interval) = std::env::var("CEE_HEALTH_INTERVAL_SECS") {
            if let Ok(interval) = interval.parse() {
                self.health.interval_secs = interval;
            }
        }

        // Logging
        if let Ok(level) = std::env::var("CEE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(path) = std::env::var("CEE_LOG_DIR") {
            self.logging.file_path = Some(path);
        }
        if let Ok(json) = std::env::var("CEE_LOG_JSON") {
            self.logging.json_format = json.parse().unwrap_or(false);
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("openstack.auth_url", &self.openstack.auth_url),
            ("openstack.compute_url", &self.openstack.compute_url),
            ("openstack.network_url", &self.openstack.network_url),
            ("openstack.volume_url", &self.openstack.volume_url),
            ("vxsds.gateway_url", &self.vxsds.gateway_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| ConfigError::Validation(format!("{} is not a valid URL: {}", name, e)))?;
        }

        let orchestrator = &self.orchestrator;
        if orchestrator.control_call_timeout_secs == 0 || orchestrator.storage_call_timeout_secs == 0 {
            return Err(ConfigError::Validation("Call timeouts cannot be 0".to_string()));
        }
        if orchestrator.transient_retry_attempts == 0 {
            return Err(ConfigError::Validation(
                "transient_retry_attempts must be at least 1".to_string(),
            ));
        }
        if orchestrator.poll_base_delay_secs == 0
            || orchestrator.poll_max_delay_secs < orchestrator.poll_base_delay_secs
        {
            return Err(ConfigError::Validation(
                "Poll delays must satisfy 0 < poll_base_delay_secs <= poll_max_delay_secs".to_string(),
            ));
        }
        if orchestrator.poll_budget_secs == 0 {
            return Err(ConfigError::Validation("poll_budget_secs cannot be 0".to_string()));
        }

        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Validation("Cache TTL cannot be 0".to_string()));
        }

        self.validate_health()
    }

    fn validate_health(&self) -> Result<(), ConfigError> {
        let health = &self.health;

        if health.probes.is_empty() {
            return Err(ConfigError::Validation("At least one health probe is required".to_string()));
        }

        let known = [COMPUTE_API, STORAGE_GATEWAY, OVS_BRIDGES, STORAGE_CAPACITY];
        let mut seen = std::collections::HashSet::new();
        for probe in &health.probes {
            if !known.contains(&probe.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Unknown health probe '{}' (known: {})",
                    probe,
                    known.join(", ")
                )));
            }
            if !seen.insert(probe.as_str()) {
                return Err(ConfigError::Validation(format!("Duplicate health probe '{}'", probe)));
            }
        }

        if health.probe_timeout_secs == 0 || health.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "Probe timeout and monitor interval cannot be 0".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&health.capacity_critical_pct)
            || !(0.0..=100.0).contains(&health.capacity_warning_pct)
            || health.capacity_critical_pct > health.capacity_warning_pct
        {
            return Err(ConfigError::Validation(
                "Capacity thresholds must satisfy 0 <= critical <= warning <= 100".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0:?}: {1}")]
    FileRead(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Config validation failed: {0}")]
    Validation(String),
}

impl From<ConfigError> for cee_common::Error {
    fn from(err: ConfigError) -> Self {
        cee_common::Error::InvalidConfig(err.to_string())
    }
}
