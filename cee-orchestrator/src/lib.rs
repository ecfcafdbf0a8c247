//! CEE Integration Orchestrator Library
//!
//! Cached cluster status, health checking and multi-step provisioning across
//! the compute (OpenStack), storage (VxSDS) and switching (OVS) planes.

// Core modules
pub mod config;
pub mod validation;

// Application state
pub mod state;
pub use state::AppState;

// Capability clients
pub mod clients;

// Status cache and retry primitives
pub mod cache;
pub mod retry;

// Health checks and the cluster verdict
pub mod health;
pub mod monitor;

// Provisioning workflows
pub mod orchestrator;

// CLI output formatting
pub mod output;

// Logging configuration
pub mod logging;

// Graceful shutdown handling
pub mod shutdown;
