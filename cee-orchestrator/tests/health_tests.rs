//! Health Checker Tests
//! Probe isolation, timeouts, report tallies and the periodic monitor

mod common;

use cee_common::Error;
use cee_orchestrator::config::{CeeConfig, HealthConfig};
use cee_orchestrator::health::{
    HealthChecker, COMPUTE_API, OVS_BRIDGES, STORAGE_CAPACITY, STORAGE_GATEWAY,
};
use cee_orchestrator::monitor::HealthMonitor;
use cee_orchestrator::shutdown::ShutdownCoordinator;
use common::{storage_summary, FakeNetwork, Fakes};
use std::sync::Arc;
use std::time::Duration;

fn checker(fakes: &Fakes, config: &HealthConfig) -> HealthChecker {
    HealthChecker::from_config(
        config,
        fakes.compute.clone(),
        fakes.storage.clone(),
        fakes.network.clone(),
    )
    .unwrap()
}

// ============== Health Checks ==============

#[tokio::test]
async fn test_all_probes_pass() {
    let fakes = Fakes::new();
    let report = checker(&fakes, &HealthConfig::default()).run_health_check().await;

    assert!(report.is_healthy());
    assert_eq!(report.checks.len(), 3);
    assert_eq!(report.passed_count, 3);
    assert!(report.checks[STORAGE_GATEWAY].detail.contains("VxSDS 3.6"));
    assert!(report.checks.contains_key(COMPUTE_API));
    assert!(report.checks.contains_key(OVS_BRIDGES));
}

#[tokio::test(start_paused = true)]
async fn test_storage_gateway_timeout_fails_only_its_check() {
    let fakes = Fakes::new();
    fakes
        .storage
        .behavior
        .delay("get_system_info", Duration::from_secs(3600));

    let config = HealthConfig {
        probe_timeout_secs: 5,
        ..HealthConfig::default()
    };
    let report = checker(&fakes, &config).run_health_check().await;

    assert_eq!(report.checks.len(), 3);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.passed_count, 2);
    assert_eq!(report.failed_checks(), vec![STORAGE_GATEWAY]);
    assert!(report.checks[STORAGE_GATEWAY].detail.contains("timed out"));

    // Timeouts are transient, so the probe got its second attempt
    assert_eq!(fakes.storage.behavior.calls("get_system_info"), 2);
}

#[tokio::test]
async fn test_missing_bridge_is_reported() {
    let fakes = Fakes {
        network: Arc::new(FakeNetwork::with_bridges(&["br-tun"])),
        ..Fakes::new()
    };

    let report = checker(&fakes, &HealthConfig::default()).run_health_check().await;

    assert!(!report.is_healthy());
    let bridges = &report.checks[OVS_BRIDGES];
    assert!(!bridges.passed);
    assert!(bridges.detail.contains("br-int"));
}

#[tokio::test]
async fn test_authentication_failure_is_not_retried() {
    let fakes = Fakes::new();
    fakes
        .compute
        .behavior
        .fail_always("list_projects", || Error::AuthenticationFailure("token expired".to_string()));

    let report = checker(&fakes, &HealthConfig::default()).run_health_check().await;

    assert_eq!(report.failed_checks(), vec![COMPUTE_API]);
    assert_eq!(fakes.compute.behavior.calls("list_projects"), 1);
}

#[tokio::test]
async fn test_report_has_one_entry_per_probe() {
    let fakes = Fakes::new();
    fakes.storage.set_summary(storage_summary(1000, 50));

    let mut config = HealthConfig::default();
    config.probes.push(STORAGE_CAPACITY.to_string());

    let checker = checker(&fakes, &config);
    assert_eq!(checker.probe_names().len(), 4);

    let report = checker.run_health_check().await;
    assert_eq!(report.checks.len(), 4);
    assert_eq!(report.passed_count + report.failed_count, 4);
    assert!(report.checks[STORAGE_CAPACITY].detail.contains("critically low"));
}

#[test]
fn test_unknown_probe_rejected() {
    let fakes = Fakes::new();
    let mut config = HealthConfig::default();
    config.probes.push("dns".to_string());

    let result = HealthChecker::from_config(
        &config,
        fakes.compute.clone(),
        fakes.storage.clone(),
        fakes.network.clone(),
    );
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

// ============== Health Monitor ==============

#[tokio::test(start_paused = true)]
async fn test_monitor_runs_every_interval_until_shutdown() {
    let fakes = Fakes::new();
    let checker = Arc::new(checker(&fakes, &HealthConfig::default()));
    let monitor = Arc::new(HealthMonitor::new(checker, Duration::from_secs(60)));
    let shutdown = ShutdownCoordinator::with_timeout(Duration::from_secs(5));

    let handle = {
        let monitor = monitor.clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move { monitor.run(rx).await })
    };

    // Ticks at 0s, 60s and 120s
    tokio::time::sleep(Duration::from_secs(150)).await;
    shutdown.shutdown();
    handle.await.unwrap();

    assert_eq!(monitor.runs(), 3);
    assert_eq!(fakes.compute.behavior.calls("list_projects"), 3);
    assert!(monitor.last_report().await.unwrap().is_healthy());
}

#[tokio::test]
async fn test_app_state_wires_checker_and_monitor() {
    let fakes = Fakes::new();
    let mut config = CeeConfig::default();
    config.health.interval_secs = 15;

    let state = cee_orchestrator::AppState::with_clients(
        config,
        fakes.compute.clone(),
        fakes.storage.clone(),
        fakes.network.clone(),
    )
    .unwrap();

    let monitor = state.health_monitor();
    assert!(monitor.last_report().await.is_none());
    assert_eq!(state.health_checker.probe_names().len(), 3);
}
