///! CEE Orchestrator CLI
///!
///! Status, health and provisioning commands for a CEE cluster

use anyhow::Context;
use cee_common::{
    DatapathType, NetworkSetupRequest, OverallStatus, PortQos, ProvisioningResult, RateLimits,
    TenantEnvironmentRequest, VmWithStorageRequest,
};
use cee_orchestrator::config::CeeConfig;
use cee_orchestrator::monitor::OverallHealth;
use cee_orchestrator::orchestrator::CancelToken;
use cee_orchestrator::output::{self, OutputFormat};
use cee_orchestrator::shutdown::ShutdownCoordinator;
use cee_orchestrator::AppState;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (defaults to $CEE_CONFIG, /etc/cee/orchestrator.toml, ./cee-orchestrator.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured health probe once
    Health,
    /// Aggregate compute, storage and network status into one verdict
    Status,
    /// Run health checks periodically until interrupted
    Monitor,
    /// Tenant provisioning
    Tenant {
        #[command(subcommand)]
        command: TenantCommands,
    },
    /// VM provisioning
    Vm {
        #[command(subcommand)]
        command: VmCommands,
    },
    /// Switching plane setup
    Network {
        #[command(subcommand)]
        command: NetworkCommands,
    },
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum TenantCommands {
    /// Create project, admin user, quota, tenant network, router and security groups
    Create(TenantArgs),
}

#[derive(Subcommand)]
enum VmCommands {
    /// Create a VM booted from a new VxSDS volume
    Create(VmArgs),
}

#[derive(Subcommand)]
enum NetworkCommands {
    /// Create a bridge, VXLAN tunnels and port QoS
    Setup(NetworkArgs),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print a sample configuration file
    Sample,
    /// Load and validate the configuration
    Validate,
}

#[derive(Args)]
struct TenantArgs {
    /// Tenant (project) name
    #[arg(short, long)]
    name: String,
    #[arg(short, long, default_value = "")]
    description: String,
    /// Admin user created inside the project
    #[arg(long)]
    admin_user: String,
    #[arg(long)]
    admin_password: String,
    /// Tenant network CIDR, e.g. 192.168.100.0/24
    #[arg(long)]
    cidr: String,
    /// Block storage quota in GB
    #[arg(long)]
    quota_gb: u64,
    /// Skip the tenant router
    #[arg(long)]
    no_router: bool,
    /// Skip the default web and SSH security groups
    #[arg(long)]
    no_security_groups: bool,
}

#[derive(Args)]
struct VmArgs {
    /// VM name
    #[arg(short, long)]
    name: String,
    #[arg(short, long)]
    image: String,
    #[arg(short, long)]
    flavor: String,
    /// Root volume size in GB
    #[arg(short, long)]
    size_gb: u64,
    #[arg(long, default_value = "vxsds_thin_SSD")]
    volume_type: String,
    /// Map the volume to this SDC (id, IP or name)
    #[arg(long)]
    attach_node: Option<String>,
    /// Switch port to police
    #[arg(long, requires = "qos_kbps")]
    qos_port: Option<String>,
    /// Ingress rate limit in kbps
    #[arg(long, requires = "qos_port")]
    qos_kbps: Option<u64>,
}

#[derive(Args)]
struct NetworkArgs {
    #[arg(short, long, default_value = "br-ex")]
    bridge: String,
    /// Physical interface to add to the bridge
    #[arg(long)]
    physical_iface: Option<String>,
    /// Local tunnel endpoint
    #[arg(long)]
    local_ip: String,
    /// Remote tunnel endpoints (repeatable)
    #[arg(long = "remote-ip")]
    remote_ips: Vec<String>,
    /// Ingress policing as PORT=KBPS[:BURST_KBPS] (repeatable)
    #[arg(long = "qos", value_parser = parse_port_qos)]
    qos: Vec<PortQos>,
}

fn parse_port_qos(value: &str) -> Result<PortQos, String> {
    let (port, limits) = value
        .split_once('=')
        .ok_or_else(|| format!("expected PORT=KBPS[:BURST_KBPS], got '{}'", value))?;
    let (rate, burst) = match limits.split_once(':') {
        Some((rate, burst)) => (rate, Some(burst)),
        None => (limits, None),
    };

    let max_kbps = rate
        .parse()
        .map_err(|_| format!("invalid rate '{}'", rate))?;
    let burst_kbps = burst
        .map(|b| b.parse().map_err(|_| format!("invalid burst '{}'", b)))
        .transpose()?;

    Ok(PortQos {
        port: port.to_string(),
        limits: RateLimits { max_kbps, burst_kbps },
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    if let Commands::Config { command: ConfigCommands::Sample } = cli.command {
        print!("{}", CeeConfig::generate_sample());
        return Ok(ExitCode::SUCCESS);
    }

    let config = CeeConfig::load_with(cli.config.as_ref()).context("Invalid configuration")?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = config
        .logging
        .init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    if let Commands::Config { command: ConfigCommands::Validate } = cli.command {
        output::print_success("Configuration is valid");
        return Ok(ExitCode::SUCCESS);
    }

    let state = AppState::from_config(config).context("Failed to set up capability clients")?;
    let format = cli.output;

    match cli.command {
        Commands::Health => {
            let report = state.health_checker.run_health_check().await;
            output::print_health(&report, format)?;
            Ok(exit_code(report.is_healthy()))
        }
        Commands::Status => {
            let status = state.aggregator.comprehensive_status().await;
            output::print_status(&status, format)?;
            Ok(exit_code(status.overall <= OverallHealth::Warning))
        }
        Commands::Monitor => {
            run_monitor(&state).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tenant { command: TenantCommands::Create(args) } => {
            let request = TenantEnvironmentRequest {
                tenant_name: args.name,
                description: args.description,
                admin_user: args.admin_user,
                admin_password: args.admin_password,
                network_cidr: args.cidr,
                storage_quota_gb: args.quota_gb,
                create_router: !args.no_router,
                security_groups: !args.no_security_groups,
            };
            let cancel = cancel_on_signal();
            let result = state
                .orchestrator
                .create_tenant_environment_with_cancel(&request, &cancel)
                .await?;
            report_run(&result, format)
        }
        Commands::Vm { command: VmCommands::Create(args) } => {
            let qos = args.qos_port.zip(args.qos_kbps).map(|(port, max_kbps)| PortQos {
                port,
                limits: RateLimits { max_kbps, burst_kbps: None },
            });
            let request = VmWithStorageRequest {
                name: args.name,
                image: args.image,
                flavor: args.flavor,
                volume_size_gb: args.size_gb,
                volume_type: args.volume_type,
                attach_node: args.attach_node,
                qos,
            };
            let cancel = cancel_on_signal();
            let result = state
                .orchestrator
                .create_vm_with_storage_with_cancel(&request, &cancel)
                .await?;
            report_run(&result, format)
        }
        Commands::Network { command: NetworkCommands::Setup(args) } => {
            let request = NetworkSetupRequest {
                bridge_name: args.bridge,
                physical_iface: args.physical_iface,
                datapath_type: DatapathType::System,
                local_ip: args.local_ip,
                remote_ips: args.remote_ips,
                qos: args.qos,
            };
            let cancel = cancel_on_signal();
            let result = state
                .orchestrator
                .setup_network_with_cancel(&request, &cancel)
                .await?;
            report_run(&result, format)
        }
        Commands::Config { .. } => Ok(ExitCode::SUCCESS),
    }
}

/// Monitor loop in the background, stopped by SIGTERM/SIGINT
async fn run_monitor(state: &AppState) -> anyhow::Result<()> {
    let shutdown = ShutdownCoordinator::new();
    let monitor = Arc::new(state.health_monitor());

    let handle = {
        let monitor = monitor.clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move { monitor.run(rx).await })
    };

    info!("Monitoring, press Ctrl+C to stop");
    shutdown
        .wait_for_signal()
        .await
        .context("Failed to install signal handlers")?;
    shutdown.drain("health-monitor", handle).await;

    if let Some(report) = monitor.last_report().await {
        info!(runs = monitor.runs(), "Last report: {}", report.summary());
    }
    Ok(())
}

/// The first signal stops the run after the step in progress
fn cancel_on_signal() -> CancelToken {
    let token = CancelToken::new();
    let shutdown = ShutdownCoordinator::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        match shutdown.wait_for_signal().await {
            Ok(()) => cancel.cancel(),
            Err(e) => error!(error = %e, "Signal handling unavailable, run cannot be cancelled"),
        }
    });

    token
}

fn report_run(result: &ProvisioningResult, format: OutputFormat) -> anyhow::Result<ExitCode> {
    output::print_provisioning(result, format)?;
    Ok(exit_code(result.overall_status != OverallStatus::Failed))
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
