///! Output formatting for the CLI
///!
///! Every command prints either a table or the raw JSON document, so scripts
///! can consume exactly what the library returns.

use crate::monitor::{ComprehensiveStatus, OverallHealth};
use cee_common::{HealthCheckReport, OverallStatus, ProvisioningResult, StepStatus};
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Tabled)]
struct StepRow {
    step: String,
    status: String,
    #[tabled(rename = "resource id")]
    resource_id: String,
    attempts: u32,
    #[tabled(rename = "duration")]
    duration: String,
    error: String,
}

#[derive(Tabled)]
struct CheckRow {
    check: String,
    result: String,
    #[tabled(rename = "latency")]
    latency: String,
    detail: String,
}

pub fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    println!("{}", json);
    Ok(())
}

pub fn print_provisioning(result: &ProvisioningResult, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(result);
    }

    let rows: Vec<StepRow> = result
        .steps
        .iter()
        .map(|s| StepRow {
            step: s.step_name.clone(),
            status: match s.status {
                StepStatus::Ok => "ok".green().to_string(),
                StepStatus::Failed => "failed".red().to_string(),
                StepStatus::Skipped => "skipped".yellow().to_string(),
            },
            resource_id: s.resource_id.clone().unwrap_or_default(),
            attempts: s.attempts,
            duration: format_millis(s.duration_ms),
            error: s.error_detail.clone().unwrap_or_default(),
        })
        .collect();

    println!("{}", Table::new(rows));

    let headline = format!("{} run {}", result.workflow, result.run_id);
    match result.overall_status {
        OverallStatus::Success => print_success(&format!("{}: success", headline)),
        OverallStatus::Partial => print_warning(&format!("{}: partial", headline)),
        OverallStatus::Failed => print_error(&format!("{}: failed", headline)),
    }
    if result.cancelled {
        print_warning("Run was cancelled before all steps executed");
    }
    Ok(())
}

pub fn print_health(report: &HealthCheckReport, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }

    let rows: Vec<CheckRow> = report
        .checks
        .iter()
        .map(|(name, check)| CheckRow {
            check: name.clone(),
            result: if check.passed {
                "pass".green().to_string()
            } else {
                "fail".red().to_string()
            },
            latency: format_millis(check.latency_ms),
            detail: check.detail.clone(),
        })
        .collect();

    println!("{}", Table::new(rows));

    if report.is_healthy() {
        print_success(&format!("{} checks passed", report.passed_count));
    } else {
        print_error(&format!(
            "{} of {} checks failed",
            report.failed_count,
            report.checks.len()
        ));
    }
    Ok(())
}

pub fn print_status(status: &ComprehensiveStatus, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(status);
    }

    let overall = match status.overall {
        OverallHealth::Healthy => "healthy".green().bold(),
        OverallHealth::Warning => "warning".yellow().bold(),
        OverallHealth::Critical => "critical".red().bold(),
        OverallHealth::Error => "error".red().bold(),
    };
    println!("Cluster status: {} ({})", overall, status.timestamp.to_rfc3339());

    for alert in &status.alerts {
        print_warning(alert);
    }
    for recommendation in &status.recommendations {
        print_info(recommendation);
    }
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Format milliseconds as "850ms", "12.4s" or "3m 5s"
pub fn format_millis(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let secs = ms / 1000;
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(850), "850ms");
        assert_eq!(format_millis(12_400), "12.4s");
        assert_eq!(format_millis(185_000), "3m 5s");
    }
}
