//! ADF Logs CLI - inspect a pipeline run export from the terminal
//!
//! Usage:
//!   adf-logs <file.csv> [--failed] [--dashboard] [--diagnose <KEY|N>]
//!
//! Example:
//!   adf-logs runs.csv --failed
//!   adf-logs runs.csv --failed --diagnose 2
//!   adf-logs runs.csv --dashboard

use adf_logs::dashboard::DashboardSummary;
use adf_logs::diagnosis::{DiagnosisRequest, DiagnosisSlot, DiagnosisState};
use adf_logs::provider;
use adf_logs::{
    filter_failures, AppConfig, Diagnoser, FailedPipelineKey, FailureSelector, FilteredLogs,
    LogTable,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "adf-logs", version, about = "Filter, summarize and diagnose ADF pipeline runs")]
struct CliArgs {
    /// CSV export of pipeline runs
    file: PathBuf,

    /// Show only failed runs
    #[arg(short, long)]
    failed: bool,

    /// Print the dashboard summary
    #[arg(short, long)]
    dashboard: bool,

    /// Ask the LLM about a failed run: a pipeline key or its number in the list
    #[arg(long, value_name = "KEY|N")]
    diagnose: Option<String>,

    /// Maximum number of rows to print
    #[arg(short = 'n', long, default_value_t = 50)]
    limit: usize,

    /// Path to a TOML config file
    #[arg(short, long, env = "ADF_LOGS_CONFIG")]
    config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn truncate(s: &str, max: usize) -> String {
    let flat = s.replace(['\n', '\r'], " ");
    if flat.chars().count() > max {
        let head: String = flat.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        flat
    }
}

fn print_header(args: &CliArgs, table: &LogTable) {
    eprintln!();
    eprintln!(
        "{}",
        "╭──────────────────────────────────────────────────────────────╮".blue()
    );
    eprintln!("{}  {}", "│".blue(), "ADF Logs Viewer".bold());
    eprintln!(
        "{}",
        "├──────────────────────────────────────────────────────────────┤".blue()
    );
    eprintln!("{}  {}    {}", "│".blue(), "File:".dimmed(), args.file.display());
    eprintln!(
        "{}  {}    {} runs, {} columns",
        "│".blue(),
        "Rows:".dimmed(),
        table.len(),
        table.headers().len()
    );
    eprintln!(
        "{}",
        "╰──────────────────────────────────────────────────────────────╯".blue()
    );
    eprintln!();
}

fn print_logs(view: &FilteredLogs<'_>, limit: usize) {
    let title = if view.failures_only {
        "Failed Pipeline Runs"
    } else {
        "Pipeline Execution Logs"
    };
    eprintln!("{} ({})", title.bold(), view.len());

    for record in view.records.iter().take(limit) {
        let status = record.status.as_deref().unwrap_or("-");
        let status = if record.is_failed() {
            status.red()
        } else if status.eq_ignore_ascii_case("succeeded") {
            status.green()
        } else {
            status.yellow()
        };
        println!(
            "{:>5}  {:<32} {:<24} {:<12} {}",
            record.row + 1,
            truncate(record.pipeline_name.as_deref().unwrap_or("-"), 32),
            truncate(record.run_start_raw.as_deref().unwrap_or("-"), 24),
            status,
            truncate(record.error.as_deref().unwrap_or(""), 60).dimmed()
        );
    }
    if view.len() > limit {
        eprintln!("{}", format!("... {} more rows", view.len() - limit).dimmed());
    }
    eprintln!();
}

fn print_keys(selector: &FailureSelector<'_>) {
    eprintln!("{}", "Failed runs available for diagnosis:".bold());
    for (i, key) in selector.keys().iter().enumerate() {
        let marker = if selector.is_ambiguous(key) {
            " (duplicate key, first match is used)".yellow().to_string()
        } else {
            String::new()
        };
        eprintln!("  {:>3}. {}{}", i + 1, key, marker);
    }
    eprintln!();
}

fn print_dashboard(summary: &DashboardSummary) {
    eprintln!("{}", "Key Metrics".bold());
    eprintln!(
        "  {} {}   {} {}   {} {}   {} {}",
        "Succeeded:".green(),
        summary.counts.succeeded,
        "Failed:".red(),
        summary.counts.failed,
        "In Progress:".yellow(),
        summary.counts.in_progress,
        "Queued:".cyan(),
        summary.counts.queued
    );
    eprintln!();

    eprintln!("{}", "Pipeline Run Status".bold());
    for share in &summary.distribution {
        let pct = share.count as f64 * 100.0 / summary.total_runs.max(1) as f64;
        eprintln!("  {:<20} {:>6} ({:.1}%)", share.status, share.count, pct);
    }
    eprintln!();

    eprintln!("{}", "Top Failing Pipelines".bold());
    let max = summary.top_failing.first().map(|p| p.failures).unwrap_or(1);
    for entry in &summary.top_failing {
        let width = (entry.failures * 30).div_ceil(max.max(1));
        eprintln!(
            "  {:<32} {:>4} {}",
            truncate(&entry.pipeline, 32),
            entry.failures,
            "█".repeat(width).red()
        );
    }
    if summary.top_failing.is_empty() {
        eprintln!("  {}", "No failed runs".dimmed());
    }
    eprintln!();

    if let Some(days) = &summary.daily_runs {
        eprintln!("{}", "Daily Pipeline Runs".bold());
        for day in days {
            eprintln!("  {}  {:>5}", day.date, day.runs);
        }
        eprintln!();
    }
}

/// Match by full key, or by 1-based position in the key list
fn pick_key(selector: &FailureSelector<'_>, wanted: &str) -> Option<FailedPipelineKey> {
    let keys = selector.keys();
    if let Ok(n) = wanted.trim().parse::<usize>() {
        if n >= 1 && n <= keys.len() {
            return Some(keys[n - 1].clone());
        }
    }
    let key = FailedPipelineKey::from(wanted);
    selector.resolve(&key).map(|_| key)
}

async fn run_diagnosis(diagnoser: Diagnoser, request: DiagnosisRequest) -> DiagnosisState {
    let mut slot = DiagnosisSlot::new();
    slot.start(diagnoser, request);
    let Some(watcher) = slot.watcher() else {
        return slot.state();
    };

    let wait = watcher.wait();
    tokio::pin!(wait);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    eprint!("{}", "Thinking".dimmed());
    loop {
        tokio::select! {
            state = &mut wait => {
                eprintln!();
                return state;
            }
            _ = tokio::signal::ctrl_c() => {
                slot.cancel();
                eprintln!();
                return slot.state();
            }
            _ = ticker.tick() => {
                eprint!("{}", ".".dimmed());
                let _ = std::io::stderr().flush();
            }
        }
    }
}

/// Process status for a finished diagnosis; 130 mirrors an interrupted shell command
fn exit_status(state: &DiagnosisState) -> u8 {
    match state {
        DiagnosisState::Failed { .. } => 1,
        DiagnosisState::Cancelled { .. } => 130,
        DiagnosisState::Idle | DiagnosisState::Pending { .. } | DiagnosisState::Succeeded { .. } => 0,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = CliArgs::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let table = LogTable::from_path(&args.file, &config.columns)
        .with_context(|| format!("Failed to load CSV: {}", args.file.display()))?;

    print_header(&args, &table);

    // --diagnose implies the failed-only view, where keys are offered
    let failed_only = args.failed || args.diagnose.is_some();
    let view = filter_failures(&table, failed_only);
    if let Some(warning) = &view.warning {
        eprintln!("{} {}", "Warning:".yellow().bold(), warning);
    }
    print_logs(&view, args.limit);

    let selector = match FailureSelector::new(&view, table.schema()) {
        Ok(selector) => selector,
        Err(missing) => {
            eprintln!("{} {}", "Warning:".yellow().bold(), missing);
            None
        }
    };
    if let Some(selector) = &selector {
        print_keys(selector);
    }

    if args.dashboard {
        match DashboardSummary::compute(&table, config.dashboard.top_failing) {
            Ok(summary) => print_dashboard(&summary),
            Err(missing) => eprintln!("{} {}", "Warning:".yellow().bold(), missing),
        }
    }

    let Some(wanted) = &args.diagnose else {
        return Ok(ExitCode::SUCCESS);
    };
    let Some(selector) = &selector else {
        bail!("No failed runs to diagnose");
    };
    let Some(key) = pick_key(selector, wanted) else {
        bail!("No failed run matches '{}'", wanted);
    };
    let Some(record) = selector.resolve(&key) else {
        bail!("No failed run matches '{}'", wanted);
    };

    let request = match DiagnosisRequest::prepare(key, record.error.as_deref()) {
        Ok(request) => request,
        Err(notice) => {
            eprintln!("{} {}", "Info:".blue().bold(), notice);
            return Ok(ExitCode::SUCCESS);
        }
    };

    let provider = provider::from_config(&config.provider).context("LLM provider unavailable")?;
    let diagnoser = Diagnoser::new(provider, config.diagnosis.clone());

    let state = run_diagnosis(diagnoser, request).await;
    match &state {
        DiagnosisState::Succeeded { response } => {
            eprintln!("{}", "AI Suggestions".bold());
            eprintln!(
                "{}",
                "════════════════════════════════════════════════════════════════".green()
            );
            println!("{}", response.text);
            eprintln!(
                "{}",
                "════════════════════════════════════════════════════════════════".green()
            );
        }
        DiagnosisState::Failed { message, .. } => {
            eprintln!("{} {}", "Error:".red().bold(), message);
        }
        DiagnosisState::Cancelled { .. } => {
            eprintln!("{}", "Diagnosis cancelled".yellow());
        }
        DiagnosisState::Idle | DiagnosisState::Pending { .. } => {}
    }
    Ok(ExitCode::from(exit_status(&state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use adf_logs::diagnosis::DiagnosisResponse;

    #[test]
    fn test_exit_status() {
        let key = FailedPipelineKey::from("copy_sales - 6/10/2025, 5:03:19 PM");
        let response = DiagnosisResponse {
            key: key.clone(),
            text: "Check the path".to_string(),
            usage: None,
            duration_ms: None,
        };

        assert_eq!(exit_status(&DiagnosisState::Succeeded { response }), 0);
        assert_eq!(
            exit_status(&DiagnosisState::Failed {
                key: key.clone(),
                message: "quota exceeded".to_string(),
            }),
            1
        );
        assert_eq!(exit_status(&DiagnosisState::Cancelled { key }), 130);
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééé", 5), "éé...");
        assert_eq!(truncate("line one\nline two", 40), "line one line two");
    }
}
