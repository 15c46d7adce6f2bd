use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dropsweep_kernel::cleanup::{run_cleanup, CleanupReport, TableStatus};
use dropsweep_kernel::config::{CleanupConfig, OutputFormat};
use dropsweep_kernel::execute::Outcome;

mod catalog;
mod storage;

use catalog::NessieClient;
use storage::ObjectStoreStorage;

/// Dropsweep: remove storage left behind by dropped catalog tables
#[derive(Parser, Debug)]
#[command(name = "dropsweep")]
#[command(about = "Delete storage directories of tables recently dropped from the catalog", long_about = None)]
struct Cli {
    /// Path to the JSON run configuration
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

/// Wrapper for JSON output
#[derive(Debug, Serialize)]
struct CliOutput<'a> {
    days: u32,
    storage_root: &'a str,
    report: &'a CleanupReport,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // ----------------------------
    // Load configuration
    // ----------------------------
    let config = CleanupConfig::load(&cli.config)?;
    tracing::debug!(?config, "loaded configuration");

    // ----------------------------
    // Catalog and storage backends
    // ----------------------------
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let catalog = NessieClient::new(&config, runtime.handle().clone())?;
    let storage = ObjectStoreStorage::from_root(&config.storage_root, runtime.handle().clone())?;

    // ----------------------------
    // Run cleanup
    // ----------------------------
    let report = run_cleanup(&config, &catalog, &storage, Utc::now())?;

    // ----------------------------
    // Output
    // ----------------------------
    match config.output {
        OutputFormat::Json => {
            let output = CliOutput {
                days: config.days,
                storage_root: config.storage_root.as_str(),
                report: &report,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => print_summary(&config, &report),
    }

    if report.all_failed() {
        anyhow::bail!("all {} deletion directives failed", report.results.len());
    }

    Ok(())
}

fn print_summary(config: &CleanupConfig, report: &CleanupReport) {
    let mode = if report.dry_run { " (dry-run)" } else { "" };
    println!(
        "Cleaning up storage under {} for tables dropped in the last {} days (since {} UTC){mode}:",
        config.storage_root,
        config.days,
        report.since.format("%Y-%m-%dT%H:%M:%SZ"),
    );

    if report.tables.is_empty() {
        println!("  no dropped tables found");
    }

    for table in &report.tables {
        println!(
            " - Table: {} (dropped {} in {})",
            table.drop.table,
            table.drop.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
            table.drop.commit_id,
        );
        let marker = match table.status {
            TableStatus::Failed { .. } => "!!",
            _ => "  ",
        };
        println!("   {marker} {}", table.status);
    }

    println!(
        "Summary: {} simulated, {} deleted, {} failed, {} skipped",
        report.count(Outcome::Simulated),
        report.count(Outcome::Deleted),
        report.count(Outcome::Failed),
        report.skipped(),
    );

    for failure in report.failures() {
        println!(
            "  failed: {} ({})",
            failure.directive.prefix, failure.detail
        );
    }
}
