//! pipeline-ctl - operator CLI for the sensor phase pipeline
//!
//! # Usage
//!
//! ```bash
//! # Show the active phase
//! pipeline-ctl get
//!
//! # Switch phase (recorded with actor and reason)
//! pipeline-ctl set validated --by ops --reason "enable range checks"
//!
//! # Watch for phase changes made by other processes
//! pipeline-ctl monitor --interval 2
//!
//! # Peek at the sensor database
//! pipeline-ctl read-sensor --limit 5
//! ```
//!
//! # Environment Variables
//!
//! - `PIPELINE_CONFIG`: Path to a pipeline.toml (default: ./pipeline.toml)
//! - `PIPELINE_TYPE`: Initial phase hint, used until the first `set`
//! - `PIPELINE_CONFIG_DB` / `SENSOR_DB`: Database paths
//! - `RUST_LOG`: Logging level (default: info)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use sensor_pipeline::config::defaults;
use sensor_pipeline::{
    Phase, PhaseConfigRecord, PhaseStateStore, PipelineConfig, ReadOptions, SensorDataReader,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "pipeline-ctl")]
#[command(about = "Sensor pipeline phase control")]
#[command(version)]
struct CliArgs {
    /// Path to a pipeline.toml (overrides PIPELINE_CONFIG and ./pipeline.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Phase state database
    #[arg(long, global = true, value_name = "PATH")]
    config_db: Option<PathBuf>,

    /// Sensor database
    #[arg(long, global = true, value_name = "PATH")]
    sensor_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Show the active phase
    Get,
    /// Switch to a new phase
    Set {
        /// raw, schematized, validated, aggregated, anomaly or enriched
        phase: String,
        #[arg(long, default_value = "cli")]
        by: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Show phase change history
    History {
        #[arg(long, default_value_t = defaults::HISTORY_LIMIT)]
        limit: usize,
    },
    /// Show recorded pipeline executions
    Executions {
        #[arg(long, default_value_t = defaults::HISTORY_LIMIT)]
        limit: usize,
    },
    /// Poll the active phase and report changes until Ctrl+C
    Monitor {
        /// Poll interval in seconds
        #[arg(long, default_value_t = defaults::MONITOR_INTERVAL_SECS)]
        interval: u64,
    },
    /// Print the newest rows of the sensor table
    ReadSensor {
        #[arg(long, default_value_t = defaults::SENSOR_PREVIEW_LIMIT)]
        limit: usize,
    },
    /// List and describe the sensor database tables
    Tables,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    match args.command {
        Command::Get => {
            let current = open_store(&config)?.get_current_phase()?;
            print_phase(&current);
        }
        Command::Set { phase, by, reason } => {
            let phase: Phase = phase.parse()?;
            let store = open_store(&config)?;
            let record = store.set_phase(&phase, &by, reason.as_deref())?;
            println!("Phase set to '{}' by {}", record.phase, by);
        }
        Command::History { limit } => {
            let rows = open_store(&config)?.get_phase_history(Some(limit))?;
            if rows.is_empty() {
                println!("No phase history");
            }
            for row in rows {
                println!(
                    "{} {:<12} {:<8} by {:<12} {}",
                    row.created_at,
                    row.phase,
                    if row.is_active { "ACTIVE" } else { "" },
                    row.created_by.as_deref().unwrap_or("-"),
                    row.reason.as_deref().unwrap_or(""),
                );
            }
        }
        Command::Executions { limit } => {
            let rows = open_store(&config)?.get_execution_history(Some(limit))?;
            if rows.is_empty() {
                println!("No executions recorded");
            }
            for row in rows {
                println!(
                    "{} {:<12} {:>8} records -> {} {}",
                    row.created_at,
                    row.phase,
                    row.records_processed,
                    row.destinations.join(", "),
                    row.job_id.as_deref().unwrap_or(""),
                );
            }
        }
        Command::Monitor { interval } => {
            monitor(open_store(&config)?, Duration::from_secs(interval.max(1))).await?;
        }
        Command::ReadSensor { limit } => {
            let reader = open_reader(&config)?;
            let rows = reader.read(reader.table(), &ReadOptions::limit(limit))?;
            for row in rows {
                println!("{}", serde_json::to_string(&row)?);
            }
        }
        Command::Tables => {
            let reader = open_reader(&config)?;
            for table in reader.list_tables()? {
                let info = reader.describe_table(&table)?;
                println!("{} ({} rows)", info.table_name, info.row_count);
                for col in &info.columns {
                    println!(
                        "  {:<24} {:<10}{}{}",
                        col.name,
                        col.data_type,
                        if col.primary_key { " PRIMARY KEY" } else { "" },
                        if col.nullable { "" } else { " NOT NULL" },
                    );
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn load_config(args: &CliArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = PipelineConfig::load_from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config
        }
        None => PipelineConfig::load().context("loading pipeline config")?,
    };

    if let Some(path) = &args.config_db {
        config.state.path.clone_from(path);
    }
    if let Some(path) = &args.sensor_db {
        config.sensor.path.clone_from(path);
    }

    config
        .check_database_wiring()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid database configuration")?;
    Ok(config)
}

fn open_store(config: &PipelineConfig) -> Result<PhaseStateStore> {
    PhaseStateStore::open(config.state.clone(), config.retry.clone())
        .with_context(|| format!("opening phase store {}", config.state.path.display()))
}

fn open_reader(config: &PipelineConfig) -> Result<SensorDataReader> {
    SensorDataReader::open(config.sensor.clone(), config.retry.clone())
        .with_context(|| format!("opening sensor database {}", config.sensor.path.display()))
}

fn print_phase(record: &PhaseConfigRecord) {
    println!("Current phase: {}", record.phase);
    println!("  Source:     {}", record.source);
    println!("  Since:      {}", record.created_at);
    println!("  Changed by: {}", record.created_by.as_deref().unwrap_or("-"));
    if let Some(reason) = &record.reason {
        println!("  Reason:     {reason}");
    }
}

async fn monitor(store: PhaseStateStore, every: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(every);
    let mut last: Option<PhaseConfigRecord> = None;

    info!(path = %store.path().display(), interval_secs = every.as_secs(), "Monitoring phase changes (Ctrl+C to stop)");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let store = store.clone();
                let current = tokio::task::spawn_blocking(move || store.get_current_phase())
                    .await
                    .context("phase poll task failed")??;
                let changed = last
                    .as_ref()
                    .map_or(true, |prev| prev.phase != current.phase || prev.id != current.id);
                if changed {
                    print_phase(&current);
                    last = Some(current);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Monitor stopped");
                return Ok(());
            }
        }
    }
}
