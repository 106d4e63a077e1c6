//! CLI for accrue accumulator configurations.
//!
//! Binds a configuration against the built-in producers, either once to
//! report what would tie (`check`) or repeatedly to print sampled values
//! (`watch`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use accrue::builtin::{MethodCallProducer, OsProducer};
use accrue::task::timestamp_ns;
use accrue::{BindingReport, MonitoringConfig, MonitoringContext, ProducerRegistry};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Id of the built-in method-call producer registered by the CLI.
const CALLS_PRODUCER_ID: &str = "Calls";

/// accrue: bind accumulators to live statistics.
#[derive(Parser)]
#[command(name = "accrue", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Bind a configuration once and print the binding report.
    Check {
        /// Path to the JSON configuration file.
        config: PathBuf,
    },

    /// Bind a configuration and print accumulator samples as they are taken.
    Watch {
        /// Path to the JSON configuration file.
        config: PathBuf,

        /// Number of ticks before exiting.
        #[arg(long, default_value = "10")]
        ticks: u32,

        /// Milliseconds between ticks (defaults to the configured tick interval).
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// List the built-in producers and their statistics.
    Producers,
}

/// Output format for samples.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON array of objects.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check { config } => cmd_check(&config),
        Commands::Watch {
            config,
            ticks,
            interval_ms,
            format,
        } => cmd_watch(&config, ticks, interval_ms, &format),
        Commands::Producers => cmd_producers(),
    };

    if let Err(e) = result {
        tracing::error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Registers the built-in producers with fresh OS values.
fn builtin_registry() -> (Arc<ProducerRegistry>, Arc<OsProducer>) {
    let registry = Arc::new(ProducerRegistry::new());
    let os = Arc::new(OsProducer::new());
    os.refresh();
    registry.register(os.clone());
    registry.register(Arc::new(MethodCallProducer::new(CALLS_PRODUCER_ID, "service")));
    (registry, os)
}

/// Implements `accrue check <config>`.
fn cmd_check(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = MonitoringConfig::load(config_path)?;
    let (registry, _os) = builtin_registry();
    let (_context, report) = MonitoringContext::bind(config, registry)?;

    print_report(config_path, &report);

    report.into_result()?;
    Ok(())
}

fn print_report(config_path: &Path, report: &BindingReport) {
    println!("Config: {}", config_path.display());
    println!("  Definitions: {}", report.total);
    println!("  Tied: {}", report.tied.len());
    for name in &report.tied {
        println!("    {name}");
    }
    println!("  Pending: {}", report.pending.len());
    for name in &report.pending {
        println!("    {name}");
    }
    println!("  Failed: {}", report.failures.len());
    for failure in &report.failures {
        println!("    {failure}");
    }
}

/// Implements `accrue watch <config>`.
fn cmd_watch(
    config_path: &Path,
    ticks: u32,
    interval_ms: Option<u64>,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = MonitoringConfig::load(config_path)?;
    let period = interval_ms.map_or_else(|| config.tick_interval(), Duration::from_millis);

    let (registry, os) = builtin_registry();
    let _updater = os.spawn_updater(period)?;
    let (context, report) = MonitoringContext::bind(config, registry)?;
    for failure in &report.failures {
        tracing::warn!("skipping accumulator: {failure}");
    }

    let repository = context.repository();
    let mut rows = Vec::new();

    if matches!(format, OutputFormat::Csv) {
        println!("accumulator,timestamp_ns,value");
    }

    for _ in 0..ticks {
        std::thread::sleep(period);
        for (name, sample) in repository.tick_all(timestamp_ns()) {
            match format {
                OutputFormat::Csv => println!("{name},{},{}", sample.timestamp, sample.value),
                OutputFormat::Json => rows.push(serde_json::json!({
                    "accumulator": name,
                    "timestamp_ns": sample.timestamp,
                    "value": sample.value,
                })),
            }
        }
    }

    if matches!(format, OutputFormat::Json) {
        let output = serde_json::json!({
            "config": config_path.display().to_string(),
            "ticks": ticks,
            "count": rows.len(),
            "data": rows,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    Ok(())
}

/// Implements `accrue producers`.
fn cmd_producers() -> Result<(), Box<dyn std::error::Error>> {
    let (registry, _os) = builtin_registry();

    for producer in registry.list() {
        println!(
            "{} (category={}, subsystem={}, kind={:?})",
            producer.id(),
            producer.category(),
            producer.subsystem(),
            producer.kind()
        );
        for statistic in producer.statistics() {
            println!("  {}: {}", statistic.name(), statistic.value_names().join(", "));
        }
    }

    Ok(())
}
