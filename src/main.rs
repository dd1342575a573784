//! Gridlog CLI
//!
//! Command-line interface for Gridlog operations:
//! - Log sensor readings
//! - Query stored data
//! - Run aggregation passes
//! - Generate a default config file

use chrono::Utc;
use clap::{Parser, Subcommand};
use gridlog::config::{generate_default_config, Config};
use gridlog::store::{build_store, Record, RecordCodec, StoreManager, Value};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gridlog")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sensor data logger with pluggable stores and incremental aggregation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (default: standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log one reading to the source store
    Log {
        /// Fields in name=value format; a time field is added when missing
        fields: Vec<String>,
    },

    /// Query the source store
    Query {
        /// Range start, any value the store understands
        start: String,
        /// Range end (default: now)
        stop: Option<String>,
        /// Query the aggregation target instead of the source
        #[arg(long)]
        target: bool,
    },

    /// Show first and last records of both stores
    Status,

    /// Run one aggregation pass
    Aggregate,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    init_logging(&config);
    tracing::info!("Gridlog v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Log { fields } => {
            let mut source = build_store(&config.source)?;
            let record = parse_record(&fields, source.index())?;
            source.put(vec![record]).await?;
            println!("logged 1 record to {}", config.source.location);
        }

        Commands::Query { start, stop, target } => {
            let opts = if target { &config.target } else { &config.source };
            let mut store = build_store(opts)?;
            let codec = RecordCodec::default();
            let start = codec.decode_value(&start, true);
            let stop = stop
                .map(|s| codec.decode_value(&s, true))
                .unwrap_or_else(|| Value::Time(Utc::now()));
            let records = store.get(&start, &stop).await?;
            print_records(&records);
        }

        Commands::Status => {
            let mut source = build_store(&config.source)?;
            let mut target = build_store(&config.target)?;
            print_status("source", &mut source).await;
            print_status("target", &mut target).await;
        }

        Commands::Aggregate => {
            let mut source = build_store(&config.source)?;
            let mut target = build_store(&config.target)?;
            let mut strategy = config.aggregation.build_strategy()?;
            let completed = strategy.process(&mut source, &mut target).await?;
            println!("completed {completed} blocks");
        }

        Commands::Config { output } => match output {
            Some(path) => {
                std::fs::write(&path, generate_default_config())?;
                println!("wrote config to {}", path.display());
            }
            None => print!("{}", generate_default_config()),
        },
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("gridlog={}", config.logging.level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Parse name=value pairs into a record, defaulting the index to now
fn parse_record(fields: &[String], index: &str) -> anyhow::Result<Record> {
    let codec = RecordCodec::default();
    let mut record = Record::new();
    for field in fields {
        let (name, cell) = field
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected name=value, got {field:?}"))?;
        let prevent_date = name == index;
        record = record.with(name, codec.decode_value(cell, prevent_date));
    }
    if record.get(index).is_none() {
        record = record.with(index, Value::Time(Utc::now()));
    }
    Ok(record)
}

fn print_records(records: &[Record]) {
    let codec = RecordCodec::default();
    for record in records {
        let line: Vec<String> = record
            .iter()
            .map(|(name, value)| format!("{name}={}", codec.encode_value(value)))
            .collect();
        println!("{}", line.join(" "));
    }
    println!("{} records", records.len());
}

async fn print_status(label: &str, store: &mut StoreManager) {
    match (store.get_first().await, store.get_last().await) {
        (Ok(first), Ok(last)) if !first.is_empty() && !last.is_empty() => {
            println!("{label} ({}):", store.location());
            print_records(&first);
            print_records(&last);
        }
        _ => println!("{label} ({}): empty", store.location()),
    }
}
