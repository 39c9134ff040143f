//! attrstore command-line tool
//!
//! Loads JSON-lines records into a store and reports storage statistics.
//!
//! # Examples
//!
//! ```bash
//! # Bulk-import records through the data pump
//! attrstore load events.jsonl --pump
//!
//! # Same records into the ordered store
//! attrstore load events.jsonl --ordered
//!
//! # Synthetic events, compressed, then stats
//! attrstore stats --events 100000
//! ```
//!
//! Each input line is one owner:
//!
//! ```json
//! {"kind": "event", "attributes": {"concept:name": "A", "time:timestamp": "2020-01-01T00:00:00Z", "cost": 3}}
//! ```

use anyhow::{bail, Context};
use attrstore::{
    Attribute, AttributeMap, BTreeBackend, InMemoryStore, OrderedStore, OwnerKind, PumpService,
    StoreConfig,
};
use chrono::DateTime;
use clap::{Args, Parser, Subcommand};
use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// attrstore - columnar attribute storage
#[derive(Parser, Debug)]
#[command(name = "attrstore")]
#[command(version = attrstore::VERSION)]
#[command(about = "Columnar attribute storage for event, trace and log records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Store configuration file (TOML)
    #[arg(long, global = true, env = "ATTRSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true, env = "ATTRSTORE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import JSON-lines records and print store statistics
    Load(LoadArgs),

    /// Fill a store with synthetic events and print statistics
    Stats(StatsArgs),

    /// Show version
    Version,
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// JSON-lines input, one owner per line
    input: PathBuf,

    /// Import through the data pump instead of per-attribute puts
    #[arg(long)]
    pump: bool,

    /// Use the ordered (composite-key) store; always pumps
    #[arg(long)]
    ordered: bool,
}

#[derive(Args, Debug)]
struct StatsArgs {
    /// Number of synthetic events
    #[arg(long, default_value = "10000")]
    events: usize,

    /// Distinct activity names
    #[arg(long, default_value = "20")]
    activities: usize,
}

/// One input line
#[derive(Deserialize, Debug)]
struct Record {
    #[serde(default = "default_kind")]
    kind: String,
    #[serde(default)]
    attributes: Map<String, Value>,
}

fn default_kind() -> String {
    "event".to_string()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli)?;

    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };

    match cli.command {
        Commands::Load(args) => load_command(config, args),
        Commands::Stats(args) => stats_command(config, args),
        Commands::Version => {
            println!("attrstore {}", attrstore::VERSION);
            Ok(())
        }
    }
}

/// Console logging to stderr, plus optional rolling files
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let file_layer = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "attrstore.log");
            Some(fmt::layer().with_writer(appender).with_ansi(false))
        }
        None => None,
    };

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(file_layer)
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

fn owner_kind(kind: &str) -> anyhow::Result<OwnerKind> {
    Ok(match kind {
        "log" => OwnerKind::Log,
        "trace" => OwnerKind::Trace,
        "event" => OwnerKind::Event,
        "alignment-event" => OwnerKind::AlignmentEvent,
        other => bail!("unknown owner kind '{}'", other),
    })
}

/// Map a JSON value onto the closest attribute kind
///
/// Strings under `time:` keys that parse as RFC 3339 become timestamps;
/// objects become containers and arrays become lists of their elements.
fn to_attribute(key: &str, value: &Value) -> anyhow::Result<Attribute> {
    Ok(match value {
        Value::Bool(b) => Attribute::boolean(key, *b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Attribute::discrete(key, i),
            None => Attribute::continuous(key, n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) if key.starts_with("time:") => match DateTime::parse_from_rfc3339(s) {
            Ok(ts) => Attribute::timestamp_millis(key, ts.timestamp_millis()),
            Err(_) => Attribute::literal(key, s.as_str()),
        },
        Value::String(s) => Attribute::literal(key, s.as_str()),
        Value::Array(items) => Attribute::list(
            key,
            items
                .iter()
                .enumerate()
                .map(|(i, item)| to_attribute(&i.to_string(), item))
                .collect::<anyhow::Result<_>>()?,
        ),
        Value::Object(fields) => Attribute::container(key, to_attributes(fields)?),
        Value::Null => bail!("attribute '{}' is null", key),
    })
}

fn to_attributes(fields: &Map<String, Value>) -> anyhow::Result<Vec<Attribute>> {
    fields.iter().map(|(k, v)| to_attribute(k, v)).collect()
}

fn read_records(path: &PathBuf) -> anyhow::Result<Vec<(OwnerKind, Vec<Attribute>)>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", path.display(), number + 1))?;
        records.push((owner_kind(&record.kind)?, to_attributes(&record.attributes)?));
    }
    Ok(records)
}

fn load_command(config: StoreConfig, args: LoadArgs) -> anyhow::Result<()> {
    let records = read_records(&args.input)?;
    info!(owners = records.len(), input = %args.input.display(), "Read records");
    let started = Instant::now();

    let stats = if args.ordered {
        let store = OrderedStore::new(BTreeBackend::new())?;
        let owners: Vec<_> = records.iter().map(|(kind, _)| store.new_owner(*kind)).collect();
        let mut pump = store.start_pump()?;
        for (owner, (_, attributes)) in owners.iter().zip(records) {
            pump.pump_attributes(owner, attributes)?;
        }
        pump.finish_pump()?;
        store.commit()?;
        serde_json::to_string_pretty(&store.stats())?
    } else {
        let store = InMemoryStore::with_config(config)?;
        let owners: Vec<_> = records.iter().map(|(kind, _)| store.new_owner(*kind)).collect();
        if args.pump {
            let mut pump = store.start_pump()?;
            for (owner, (_, attributes)) in owners.iter().zip(records) {
                pump.pump_attributes(owner, attributes)?;
            }
            pump.finish_pump()?;
        } else {
            for (owner, (_, attributes)) in owners.iter().zip(records) {
                store.attributes(owner)?.put_all(attributes)?;
            }
            store.commit()?;
        }
        let stats = serde_json::to_string_pretty(&store.stats())?;
        store.dispose()?;
        stats
    };

    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Load finished");
    println!("{}", stats);
    Ok(())
}

fn stats_command(config: StoreConfig, args: StatsArgs) -> anyhow::Result<()> {
    let store = InMemoryStore::with_config(config)?;
    let mut rng = rand::thread_rng();
    let start = chrono::Utc::now().timestamp_millis();

    let mut pump = store.start_pump()?;
    for i in 0..args.events {
        let event = store.new_owner(OwnerKind::Event);
        let activity = rng.gen_range(0..args.activities.max(1));
        pump.pump_attributes(
            &event,
            vec![
                Attribute::literal("concept:name", format!("activity-{}", activity)),
                Attribute::timestamp_millis("time:timestamp", start + i as i64 * 1000),
                Attribute::literal("org:resource", format!("resource-{}", rng.gen_range(0..8))),
                Attribute::continuous("cost", rng.gen_range(0.0..100.0)),
                Attribute::boolean("rework", rng.gen_bool(0.1)),
            ],
        )?;
    }
    pump.finish_pump()?;

    let compressed = store.compress_all()?;
    let stats = store.stats();
    info!(
        compressed,
        saved_percent = format!("{:.1}", stats.compression.saved_percent),
        "Compressed blocks"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    store.dispose()?;
    Ok(())
}
