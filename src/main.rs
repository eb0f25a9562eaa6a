use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use epiflux::aggregate::{derive_channels, AxisSet, ChannelKind, CounterTensor, PointSeries};
use epiflux::aggregate::sparse::constant_points;
use epiflux::config::Config;
use epiflux::export::{push, PushOptions};
use epiflux::influx::{Client, FieldValue, Point};
use epiflux::model::{bin_by_date, EventRecord};

/// Aggregates daily event records and exports derived counters to InfluxDB.
#[derive(Parser)]
#[command(name = "epiflux", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the newline-delimited JSON event records.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("epiflux {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;
    let input_path = cli
        .input
        .context("--input is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting epiflux");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg, input_path))
}

/// Reads NDJSON event records, checking each against the configured
/// record shape.
fn load_records(path: &PathBuf, cfg: &Config) -> Result<Vec<EventRecord>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading records from {}", path.display()))?;

    let axis_count = cfg.input.axis_labels.len();
    let channel_count = cfg.input.channel_labels.len();

    let mut records = Vec::new();
    for (number, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let record: EventRecord = serde_json::from_str(line)
            .with_context(|| format!("parsing record on line {}", number + 1))?;

        if record.axes.len() != axis_count {
            bail!(
                "record on line {} has {} axis values, expected {axis_count}",
                number + 1,
                record.axes.len()
            );
        }
        if record.values.len() != channel_count {
            bail!(
                "record on line {} has {} channel values, expected {channel_count}",
                number + 1,
                record.values.len()
            );
        }

        records.push(record);
    }

    if records.is_empty() {
        bail!("no records found in {}", path.display());
    }

    Ok(records)
}

async fn run(cfg: Config, input_path: PathBuf) -> Result<()> {
    let records = load_records(&input_path, &cfg)?;
    tracing::info!(records = records.len(), "loaded event records");

    // One shared coordinate space for the tensor and the sparsifier.
    let axes = Arc::new(AxisSet::from_records(
        &records,
        cfg.input.axis_labels.len(),
        |r: &EventRecord| r.axes.iter().map(String::as_str).collect(),
    )?);

    let bins = bin_by_date(records);
    let first_date = *bins.keys().next().expect("records are non-empty");
    let last_date = *bins.keys().next_back().expect("records are non-empty");

    let mut tensor = CounterTensor::new(
        axes,
        first_date,
        last_date,
        cfg.input.channel_labels.len(),
    )?;
    for (date, day_records) in &bins {
        for record in day_records {
            let coords: Vec<&str> = record.axes.iter().map(String::as_str).collect();
            for (channel, amount) in record.values.iter().enumerate() {
                if *amount != 0.0 {
                    tensor.accumulate(*date, &coords, channel, *amount)?;
                }
            }
        }
        tracing::debug!(%date, "accumulated day");
    }
    drop(bins);

    // Sum out any axes the run does not want to publish.
    let mut tag_labels = cfg.input.axis_labels.clone();
    for label in &cfg.export.collapse_axes {
        let axis = tag_labels
            .iter()
            .position(|l| l == label)
            .expect("validated against axis_labels");
        tensor = tensor.sum_axis(axis);
        tag_labels.remove(axis);
    }

    let kind = if cfg.input.cumulative {
        ChannelKind::Cumulative
    } else {
        ChannelKind::Incremental
    };

    tracing::info!(
        days = tensor.days(),
        coordinates = tensor.axes().cardinality(),
        "deriving metrics",
    );
    let derived = derive_channels(&tensor, kind);

    let series = PointSeries::new(
        &derived,
        cfg.export.measurement.clone(),
        tag_labels,
        cfg.derived_field_labels(),
    )?;

    let overlay_templates: Vec<Point> = cfg
        .export
        .overlays
        .iter()
        .map(|overlay| Point {
            measurement: cfg.export.measurement.clone(),
            tags: overlay.tags.clone(),
            fields: overlay
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::Integer(*v)))
                .collect(),
            timestamp: Default::default(),
            ns_part: 0,
        })
        .collect();

    let expected_total = series.dense_len() + overlay_templates.len() * derived.days();
    let overlays = constant_points(overlay_templates, derived.first_date(), derived.days());

    let client = Client::new(&cfg.influx.url, cfg.influx.auth.clone(), cfg.influx.timeout)?;
    let opts = PushOptions {
        database: cfg.influx.database.clone(),
        retention_policy: cfg.influx.retention_policy.clone(),
        precision: cfg.influx.precision,
        batch_size: cfg.influx.batch_size,
        chunk_size: cfg.influx.chunk_size,
    };

    let sent = push(&client, &opts, series.chain(overlays), expected_total).await?;

    tracing::info!(sent, "epiflux finished");

    Ok(())
}
