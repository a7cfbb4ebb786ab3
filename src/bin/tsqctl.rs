//! Command-line front end for the tsquery select path.
//!
//! Loads configuration from (in precedence order): defaults, config file, environment
//! variables (`TSQ_*`), and CLI flags. Loads a JSON dataset into an in-memory partitioned
//! store, runs one select query and prints each resulting frame as a JSON line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tsquery::column::Column;
use tsquery::telemetry::{LogEventListener, MetricsReporter};
use tsquery::types::SampleValue;
use tsquery::{
    DataFrame, DbError, Encoding, FrameSet, InMemoryStorage, Labels, Querier, QuerierConfig,
    SelectParams,
};

// ---------- CLI ----------

/// Runs select queries against a JSON dataset.
#[derive(Parser, Debug)]
#[command(name = "tsqctl", version, about)]
pub struct Cli {
    /// Path to config file (TOML). If omitted, `tsqctl.toml` is loaded when present.
    #[arg(long, env = "TSQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not load any config file; use defaults + env + CLI only.
    #[arg(long, default_value_t = false)]
    pub no_config: bool,

    /// Load and validate config, print the effective values, then exit.
    #[arg(long, default_value_t = false)]
    pub validate_config: bool,

    /// Override the number of parallel partition readers.
    #[arg(long)]
    pub workers: Option<usize>,

    /// JSON dataset: an array of `{"metric", "labels", "samples": [[t, v], ...]}`.
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Width of one storage partition, in milliseconds.
    #[arg(long, default_value_t = 3_600_000)]
    pub partition_interval: i64,

    #[arg(long, default_value = "")]
    pub metric: String,

    #[arg(long, default_value_t = 0)]
    pub from: i64,

    #[arg(long, default_value_t = i64::MAX)]
    pub to: i64,

    /// Bucket width in milliseconds; 0 aggregates the whole range into one bucket.
    #[arg(long, default_value_t = 0)]
    pub step: i64,

    /// Comma-separated aggregation functions, e.g. `avg,max`.
    #[arg(long, default_value = "")]
    pub functions: String,

    /// Filter expression, e.g. `host=='a' and __name__=='cpu'`.
    #[arg(long, default_value = "")]
    pub filter: String,

    /// Trailing aggregation window in milliseconds.
    #[arg(long)]
    pub window: Vec<i64>,
}

// ---------- Dataset ----------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonSample {
    Float(f64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct JsonSeries {
    metric: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    samples: Vec<(i64, JsonSample)>,
}

fn load_dataset(path: &Path, partition_interval: i64) -> Result<InMemoryStorage, DbError> {
    let raw = std::fs::read_to_string(path)?;
    let dataset: Vec<JsonSeries> = serde_json::from_str(&raw)
        .map_err(|e| DbError::Configuration(format!("invalid dataset {}: {}", path.display(), e)))?;

    let storage = InMemoryStorage::new(partition_interval)?;
    for series in &dataset {
        let labels = Labels::from_pairs(series.labels.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let samples: Vec<(i64, SampleValue<'_>)> = series
            .samples
            .iter()
            .map(|(t, v)| match v {
                JsonSample::Float(f) => (*t, SampleValue::Float(*f)),
                JsonSample::Text(s) => (*t, SampleValue::Text(s.as_str())),
            })
            .collect();
        storage.append_batch(&series.metric, &labels, &samples)?;
    }
    log::info!(
        "loaded {} series into {} partitions",
        dataset.len(),
        storage.partition_count()
    );
    Ok(storage)
}

/// Load merged config. CLI overrides file/env.
fn load_config(cli: &Cli) -> Result<QuerierConfig, DbError> {
    let path = if cli.no_config {
        None
    } else {
        match &cli.config {
            Some(p) => Some(p.clone()),
            None => Some(PathBuf::from("tsqctl.toml")).filter(|p| p.exists()),
        }
    };
    let mut cfg = QuerierConfig::load(path.as_deref())?;
    if let Some(workers) = cli.workers {
        cfg.query_workers = workers;
    }
    cfg.validate()?;
    Ok(cfg)
}

// ---------- Output ----------

fn frame_to_json(frame: &DataFrame) -> Result<serde_json::Value, DbError> {
    let index = frame.index();
    let time: Vec<i64> = (0..index.len())
        .map(|i| index.time_at(i))
        .collect::<Result<_, _>>()?;

    let mut columns = serde_json::Map::new();
    let all = frame.columns().iter().chain(frame.count_column());
    for col in all {
        let values: Vec<serde_json::Value> = (0..col.len())
            .map(|i| -> Result<serde_json::Value, DbError> {
                Ok(match frame.encoding() {
                    Encoding::Var => serde_json::Value::from(col.string_at(i)?),
                    // NaN has no JSON form and serialises as null.
                    Encoding::Xor => serde_json::Value::from(col.float_at(i)?),
                })
            })
            .collect::<Result<_, _>>()?;
        columns.insert(col.spec().name(), serde_json::Value::Array(values));
    }

    Ok(serde_json::json!({
        "labels": frame.labels(),
        "time": time,
        "columns": columns,
    }))
}

fn print_frames(frames: &FrameSet) -> Result<(), DbError> {
    for frame in frames {
        println!("{}", frame_to_json(frame)?);
    }
    Ok(())
}

// ---------- Main ----------

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut cfg = load_config(&cli).map_err(|e| {
        eprintln!("config error: {}", e);
        e
    })?;

    if cli.validate_config {
        println!("query_workers={}", cfg.query_workers);
        println!("disable_client_aggr={}", cfg.disable_client_aggr);
        return Ok(());
    }

    let data = cli.data.as_ref().ok_or("--data is required unless --validate-config is given")?;
    let storage = Arc::new(load_dataset(data, cli.partition_interval).map_err(|e| {
        eprintln!("failed to load dataset: {}", e);
        e
    })?);

    cfg.event_listener = Arc::new(LogEventListener);
    cfg.reporter = Arc::new(MetricsReporter::new());
    let querier = Querier::new(storage.clone(), storage, cfg);

    let params = SelectParams {
        name: cli.metric.clone(),
        functions: cli.functions.clone(),
        from: cli.from,
        to: cli.to,
        step: cli.step,
        windows: cli.window.clone(),
        filter: cli.filter.clone(),
        requested_columns: None,
    };
    let frames = querier.select_data_frame(&params).map_err(|e| {
        eprintln!("query failed: {}", e);
        e
    })?;
    print_frames(&frames)?;
    Ok(())
}
