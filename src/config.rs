use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::influx::{Auth, Precision};

/// Top-level configuration for one export run.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Input record shape.
    pub input: InputConfig,

    /// Exported series configuration.
    pub export: ExportConfig,

    /// InfluxDB destination configuration.
    pub influx: InfluxConfig,
}

/// Shape of the incoming event records.
#[derive(Debug, Default, Deserialize)]
pub struct InputConfig {
    /// Tag name per categorical axis, in record order.
    pub axis_labels: Vec<String>,

    /// Name per metric channel, in record order.
    pub channel_labels: Vec<String>,

    /// Whether the channels already hold running totals rather than
    /// per-day increments. Default: false.
    #[serde(default)]
    pub cumulative: bool,
}

/// Exported series configuration.
#[derive(Debug, Default, Deserialize)]
pub struct ExportConfig {
    /// Destination measurement name.
    pub measurement: String,

    /// Axis labels summed out of the tensor before export.
    #[serde(default)]
    pub collapse_axes: Vec<String>,

    /// Constant-valued overlay points repeated for every exported day.
    #[serde(default)]
    pub overlays: Vec<OverlayConfig>,
}

/// One constant overlay series (e.g. a per-district population count).
#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    /// Tag pairs, in emission order.
    pub tags: Vec<(String, String)>,

    /// Integer field pairs, in emission order.
    pub fields: Vec<(String, i64)>,
}

/// InfluxDB destination configuration.
#[derive(Debug, Deserialize)]
pub struct InfluxConfig {
    /// API base URL (e.g. "http://localhost:8086").
    pub url: String,

    /// Target database.
    pub database: String,

    /// Optional retention policy.
    #[serde(default)]
    pub retention_policy: Option<String>,

    /// Wire timestamp precision. Default: seconds (points are
    /// day-granular).
    #[serde(default = "default_precision")]
    pub precision: Precision,

    /// Request authentication. Default: none.
    #[serde(default)]
    pub auth: Auth,

    /// Points per HTTP request. Default: 10000.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Points per streamed body chunk. Default: 1000.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Request timeout. Default: 30s.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            database: String::new(),
            retention_policy: None,
            precision: default_precision(),
            auth: Auth::None,
            batch_size: default_batch_size(),
            chunk_size: default_chunk_size(),
            timeout: default_timeout(),
        }
    }
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_precision() -> Precision {
    Precision::Seconds
}

fn default_batch_size() -> usize {
    10000
}

fn default_chunk_size() -> usize {
    1000
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.influx.url.is_empty() {
            bail!("influx.url is required");
        }

        if self.influx.database.is_empty() {
            bail!("influx.database is required");
        }

        if self.influx.batch_size == 0 {
            bail!("influx.batch_size must be positive");
        }

        if self.influx.chunk_size == 0 {
            bail!("influx.chunk_size must be positive");
        }

        if self.export.measurement.is_empty() {
            bail!("export.measurement is required");
        }

        if self.input.axis_labels.is_empty() {
            bail!("input.axis_labels must name at least one axis");
        }

        if self.input.channel_labels.is_empty() {
            bail!("input.channel_labels must name at least one channel");
        }

        let mut seen = HashSet::new();
        for label in &self.input.axis_labels {
            if !seen.insert(label.as_str()) {
                bail!("duplicate axis label: {label}");
            }
        }

        let axis_labels: HashSet<&str> =
            self.input.axis_labels.iter().map(String::as_str).collect();
        for label in &self.export.collapse_axes {
            if !axis_labels.contains(label.as_str()) {
                bail!("unknown axis label in export.collapse_axes: {label}");
            }
        }

        Ok(())
    }

    /// Field labels of the derived tensor, interleaved to match its
    /// channel layout: for every input channel `<l>`, the four derived
    /// series `c<l>`, `d1<l>`, `d7<l>`, `d7<l>_s7` in order.
    pub fn derived_field_labels(&self) -> Vec<String> {
        self.input
            .channel_labels
            .iter()
            .flat_map(|l| {
                [
                    format!("c{l}"),
                    format!("d1{l}"),
                    format!("d7{l}"),
                    format!("d7{l}_s7"),
                ]
            })
            .collect()
    }
}
