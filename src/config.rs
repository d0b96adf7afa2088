use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub checkpoint: CheckpointConfig,
    pub window: WindowConfig,
    pub pipeline: PipelineConfig,
    pub transform: TransformConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub path: String,
    /// Measurements to extract. Empty = everything in the window.
    #[serde(default)]
    pub measurements: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Reference zone for "the previous calendar day" (e.g. "Europe/Berlin").
    pub timezone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Max records per chunk (timestamp boundaries may push a chunk past this).
    pub chunk_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Per-call timeout for source/sink I/O, distinct from the retry policy.
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,
    /// How many error samples a RunResult retains (the total is always counted).
    #[serde(default = "default_error_sample_limit")]
    pub error_sample_limit: usize,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_op_timeout_secs() -> u64 {
    30
}

fn default_error_sample_limit() -> usize {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    /// Version tag stamped on every output point.
    pub version: String,
    /// Optional scenario tag (deployment variant, e.g. "8_modules_2_towers").
    #[serde(default)]
    pub scenario: Option<String>,
    /// Numeric source field the daily rollup aggregates.
    #[serde(default = "default_rollup_field")]
    pub rollup_field: String,
    /// Stateless per-measurement mapping rules.
    #[serde(default)]
    pub map: Vec<MapRule>,
}

fn default_rollup_field() -> String {
    "value".into()
}

/// Unit conversion / renaming for one measurement.
#[derive(Debug, Clone, Deserialize)]
pub struct MapRule {
    pub measurement: String,
    #[serde(default = "default_rollup_field")]
    pub field: String,
    /// Multiply the field by this (e.g. 0.001 for Wh -> kWh).
    #[serde(default)]
    pub scale: Option<f64>,
    /// Unit tag stamped on the output (e.g. "kWh").
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub rename_field: Option<String>,
    #[serde(default)]
    pub rename_measurement: Option<String>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.source.path.is_empty(), "source.path must be non-empty");
        anyhow::ensure!(!self.sink.path.is_empty(), "sink.path must be non-empty");
        anyhow::ensure!(
            !self.checkpoint.path.is_empty(),
            "checkpoint.path must be non-empty"
        );
        anyhow::ensure!(
            self.window.timezone.parse::<chrono_tz::Tz>().is_ok(),
            "window.timezone is not a known IANA zone: {}",
            self.window.timezone
        );
        anyhow::ensure!(
            self.pipeline.chunk_size > 0,
            "pipeline.chunk_size must be > 0, got {}",
            self.pipeline.chunk_size
        );
        anyhow::ensure!(
            self.pipeline.max_attempts > 0,
            "pipeline.max_attempts must be > 0, got {}",
            self.pipeline.max_attempts
        );
        anyhow::ensure!(
            self.pipeline.initial_backoff_ms > 0,
            "pipeline.initial_backoff_ms must be > 0, got {}",
            self.pipeline.initial_backoff_ms
        );
        anyhow::ensure!(
            self.pipeline.max_backoff_ms >= self.pipeline.initial_backoff_ms,
            "pipeline.max_backoff_ms must be >= initial_backoff_ms, got {}",
            self.pipeline.max_backoff_ms
        );
        anyhow::ensure!(
            self.pipeline.op_timeout_secs > 0,
            "pipeline.op_timeout_secs must be > 0, got {}",
            self.pipeline.op_timeout_secs
        );
        anyhow::ensure!(
            self.pipeline.error_sample_limit > 0,
            "pipeline.error_sample_limit must be > 0, got {}",
            self.pipeline.error_sample_limit
        );
        anyhow::ensure!(
            !self.transform.version.is_empty(),
            "transform.version must be non-empty"
        );
        anyhow::ensure!(
            !self.transform.rollup_field.is_empty(),
            "transform.rollup_field must be non-empty"
        );
        for rule in &self.transform.map {
            anyhow::ensure!(
                !rule.measurement.is_empty(),
                "transform.map.measurement must be non-empty"
            );
            if let Some(scale) = rule.scale {
                anyhow::ensure!(
                    scale.is_finite() && scale != 0.0,
                    "transform.map.scale must be finite and non-zero for {}, got {}",
                    rule.measurement,
                    scale
                );
            }
        }
        Ok(())
    }
}

impl WindowConfig {
    /// Parsed reference zone. Validated at load; UTC only if `validate` was
    /// bypassed.
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::Tz::UTC)
    }
}

impl PipelineConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }
}
