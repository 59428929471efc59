//! Configuration for the throttling engine.
//!
//! The symbol universe and the two shard counts are fixed at engine
//! construction. They come from a JSON file (every field optional), and the
//! shard counts can additionally be overridden from the environment.
//!
//! # Example config
//!
//! ```json
//! {
//!   "log": { "module_name": "fx_throttler", "log_path": "/tmp/log", "format": "json" },
//!   "symbols": ["EURUSD", "EURRUB", "USDRUB"],
//!   "distributors_count": 5,
//!   "notifiers_per_processor_count": 10,
//!   "dispatch_queue_capacity": 8192,
//!   "distributor_cpu_affinity": [2, 3]
//! }
//! ```

use anyhow::Context;
use serde::Deserialize;

use crate::error::{Result, ThrottleError};
use crate::logging::LogFormat;

/// Env var overriding [`ThrottlerConfig::distributors_count`].
pub const ENV_DISTRIBUTORS_COUNT: &str = "DISTRIBUTORS_COUNT";

/// Env var overriding [`ThrottlerConfig::notifiers_per_processor_count`].
pub const ENV_NOTIFIERS_PER_PROCESSOR_COUNT: &str = "NOTIFIERS_PER_PROCESSOR_COUNT";

/// Engine configuration, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottlerConfig {
    /// Logging metadata (name, log path).
    pub log: Option<LogMeta>,

    /// Every currency pair the engine will ever see.
    pub symbols: Vec<String>,

    /// Number of distributor shards (D).
    pub distributors_count: usize,

    /// Number of delivery channels per subscriber per distributor (N).
    pub notifiers_per_processor_count: usize,

    /// Capacity of each distributor's inbound dispatch queue. This is the only
    /// point where a producer can wait.
    pub dispatch_queue_capacity: usize,

    /// CPU cores for distributor worker threads, assigned round-robin.
    pub distributor_cpu_affinity: Option<Vec<i32>>,
}

/// Logging metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for ThrottlerConfig {
    fn default() -> Self {
        Self {
            log: None,
            symbols: vec!["EURUSD".into(), "EURRUB".into(), "USDRUB".into()],
            distributors_count: 5,
            notifiers_per_processor_count: 10,
            dispatch_queue_capacity: 8192,
            distributor_cpu_affinity: None,
        }
    }
}

impl ThrottlerConfig {
    /// Config with the given universe and default shard counts.
    pub fn with_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Apply `DISTRIBUTORS_COUNT` / `NOTIFIERS_PER_PROCESSOR_COUNT` from the
    /// process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in
    /// production, a map in tests).
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_DISTRIBUTORS_COUNT) {
            self.distributors_count = parse_count(ENV_DISTRIBUTORS_COUNT, &v)?;
        }
        if let Some(v) = lookup(ENV_NOTIFIERS_PER_PROCESSOR_COUNT) {
            self.notifiers_per_processor_count = parse_count(ENV_NOTIFIERS_PER_PROCESSOR_COUNT, &v)?;
        }
        Ok(self)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(ThrottleError::Config("symbols must not be empty".into()));
        }
        if self.distributors_count == 0 {
            return Err(ThrottleError::Config("distributors_count must be >= 1".into()));
        }
        if self.notifiers_per_processor_count == 0 {
            return Err(ThrottleError::Config("notifiers_per_processor_count must be >= 1".into()));
        }
        if self.dispatch_queue_capacity == 0 {
            return Err(ThrottleError::Config("dispatch_queue_capacity must be >= 1".into()));
        }
        Ok(())
    }

    /// Returns the module name used for log file prefixes.
    pub fn module_name(&self) -> String {
        self.log
            .as_ref()
            .and_then(|m| m.module_name.clone())
            .unwrap_or_else(|| "fx_throttler".to_string())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.log.as_ref().and_then(|m| m.log_path.clone())
    }

    pub fn log_format(&self) -> LogFormat {
        self.log.as_ref().map(|m| m.format).unwrap_or_default()
    }
}

fn parse_count(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|e| ThrottleError::Config(format!("{key}={raw:?}: {e}")))
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<ThrottlerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: ThrottlerConfig = serde_json::from_str(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}
