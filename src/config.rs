//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::aggregate::{Algorithm, BlockStrategy, Diff, Mean};
use crate::store::StoreOptions;
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_source")]
    pub source: StoreOptions,

    #[serde(default = "default_target")]
    pub target: StoreOptions,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("gridlog"))
        .unwrap_or_else(|| PathBuf::from("./gridlog_data"))
}

fn default_source() -> StoreOptions {
    let mut opts = StoreOptions::memory("readings");
    opts.backend = crate::store::BackendKind::Flatfile;
    opts.directory = Some(default_data_dir());
    opts.distributed = true;
    opts
}

fn default_target() -> StoreOptions {
    let mut opts = StoreOptions::memory("readings_daily");
    opts.backend = crate::store::BackendKind::Document;
    opts.database = Some(default_data_dir().join("aggregates.db"));
    opts
}

/// Aggregation algorithm selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmKind {
    Mean,
    Diff,
}

/// Aggregation engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: AlgorithmKind,

    /// Block length in minutes
    #[serde(default = "default_block_length_minutes")]
    pub block_length_minutes: i64,

    /// Freshly completed blocks allowed per pass, unlimited when omitted
    #[serde(default)]
    pub blocks_to_process: Option<usize>,

    /// Local timezone as minutes east of UTC; block edges align to its
    /// midnight
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Restrict aggregation to these columns, all numeric columns when
    /// omitted
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

fn default_algorithm() -> AlgorithmKind {
    AlgorithmKind::Mean
}

fn default_block_length_minutes() -> i64 {
    24 * 60
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            block_length_minutes: default_block_length_minutes(),
            blocks_to_process: None,
            utc_offset_minutes: 0,
            columns: None,
        }
    }
}

impl AggregationConfig {
    /// Local offset, falling back to UTC when out of range
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Build the configured strategy
    pub fn build_strategy(&self) -> Result<BlockStrategy, ConfigError> {
        if self.block_length_minutes <= 0 {
            return Err(ConfigError::Invalid {
                field: "aggregation.block_length_minutes",
                error: format!("must be positive, got {}", self.block_length_minutes),
            });
        }
        let algorithm: Box<dyn Algorithm> = match (self.algorithm, &self.columns) {
            (AlgorithmKind::Mean, None) => Box::new(Mean::new()),
            (AlgorithmKind::Mean, Some(columns)) => Box::new(Mean::over(columns.clone())),
            (AlgorithmKind::Diff, None) => Box::new(Diff::new()),
            (AlgorithmKind::Diff, Some(columns)) => Box::new(Diff::over(columns.clone())),
        };
        let mut strategy =
            BlockStrategy::new(algorithm, self.block_length_minutes).with_offset(self.offset());
        if let Some(budget) = self.blocks_to_process {
            strategy = strategy.with_budget(budget);
        }
        Ok(strategy)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("gridlog").join("config.toml")),
            Some(PathBuf::from("/etc/gridlog/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Store overrides
        if let Ok(data_dir) = std::env::var("GRIDLOG_DATA_DIR") {
            let dir = PathBuf::from(&data_dir);
            if self.source.directory.is_some() {
                self.source.directory = Some(dir.clone());
            }
            if self.target.database.is_some() {
                self.target.database = Some(dir.join("aggregates.db"));
            }
        }
        if let Ok(token) = std::env::var("GRIDLOG_INFLUX_TOKEN") {
            if self.source.url.is_some() {
                self.source.token = Some(token.clone());
            }
            if self.target.url.is_some() {
                self.target.token = Some(token);
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("GRIDLOG_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("GRIDLOG_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: default_source(),
            target: default_target(),
            aggregation: AggregationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid config value for {field}: {error}")]
    Invalid { field: &'static str, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Gridlog Configuration
#
# Environment variables override these settings:
# - GRIDLOG_DATA_DIR
# - GRIDLOG_INFLUX_TOKEN
# - GRIDLOG_LOG_LEVEL
# - GRIDLOG_LOG_FORMAT

[source]
# Backend: memory, flatfile, document or influx
backend = "flatfile"

# Field ordering and querying records
index = "time"

# Logical location (file stem, table or measurement)
location = "readings"

# Flat file backend: directory holding the CSV files
directory = "~/.local/share/gridlog"

# Split the store into one sub-location per calendar day
distributed = true
distributor = "date"

[target]
backend = "document"
index = "time"
location = "readings_daily"

# Document backend: SQLite database file
database = "~/.local/share/gridlog/aggregates.db"

[aggregation]
# Algorithm: mean (averages) or diff (counter deltas)
algorithm = "mean"

# Block length in minutes; 1440 = one block per day
block_length_minutes = 1440

# Cap on freshly completed blocks per pass
# blocks_to_process = 10

# Local timezone in minutes east of UTC; block edges align to its midnight
utc_offset_minutes = 0

# Restrict aggregation to specific columns
# columns = ["power"]

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/gridlog/gridlog.log"
"#
    .to_string()
}
