//! Configuration management for the replay driver.
//!
//! Loads the TOML configuration file, writes a default one when it is
//! missing, and converts the engine section into the core's typed
//! [`EngineConfig`].

use geostream_core::{
    ConfigValidationError, EngineConfig, EngineConfigBuilder, GridConfig, IndexVariant,
    QueryDelivery, SourceKind,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

fn default_granularity() -> u32 {
    4
}

fn default_extent() -> f64 {
    1000.0
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_inbox_capacity() -> usize {
    1024
}

fn default_output_capacity() -> usize {
    4096
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Grid, delivery policy and capacities
    #[serde(default)]
    pub engine: EngineSettings,
    /// Source kinds by source id
    #[serde(default)]
    pub sources: SourceSettings,
    /// Input stream and static data locations
    #[serde(default)]
    pub input: InputSettings,
    /// Output stream location
    #[serde(default)]
    pub output: OutputSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Cells per axis
    #[serde(default = "default_granularity")]
    pub granularity: u32,
    #[serde(default = "default_extent")]
    pub x_max: f64,
    #[serde(default = "default_extent")]
    pub y_max: f64,
    /// Row-major owner of every cell; one partition per cell when empty
    #[serde(default)]
    pub owners: Vec<u32>,
    #[serde(default)]
    pub query_delivery: QueryDelivery,
    #[serde(default)]
    pub index_variant: IndexVariant,
    #[serde(default = "default_cache_capacity")]
    pub volatile_cache_capacity: usize,
    #[serde(default = "default_cache_capacity")]
    pub peer_cache_capacity: usize,
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
    /// Output events buffered ahead of the writer
    #[serde(default = "default_output_capacity")]
    pub output_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Kind of any source not listed in `kinds`
    #[serde(default = "SourceSettings::default_kind")]
    pub default_kind: SourceKind,
    #[serde(default)]
    pub kinds: BTreeMap<String, SourceKind>,
}

impl SourceSettings {
    fn default_kind() -> SourceKind {
        SourceKind::Persistent
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSettings {
    /// JSON lines input; stdin when unset
    pub path: Option<PathBuf>,
    /// Static objects loaded before processing
    pub static_data: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSettings {
    /// JSON lines output; stdout when unset
    pub path: Option<PathBuf>,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            granularity: default_granularity(),
            x_max: default_extent(),
            y_max: default_extent(),
            owners: Vec::new(),
            query_delivery: QueryDelivery::default(),
            index_variant: IndexVariant::default(),
            volatile_cache_capacity: default_cache_capacity(),
            peer_cache_capacity: default_cache_capacity(),
            inbox_capacity: default_inbox_capacity(),
            output_capacity: default_output_capacity(),
        }
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            default_kind: Self::default_kind(),
            kinds: BTreeMap::new(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written at
    /// the given path and the default configuration returned.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Assembles and validates the engine configuration.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigValidationError> {
        let engine = &self.engine;
        let grid = if engine.owners.is_empty() {
            GridConfig::uniform(engine.granularity, engine.x_max, engine.y_max)
        } else {
            GridConfig {
                granularity: engine.granularity,
                x_max: engine.x_max,
                y_max: engine.y_max,
                owners: engine.owners.clone(),
            }
        };

        let mut builder = EngineConfigBuilder::new()
            .with_grid(grid)
            .with_query_delivery(engine.query_delivery)
            .with_index_variant(engine.index_variant)
            .with_cache_capacities(engine.volatile_cache_capacity, engine.peer_cache_capacity)
            .with_inbox_capacity(engine.inbox_capacity)
            .with_default_source_kind(self.sources.default_kind);
        for (source, kind) in &self.sources.kinds {
            builder = builder.with_source(source.as_str(), *kind);
        }
        builder.build()
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        self.to_engine_config().map_err(|e| e.to_string())?;

        if self.engine.output_capacity == 0 {
            return Err("engine.output_capacity must be greater than 0".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
