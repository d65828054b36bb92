//! # GeoStream - Replay Driver
//!
//! Runs a partitioned continuous spatio-textual query engine over a JSON
//! lines stream. Data objects, query registrations and cell reassignments
//! are read line by line; range matches, join pairs and KNN result-set
//! changes are written as JSON lines.
//!
//! ## Quick Start
//!
//! ```bash
//! # Replay a file with the default configuration
//! geostream --input events.jsonl --output results.jsonl
//!
//! # Load static reference data first and log as JSON
//! geostream -c prod.toml -s pois.jsonl --json-logs < events.jsonl
//! ```
//!
//! ## Configuration
//!
//! The driver loads configuration from a TOML file (default:
//! `geostream.toml`). If the file doesn't exist, a default configuration
//! is created.
//!
//! ## Signal Handling
//!
//! SIGINT and SIGTERM stop the replay early. End of input drains every
//! in-flight message before the partitions stop.

use tracing::error;

mod app;
mod cli;
mod cluster;
mod config;
mod logging;
mod signals;

pub use cli::CliArgs;
pub use config::AppConfig;

/// Main entry point for the replay driver.
///
/// # Exit Codes
///
/// * **0**: Input replayed and partitions stopped
/// * **1**: Error during startup, configuration, or replay
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging settings come from the file before the full load
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    let mut logging = config.logging.clone();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use app::{Application, ReplayCounts};
pub use cluster::{Cluster, ClusterReport};
pub use config::{EngineSettings, InputSettings, LoggingSettings, OutputSettings, SourceSettings};

#[cfg(test)]
mod tests {
    use super::*;
    use geostream_core::{QueryDelivery, SourceKind};

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let engine = config.to_engine_config().unwrap();
        assert_eq!(engine.query_delivery, QueryDelivery::Broadcast);
        assert_eq!(engine.inbox_capacity, config.engine.inbox_capacity);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = AppConfig::default();
        config.sources.kinds.insert("cars".to_string(), SourceKind::Current);
        config.engine.query_delivery = QueryDelivery::Hashed;

        let toml_str = toml::to_string(&config).unwrap();
        let reparsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.engine.query_delivery, QueryDelivery::Hashed);
        assert_eq!(reparsed.sources.kinds.get("cars"), Some(&SourceKind::Current));
        assert_eq!(reparsed.logging.level, config.logging.level);
    }
}
