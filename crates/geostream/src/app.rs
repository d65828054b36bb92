//! Main application logic and lifecycle management.
//!
//! The `Application` replays a JSON lines stream of data objects, queries
//! and control messages through a partitioned cluster and writes every
//! output event as one JSON line.

use crate::{
    cli::CliArgs,
    cluster::{Cluster, ClusterReport},
    config::AppConfig,
    logging::display_banner,
    signals::wait_for_shutdown_signal,
};
use geostream_core::{EngineError, InboundEnvelope, JsonLinesSource, StaticDataSource};
use std::error::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader};
use tracing::{error, info, warn};

/// Line counters of one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayCounts {
    pub lines: u64,
    pub routed: u64,
    pub skipped: u64,
}

/// Main application struct.
///
/// Holds the merged configuration until [`Application::run`] assembles the
/// cluster and replays the input.
pub struct Application {
    config: AppConfig,
}

impl Application {
    /// Loads the configuration file, applies command-line overrides and
    /// validates the result.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(input) = args.input {
            config.input.path = Some(input);
        }
        if let Some(output) = args.output {
            config.output.path = Some(output);
        }
        if let Some(static_data) = args.static_data {
            config.input.static_data = Some(static_data);
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();
        Ok(Self { config })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Replays the input until it ends or a shutdown signal arrives.
    ///
    /// At end of input every in-flight message is handled before the
    /// partitions stop; a signal stops them after the message in hand.
    pub async fn run(self) -> Result<ClusterReport, Box<dyn Error>> {
        let engine = self.config.to_engine_config()?;
        self.log_configuration_summary();

        let static_source = self.config.input.static_data.as_ref().map(JsonLinesSource::new);
        let cluster = Cluster::start(
            engine,
            self.config.engine.output_capacity,
            static_source.as_ref().map(|source| source as &dyn StaticDataSource),
            self.open_output().await?,
        )?;

        let input = self.open_input().await?;
        info!("✅ GeoStream is now running with {} partitions", cluster.partitions().len());

        let drain = tokio::select! {
            counts = replay(&cluster, input) => {
                let counts = counts?;
                info!(
                    "📥 Input finished: {} lines, {} routed, {} skipped",
                    counts.lines, counts.routed, counts.skipped
                );
                true
            }
            signal = wait_for_shutdown_signal() => {
                if let Err(e) = signal {
                    error!("❌ Signal handling failed: {}", e);
                }
                false
            }
        };

        let report = cluster.finish(drain).await?;
        log_report(&report);
        Ok(report)
    }

    async fn open_input(&self) -> Result<Box<dyn AsyncBufRead + Unpin + Send>, Box<dyn Error>> {
        Ok(match &self.config.input.path {
            Some(path) => {
                info!("📂 Reading input from {}", path.display());
                Box::new(BufReader::new(tokio::fs::File::open(path).await?))
            }
            None => {
                info!("📂 Reading input from stdin");
                Box::new(BufReader::new(tokio::io::stdin()))
            }
        })
    }

    async fn open_output(&self) -> Result<Box<dyn AsyncWrite + Unpin + Send>, Box<dyn Error>> {
        Ok(match &self.config.output.path {
            Some(path) => Box::new(tokio::fs::File::create(path).await?),
            None => Box::new(tokio::io::stdout()),
        })
    }

    fn log_configuration_summary(&self) {
        let engine = &self.config.engine;
        info!("📋 Configuration Summary:");
        info!(
            "  🗺️ Grid: {}x{} cells over [0, {}] x [0, {}]",
            engine.granularity, engine.granularity, engine.x_max, engine.y_max
        );
        info!(
            "  📨 Query delivery: {:?} | Index: {:?}",
            engine.query_delivery, engine.index_variant
        );
        info!(
            "  📦 Caches: {} volatile, {} peer | Inbox: {}",
            engine.volatile_cache_capacity, engine.peer_cache_capacity, engine.inbox_capacity
        );
        info!("  🏷️ Source kinds: {} configured", self.config.sources.kinds.len());
    }
}

/// Routes every non-blank line of `input`. Malformed or unroutable lines are
/// logged and skipped; a dead partition ends the replay.
pub async fn replay<R>(cluster: &Cluster, input: R) -> Result<ReplayCounts, Box<dyn Error>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut counts = ReplayCounts::default();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        counts.lines += 1;

        let routed = match InboundEnvelope::parse(line) {
            Ok(envelope) => cluster.route(envelope).await,
            Err(e) => Err(e.into()),
        };
        match routed {
            Ok(_) => counts.routed += 1,
            Err(EngineError::Dispatch(e)) => return Err(e.into()),
            Err(e) => {
                warn!("⚠️ Skipping input line {}: {}", counts.lines, e);
                counts.skipped += 1;
            }
        }
    }
    Ok(counts)
}

fn log_report(report: &ClusterReport) {
    let stats = &report.stats;
    info!("📊 Final statistics across {} partitions:", report.partitions);
    info!(
        "  - Data objects: {} | Neighbour copies: {}",
        stats.data_objects, stats.neighbour_objects
    );
    info!(
        "  - Queries: {} registered, {} dropped, {} snapshots",
        stats.queries_registered, stats.queries_dropped, stats.snapshot_queries
    );
    info!(
        "  - Outputs: {} emitted, {} written",
        stats.outputs_emitted, report.outputs_written
    );
    if stats.dropped_events > 0 {
        warn!("  - Dropped events: {}", stats.dropped_events);
    }
    info!("✅ GeoStream shutdown complete");
}
