//! # GeoStream Core
//!
//! Partitioned evaluation of continuous and snapshot spatio-textual queries
//! (range, k-nearest-neighbour and spatial-textual join) over a stream of
//! geotagged, text-tagged objects.
//!
//! ## Core Features
//!
//! - **Grid Partitioning**: every point and rectangle maps deterministically
//!   to the partitions that own it ([`partition`])
//! - **Incremental Top-k**: KNN result sets are maintained per object and
//!   reported as add/update/remove changes ([`knn`])
//! - **Textual Predicates**: AND / OR / NONE over sorted token sets
//!   ([`predicate`])
//! - **Symmetric Joins**: eligible objects are propagated to neighbouring
//!   partitions so each pair is found where its partner is stored
//!   ([`evaluator`])
//! - **Dispatch Fabric**: direct, keyed, random and broadcast delivery over
//!   bounded Tokio channels ([`dispatch`])
//!
//! ## Architecture Overview
//!
//! Each partition runs one [`worker::PartitionWorker`] which owns an
//! [`evaluator::Evaluator`]. Partitions share no mutable state; all traffic
//! between them and the driver goes through a [`dispatch::DispatchFabric`].
//!
//! ## Quick Start Example
//!
//! ```rust,no_run
//! use geostream_core::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(
//!     EngineConfigBuilder::new()
//!         .with_uniform_grid(2, 100.0, 100.0)
//!         .with_source("pois", SourceKind::Static)
//!         .build()?,
//! );
//! let FabricEndpoints { fabric, inboxes, mut outputs } =
//!     ChannelFabric::build(&config.grid.partitions(), config.inbox_capacity, 1024)?;
//!
//! let shutdown = ShutdownState::new();
//! for (partition, inbox) in inboxes {
//!     let index = PartitionIndex::from_config(config.index_variant, &config.grid)?;
//!     let evaluator = Evaluator::new(partition, Arc::clone(&config), index);
//!     let worker = PartitionWorker::new(evaluator, fabric.clone(), inbox, shutdown.clone());
//!     tokio::spawn(worker.run());
//! }
//!
//! let line = r#"{"type":"data","objectId":"p1","x":10,"y":10,"command":"add","sourceId":"pois"}"#;
//! if let InboundEnvelope::Data(message) = InboundEnvelope::parse(line)? {
//!     let object = DataObject::try_from(message)?;
//!     let owner = PartitionIndex::from_config(config.index_variant, &config.grid)?
//!         .owner_for_point(&object.location)?;
//!     fabric.send(Route::Direct(owner), PartitionMessage::from_source(object)).await?;
//! }
//!
//! fabric.idle().await;
//! shutdown.initiate_shutdown();
//! while let Ok(event) = outputs.try_recv() {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod knn;
pub mod messages;
pub mod partition;
pub mod predicate;
pub mod query;
pub mod shutdown;
pub mod static_data;
pub mod types;
pub mod worker;

#[cfg(test)]
mod tests;

pub use config::{
    EngineConfig, EngineConfigBuilder, GridConfig, IndexVariant, QueryDelivery, Retention,
    SourceCatalog, SourceKind,
};
pub use dispatch::{ChannelFabric, DispatchFabric, FabricEndpoints, Route};
pub use error::{
    ConfigValidationError, DispatchError, EngineError, MessageError, PartitionError,
    StaticLoadError,
};
pub use evaluator::{Evaluator, EvaluatorStats, ObjectStore, Outbound, OutputEvent, QuerySummary};
pub use knn::{ChangeKind, KnnPhase, KnnState, ResultSetChange};
pub use messages::{
    DataObjectMessage, DataOrigin, InboundEnvelope, PartitionMessage, QueryMessage, TextField,
};
pub use partition::{
    CellCoordinates, CellDistance, CellReassignment, DynamicOwnership, OwnerSet, OwnershipTable,
    PartitionIndex, ReassignOutcome,
};
pub use predicate::{within_distance, TextPredicate};
pub use query::{JoinSide, Query, QueryCommand, QueryKey, QueryShape, QueryType};
pub use shutdown::ShutdownState;
pub use static_data::{JsonLinesSource, StaticDataSource, StaticRecords};
pub use types::{
    Command, DataObject, ObjectId, PartitionId, Point, QueryId, Rectangle, SourceId, TokenSet,
};
pub use worker::PartitionWorker;
