//! Error types for the evaluation engine.
//!
//! Per-tuple errors ([`MessageError`], [`PartitionError`] raised for a single
//! point or rectangle) are logged and the tuple skipped. Startup errors
//! ([`StaticLoadError`], [`ConfigValidationError`]) are fatal for the
//! partition that raises them.

use crate::types::PartitionId;
use thiserror::Error;

/// Grid and ownership errors.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Cell index {cell} exceeds configured owner list of length {owners}")]
    CellOutOfRange { cell: usize, owners: usize },

    #[error("Partition {0} owns no cell")]
    UnknownPartition(PartitionId),

    #[error("Cell reassignment requires the dynamic index variant")]
    StaticIndex,
}

/// Wire decoding and validation errors.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Missing field '{field}' for {context}")]
    MissingField {
        field: &'static str,
        context: &'static str,
    },

    #[error("Invalid value: {0}")]
    Invalid(String),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl MessageError {
    pub(crate) fn missing(field: &'static str, context: &'static str) -> Self {
        Self::MissingField { field, context }
    }
}

/// Delivery errors raised by a dispatch fabric.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Partition {0} is not part of this fabric")]
    UnknownTarget(PartitionId),

    #[error("Inbox of partition {0} is closed")]
    Closed(PartitionId),

    #[error("Output channel is closed")]
    OutputClosed,

    #[error("Fabric has no partitions")]
    NoPartitions,
}

/// Failures while bulk loading static data at partition startup.
#[derive(Debug, Error)]
pub enum StaticLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: {source}")]
    Record {
        line: usize,
        #[source]
        source: MessageError,
    },
}

/// Configuration that cannot be assembled into a working cluster.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("Grid granularity must be greater than 0")]
    ZeroGranularity,

    #[error("Universe extents must be positive and finite (got {x_max} x {y_max})")]
    InvalidUniverse { x_max: f64, y_max: f64 },

    #[error("Owner list is empty")]
    NoOwners,

    #[error("Capacity '{0}' must be greater than 0")]
    ZeroCapacity(&'static str),
}

/// Umbrella error for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Static data load failed: {0}")]
    StaticLoad(#[from] StaticLoadError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigValidationError),
}
