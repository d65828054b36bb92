//! Engine Configuration Management
//!
//! Typed configuration records assembled once before any partition starts and
//! shared read-only afterwards: grid geometry and ownership, per-source
//! retention semantics, query delivery policy, and cache capacities.

use crate::error::ConfigValidationError;
use crate::types::{PartitionId, Point, Rectangle, SourceId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Grid geometry and the row-major cell → owner assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Cells per axis
    pub granularity: u32,
    /// Universe extent on the x axis, the universe starts at 0
    pub x_max: f64,
    /// Universe extent on the y axis, the universe starts at 0
    pub y_max: f64,
    /// Owner partition of each cell, row-major
    pub owners: Vec<PartitionId>,
}

impl GridConfig {
    /// One partition per cell, numbered in row-major order.
    pub fn uniform(granularity: u32, x_max: f64, y_max: f64) -> Self {
        let cells = (granularity as usize) * (granularity as usize);
        Self {
            granularity,
            x_max,
            y_max,
            owners: (0..cells as PartitionId).collect(),
        }
    }

    pub fn cell_count(&self) -> usize {
        (self.granularity as usize) * (self.granularity as usize)
    }

    pub fn universe(&self) -> Rectangle {
        Rectangle::new(Point::new(0.0, 0.0), Point::new(self.x_max, self.y_max))
    }

    /// Largest possible distance between two indexed points.
    pub fn max_distance(&self) -> f64 {
        (self.x_max * self.x_max + self.y_max * self.y_max).sqrt()
    }

    /// Distinct owner ids, ascending.
    pub fn partitions(&self) -> Vec<PartitionId> {
        self.owners
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.granularity == 0 {
            return Err(ConfigValidationError::ZeroGranularity);
        }
        let valid_extent = |v: f64| v.is_finite() && v > 0.0;
        if !valid_extent(self.x_max) || !valid_extent(self.y_max) {
            return Err(ConfigValidationError::InvalidUniverse {
                x_max: self.x_max,
                y_max: self.y_max,
            });
        }
        if self.owners.is_empty() {
            return Err(ConfigValidationError::NoOwners);
        }
        Ok(())
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self::uniform(2, 1000.0, 1000.0)
    }
}

/// How a partition retains objects of a given source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Upsert by object id; removals delete.
    ById,
    /// Keep join-eligible objects in a bounded FIFO cache.
    Bounded,
    /// Evaluate and forget.
    Transient,
}

/// Semantics of a data source stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Objects with a lasting identity, updated in place
    Persistent,
    /// Short-lived objects that need no cleanup
    VolatileClean,
    /// Short-lived objects retained for a bounded window
    VolatileNotClean,
    /// Latest location of moving objects
    Current,
    /// Bulk-loaded reference data
    Static,
}

impl SourceKind {
    pub fn retention(self) -> Retention {
        match self {
            SourceKind::Persistent | SourceKind::Current | SourceKind::Static => Retention::ById,
            SourceKind::VolatileNotClean => Retention::Bounded,
            SourceKind::VolatileClean => Retention::Transient,
        }
    }
}

/// Source id → kind lookup with a fallback for unlisted sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCatalog {
    sources: HashMap<SourceId, SourceKind>,
    default_kind: SourceKind,
}

impl SourceCatalog {
    pub fn new(default_kind: SourceKind) -> Self {
        Self {
            sources: HashMap::new(),
            default_kind,
        }
    }

    pub fn with_source(mut self, source: impl Into<SourceId>, kind: SourceKind) -> Self {
        self.sources.insert(source.into(), kind);
        self
    }

    pub fn insert(&mut self, source: impl Into<SourceId>, kind: SourceKind) {
        self.sources.insert(source.into(), kind);
    }

    pub fn set_default_kind(&mut self, kind: SourceKind) {
        self.default_kind = kind;
    }

    pub fn kind_of(&self, source: &SourceId) -> SourceKind {
        self.sources.get(source).copied().unwrap_or(self.default_kind)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self::new(SourceKind::Persistent)
    }
}

/// Where continuous queries are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryDelivery {
    /// Every partition holds a copy and evaluates its local slice.
    #[default]
    Broadcast,
    /// Exactly one partition, chosen by hashing the query key.
    Hashed,
    /// Owners of the cells a range or join rectangle overlaps; KNN queries
    /// are still broadcast.
    Overlapping,
}

/// Ownership table behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexVariant {
    /// Ownership fixed at assembly.
    #[default]
    Static,
    /// Ownership may be reassigned through broadcast control messages.
    Dynamic,
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub grid: GridConfig,
    pub sources: SourceCatalog,
    pub query_delivery: QueryDelivery,
    pub index_variant: IndexVariant,
    /// Maximum retained objects from volatile (not clean) sources per partition
    pub volatile_cache_capacity: usize,
    /// Maximum retained objects propagated from peers per partition
    pub peer_cache_capacity: usize,
    /// Bounded inbox size of each partition worker
    pub inbox_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            sources: SourceCatalog::default(),
            query_delivery: QueryDelivery::default(),
            index_variant: IndexVariant::default(),
            volatile_cache_capacity: 10_000,
            peer_cache_capacity: 10_000,
            inbox_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.grid.validate()?;
        if self.volatile_cache_capacity == 0 {
            return Err(ConfigValidationError::ZeroCapacity("volatile_cache_capacity"));
        }
        if self.peer_cache_capacity == 0 {
            return Err(ConfigValidationError::ZeroCapacity("peer_cache_capacity"));
        }
        if self.inbox_capacity == 0 {
            return Err(ConfigValidationError::ZeroCapacity("inbox_capacity"));
        }
        Ok(())
    }
}

/// Configuration builder for easier setup
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// Uniform grid with one partition per cell
    pub fn with_uniform_grid(mut self, granularity: u32, x_max: f64, y_max: f64) -> Self {
        self.config.grid = GridConfig::uniform(granularity, x_max, y_max);
        self
    }

    pub fn with_grid(mut self, grid: GridConfig) -> Self {
        self.config.grid = grid;
        self
    }

    pub fn with_source(mut self, source: impl Into<SourceId>, kind: SourceKind) -> Self {
        self.config.sources.insert(source, kind);
        self
    }

    /// Kind assumed for sources not registered explicitly
    pub fn with_default_source_kind(mut self, kind: SourceKind) -> Self {
        self.config.sources.set_default_kind(kind);
        self
    }

    pub fn with_query_delivery(mut self, delivery: QueryDelivery) -> Self {
        self.config.query_delivery = delivery;
        self
    }

    pub fn with_index_variant(mut self, variant: IndexVariant) -> Self {
        self.config.index_variant = variant;
        self
    }

    pub fn with_cache_capacities(mut self, volatile: usize, peer: usize) -> Self {
        self.config.volatile_cache_capacity = volatile;
        self.config.peer_cache_capacity = peer;
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.config.inbox_capacity = capacity;
        self
    }

    /// Validates and returns the configuration
    pub fn build(self) -> Result<EngineConfig, ConfigValidationError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_grid_assigns_one_owner_per_cell() {
        let grid = GridConfig::uniform(3, 90.0, 30.0);
        assert_eq!(grid.cell_count(), 9);
        assert_eq!(grid.owners, (0..9).collect::<Vec<_>>());
        assert_eq!(grid.partitions().len(), 9);
    }

    #[test]
    fn max_distance_is_universe_diagonal() {
        let grid = GridConfig::uniform(1, 3.0, 4.0);
        assert_eq!(grid.max_distance(), 5.0);
    }

    #[test]
    fn validation_rejects_degenerate_grids() {
        let mut grid = GridConfig::uniform(2, 10.0, 10.0);
        grid.granularity = 0;
        assert!(matches!(grid.validate(), Err(ConfigValidationError::ZeroGranularity)));

        let mut grid = GridConfig::uniform(2, 10.0, 10.0);
        grid.y_max = f64::NAN;
        assert!(matches!(grid.validate(), Err(ConfigValidationError::InvalidUniverse { .. })));

        let mut grid = GridConfig::uniform(2, 10.0, 10.0);
        grid.owners.clear();
        assert!(matches!(grid.validate(), Err(ConfigValidationError::NoOwners)));
    }

    #[test]
    fn short_owner_lists_are_accepted() {
        let mut grid = GridConfig::uniform(2, 10.0, 10.0);
        grid.owners.truncate(3);
        assert!(grid.validate().is_ok());
    }

    #[test]
    fn unknown_sources_fall_back_to_default_kind() {
        let catalog = SourceCatalog::new(SourceKind::VolatileClean)
            .with_source("pois", SourceKind::Static);
        assert_eq!(catalog.kind_of(&SourceId::new("pois")), SourceKind::Static);
        assert_eq!(catalog.kind_of(&SourceId::new("tweets")), SourceKind::VolatileClean);
        assert_eq!(SourceKind::VolatileNotClean.retention(), Retention::Bounded);
    }

    #[test]
    fn builder_validates_capacities() {
        let result = EngineConfigBuilder::new()
            .with_uniform_grid(2, 100.0, 100.0)
            .with_cache_capacities(0, 10)
            .build();
        assert!(matches!(
            result,
            Err(ConfigValidationError::ZeroCapacity("volatile_cache_capacity"))
        ));

        let config = EngineConfigBuilder::new()
            .with_uniform_grid(4, 100.0, 100.0)
            .with_query_delivery(QueryDelivery::Hashed)
            .with_source("tweets", SourceKind::VolatileNotClean)
            .build()
            .expect("valid config");
        assert_eq!(config.grid.cell_count(), 16);
        assert_eq!(config.query_delivery, QueryDelivery::Hashed);
    }
}
