//! # Spatial Partition Index
//!
//! Deterministic mapping from points and rectangles to the partitions that
//! own them. The index is built once at assembly and handed to every
//! partition; the variant is chosen by [`IndexVariant`].
//!
//! ## Key Types
//!
//! - [`OwnershipTable`] - the immutable grid and its owner list
//! - [`DynamicOwnership`] - a per-partition copy that accepts reassignments
//! - [`PartitionIndex`] - closed set of variants used by the evaluator

pub mod dynamic;
pub mod grid;

pub use dynamic::{CellReassignment, DynamicOwnership, ReassignOutcome};
pub use grid::{CellCoordinates, CellDistance, OwnerSet, OwnershipTable};

use crate::config::{GridConfig, IndexVariant};
use crate::error::PartitionError;
use crate::types::{PartitionId, Point, Rectangle};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum PartitionIndex {
    Static(Arc<OwnershipTable>),
    Dynamic(DynamicOwnership),
}

impl PartitionIndex {
    pub fn new(variant: IndexVariant, table: Arc<OwnershipTable>) -> Self {
        match variant {
            IndexVariant::Static => PartitionIndex::Static(table),
            IndexVariant::Dynamic => PartitionIndex::Dynamic(DynamicOwnership::new(table)),
        }
    }

    pub fn from_config(variant: IndexVariant, grid: &GridConfig) -> Result<Self, PartitionError> {
        Ok(Self::new(variant, Arc::new(OwnershipTable::new(grid)?)))
    }

    pub fn table(&self) -> &OwnershipTable {
        match self {
            PartitionIndex::Static(table) => table,
            PartitionIndex::Dynamic(dynamic) => dynamic.table(),
        }
    }

    pub fn owner_for_point(&self, point: &Point) -> Result<PartitionId, PartitionError> {
        self.table().owner_for_point(point)
    }

    pub fn owners_overlapping_rectangle(
        &self,
        rect: &Rectangle,
    ) -> Result<OwnerSet, PartitionError> {
        self.table().owners_overlapping_rectangle(rect)
    }

    pub fn bounds_for_cell_index(&self, cell: usize) -> Result<Rectangle, PartitionError> {
        self.table().bounds_for_cell_index(cell)
    }

    pub fn owner_for_cell_index(&self, cell: usize) -> Result<PartitionId, PartitionError> {
        self.table().owner_for_cell_index(cell)
    }

    pub fn cells_by_distance(&self, focal: &Point) -> Vec<CellDistance> {
        self.table().cells_by_distance(focal)
    }

    pub fn max_distance(&self) -> f64 {
        self.table().max_distance()
    }

    /// Applies a control message. Only the dynamic variant accepts them.
    pub fn apply(
        &mut self,
        reassignment: CellReassignment,
    ) -> Result<ReassignOutcome, PartitionError> {
        match self {
            PartitionIndex::Static(_) => Err(PartitionError::StaticIndex),
            PartitionIndex::Dynamic(dynamic) => dynamic.apply(reassignment),
        }
    }
}
