//! Rebalancing ownership table.
//!
//! Each partition keeps its own copy of the table and applies broadcast
//! [`CellReassignment`] controls in epoch order. Reassignments are not
//! coordinated across partitions: until every partition has applied an
//! epoch, two partitions may route the same cell differently.

use super::grid::OwnershipTable;
use crate::error::PartitionError;
use crate::types::PartitionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Control message moving one cell to a new owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellReassignment {
    pub cell: usize,
    pub new_owner: PartitionId,
    pub epoch: u64,
}

/// Outcome of applying a reassignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassignOutcome {
    Applied { previous_owner: PartitionId },
    Stale { current_epoch: u64 },
}

#[derive(Debug, Clone)]
pub struct DynamicOwnership {
    table: Arc<OwnershipTable>,
    epoch: u64,
}

impl DynamicOwnership {
    pub fn new(table: Arc<OwnershipTable>) -> Self {
        Self { table, epoch: 0 }
    }

    pub fn table(&self) -> &OwnershipTable {
        &self.table
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Applies `reassignment` if its epoch is newer than the last applied one.
    ///
    /// The shared table is copied on first write so other partitions keep
    /// their view until their own control message arrives.
    pub fn apply(
        &mut self,
        reassignment: CellReassignment,
    ) -> Result<ReassignOutcome, PartitionError> {
        if reassignment.epoch <= self.epoch {
            warn!(
                "Ignoring stale reassignment of cell {} (epoch {} <= {})",
                reassignment.cell, reassignment.epoch, self.epoch
            );
            return Ok(ReassignOutcome::Stale {
                current_epoch: self.epoch,
            });
        }

        let previous_owner =
            Arc::make_mut(&mut self.table).reassign(reassignment.cell, reassignment.new_owner)?;
        self.epoch = reassignment.epoch;
        debug!(
            "Cell {} moved from partition {} to {} at epoch {}",
            reassignment.cell, previous_owner, reassignment.new_owner, reassignment.epoch
        );
        Ok(ReassignOutcome::Applied { previous_owner })
    }
}
