//! Uniform grid ownership table.
//!
//! The universe `[0, x_max] x [0, y_max]` is cut into `G x G` equal cells,
//! numbered row-major with the row taken from `y`. Every cell is owned by
//! exactly one partition. Lookups beyond the universe clamp to the nearest
//! edge cell; a cell without a configured owner is reported as
//! [`PartitionError::CellOutOfRange`] so the caller can drop the event.

use crate::config::GridConfig;
use crate::error::PartitionError;
use crate::types::{PartitionId, Point, Rectangle};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use tracing::warn;

/// Owners touched by a rectangle. Most rectangles span a handful of cells.
pub type OwnerSet = SmallVec<[PartitionId; 4]>;

/// Grid cell address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellCoordinates {
    pub row: u32,
    pub col: u32,
}

/// A cell and its shortest distance from some focal point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellDistance {
    pub cell: usize,
    pub distance: f64,
}

impl CellCoordinates {
    pub fn linear_index(&self, granularity: u32) -> usize {
        self.row as usize * granularity as usize + self.col as usize
    }
}

/// Immutable cell → owner mapping plus its inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipTable {
    granularity: u32,
    x_max: f64,
    y_max: f64,
    x_step: f64,
    y_step: f64,
    owners: Vec<PartitionId>,
    cells_by_owner: HashMap<PartitionId, SmallVec<[usize; 2]>>,
}

impl OwnershipTable {
    pub fn new(config: &GridConfig) -> Result<Self, PartitionError> {
        config
            .validate()
            .map_err(|e| PartitionError::InvalidGrid(e.to_string()))?;

        let cells = config.cell_count();
        if config.owners.len() < cells {
            warn!(
                "⚠️ Owner list covers {} of {} cells; events in unowned cells will be dropped",
                config.owners.len(),
                cells
            );
        }

        let granularity = config.granularity;
        let mut table = Self {
            granularity,
            x_max: config.x_max,
            y_max: config.y_max,
            x_step: config.x_max / granularity as f64,
            y_step: config.y_max / granularity as f64,
            owners: config.owners.iter().copied().take(cells).collect(),
            cells_by_owner: HashMap::new(),
        };
        table.rebuild_inverse();
        Ok(table)
    }

    fn rebuild_inverse(&mut self) {
        self.cells_by_owner.clear();
        for (cell, owner) in self.owners.iter().enumerate() {
            self.cells_by_owner.entry(*owner).or_default().push(cell);
        }
    }

    pub fn granularity(&self) -> u32 {
        self.granularity
    }

    pub fn cell_count(&self) -> usize {
        self.granularity as usize * self.granularity as usize
    }

    pub fn universe(&self) -> Rectangle {
        Rectangle::new(Point::new(0.0, 0.0), Point::new(self.x_max, self.y_max))
    }

    /// Sentinel used as the farthest distance of an unsaturated KNN query.
    pub fn max_distance(&self) -> f64 {
        (self.x_max * self.x_max + self.y_max * self.y_max).sqrt()
    }

    fn clamp_axis(value: f64, granularity: u32) -> u32 {
        // NaN and negative coordinates both land in the first cell
        if !(value >= 0.0) {
            return 0;
        }
        (value.floor() as u64).min(granularity as u64 - 1) as u32
    }

    /// Clamped cell of a point. Never fails.
    pub fn cell_for_point(&self, point: &Point) -> CellCoordinates {
        CellCoordinates {
            row: Self::clamp_axis(point.y / self.y_step, self.granularity),
            col: Self::clamp_axis(point.x / self.x_step, self.granularity),
        }
    }

    pub fn owner_for_cell_index(&self, cell: usize) -> Result<PartitionId, PartitionError> {
        self.owners
            .get(cell)
            .copied()
            .ok_or(PartitionError::CellOutOfRange {
                cell,
                owners: self.owners.len(),
            })
    }

    pub fn owner_for_cell(&self, cell: CellCoordinates) -> Result<PartitionId, PartitionError> {
        self.owner_for_cell_index(cell.linear_index(self.granularity))
    }

    pub fn owner_for_point(&self, point: &Point) -> Result<PartitionId, PartitionError> {
        self.owner_for_cell(self.cell_for_point(point))
    }

    /// Distinct owners of every cell the rectangle touches, ascending.
    pub fn owners_overlapping_rectangle(
        &self,
        rect: &Rectangle,
    ) -> Result<OwnerSet, PartitionError> {
        let low = self.cell_for_point(&rect.min);
        let high = self.cell_for_point(&rect.max);

        let mut owners = OwnerSet::new();
        for row in low.row..=high.row {
            for col in low.col..=high.col {
                owners.push(self.owner_for_cell(CellCoordinates { row, col })?);
            }
        }
        owners.sort_unstable();
        owners.dedup();
        Ok(owners)
    }

    /// Rectangle covered by a row-major cell index.
    pub fn bounds_for_cell_index(&self, cell: usize) -> Result<Rectangle, PartitionError> {
        if cell >= self.cell_count() {
            return Err(PartitionError::CellOutOfRange {
                cell,
                owners: self.owners.len(),
            });
        }
        let g = self.granularity as usize;
        let (row, col) = ((cell / g) as f64, (cell % g) as f64);
        Ok(Rectangle::new(
            Point::new(col * self.x_step, row * self.y_step),
            Point::new((col + 1.0) * self.x_step, (row + 1.0) * self.y_step),
        ))
    }

    /// Every cell with its shortest distance from `focal`, nearest first.
    /// Equally distant cells stay in row-major order.
    pub fn cells_by_distance(&self, focal: &Point) -> Vec<CellDistance> {
        let mut cells: Vec<_> = (0..self.cell_count())
            .filter_map(|cell| {
                let bounds = self.bounds_for_cell_index(cell).ok()?;
                Some(CellDistance {
                    cell,
                    distance: bounds.min_distance(focal),
                })
            })
            .collect();
        cells.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        cells
    }

    /// Cells owned by a partition, row-major.
    pub fn cells_of(&self, owner: PartitionId) -> Result<&[usize], PartitionError> {
        self.cells_by_owner
            .get(&owner)
            .map(|cells| cells.as_slice())
            .ok_or(PartitionError::UnknownPartition(owner))
    }

    /// Bounding rectangle of every cell owned by a partition.
    pub fn bounds_for_partition(&self, owner: PartitionId) -> Result<Rectangle, PartitionError> {
        let mut bounds: Option<Rectangle> = None;
        for cell in self.cells_of(owner)? {
            let cell_bounds = self.bounds_for_cell_index(*cell)?;
            bounds = Some(match bounds {
                None => cell_bounds,
                Some(acc) => Rectangle::new(
                    Point::new(acc.min.x.min(cell_bounds.min.x), acc.min.y.min(cell_bounds.min.y)),
                    Point::new(acc.max.x.max(cell_bounds.max.x), acc.max.y.max(cell_bounds.max.y)),
                ),
            });
        }
        bounds.ok_or(PartitionError::UnknownPartition(owner))
    }

    /// Distinct partition ids, ascending.
    pub fn partitions(&self) -> Vec<PartitionId> {
        let mut ids: Vec<_> = self.cells_by_owner.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn reassign(
        &mut self,
        cell: usize,
        new_owner: PartitionId,
    ) -> Result<PartitionId, PartitionError> {
        let previous = self.owner_for_cell_index(cell)?;
        self.owners[cell] = new_owner;
        self.rebuild_inverse();
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(granularity: u32) -> OwnershipTable {
        OwnershipTable::new(&GridConfig::uniform(granularity, 10.0, 10.0)).unwrap()
    }

    #[test]
    fn points_map_row_major_with_row_from_y() {
        let grid = table(2);
        assert_eq!(grid.owner_for_point(&Point::new(1.0, 1.0)).unwrap(), 0);
        assert_eq!(grid.owner_for_point(&Point::new(6.0, 1.0)).unwrap(), 1);
        assert_eq!(grid.owner_for_point(&Point::new(1.0, 6.0)).unwrap(), 2);
        assert_eq!(grid.owner_for_point(&Point::new(6.0, 6.0)).unwrap(), 3);
    }

    #[test]
    fn out_of_universe_points_clamp_to_edge_cells() {
        let grid = table(2);
        assert_eq!(grid.owner_for_point(&Point::new(10.0, 10.0)).unwrap(), 3);
        assert_eq!(grid.owner_for_point(&Point::new(250.0, -4.0)).unwrap(), 1);
        assert_eq!(grid.owner_for_point(&Point::new(f64::NAN, 7.0)).unwrap(), 2);
    }

    #[test]
    fn lookups_are_deterministic() {
        let grid = table(4);
        let p = Point::new(3.3, 7.7);
        let first = grid.owner_for_point(&p).unwrap();
        for _ in 0..10 {
            assert_eq!(grid.owner_for_point(&p).unwrap(), first);
        }
    }

    #[test]
    fn rectangle_owners_cover_exactly_the_touched_cells() {
        let grid = table(4);
        let rect = Rectangle::new(Point::new(1.0, 1.0), Point::new(6.0, 3.0));
        let owners = grid.owners_overlapping_rectangle(&rect).unwrap();
        assert_eq!(owners.as_slice(), &[0, 1, 2, 4, 5, 6]);

        let whole = grid.owners_overlapping_rectangle(&grid.universe()).unwrap();
        assert_eq!(whole.len(), 16);
    }

    #[test]
    fn zero_area_rectangle_is_a_point_lookup() {
        let grid = table(4);
        let p = Point::new(8.1, 4.2);
        let owners = grid.owners_overlapping_rectangle(&Rectangle::from_point(p)).unwrap();
        assert_eq!(owners.as_slice(), &[grid.owner_for_point(&p).unwrap()]);
    }

    #[test]
    fn shared_owners_are_deduplicated() {
        let mut config = GridConfig::uniform(2, 10.0, 10.0);
        config.owners = vec![7, 7, 9, 9];
        let grid = OwnershipTable::new(&config).unwrap();
        let owners = grid.owners_overlapping_rectangle(&grid.universe()).unwrap();
        assert_eq!(owners.as_slice(), &[7, 9]);
        assert_eq!(grid.cells_of(9).unwrap(), &[2, 3]);
        assert_eq!(grid.partitions(), vec![7, 9]);
    }

    #[test]
    fn cell_bounds_tile_the_universe() {
        let grid = table(2);
        let bounds = grid.bounds_for_cell_index(3).unwrap();
        assert_eq!(bounds.min, Point::new(5.0, 5.0));
        assert_eq!(bounds.max, Point::new(10.0, 10.0));
        let bounds = grid.bounds_for_cell_index(1).unwrap();
        assert_eq!(bounds.min, Point::new(5.0, 0.0));
        assert!(grid.bounds_for_cell_index(4).is_err());

        let total: f64 = (0..grid.cell_count())
            .map(|i| grid.bounds_for_cell_index(i).unwrap())
            .map(|r| (r.max.x - r.min.x) * (r.max.y - r.min.y))
            .sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn cells_are_ordered_by_distance_from_the_focal_point() {
        let grid = table(4);
        let cells = grid.cells_by_distance(&Point::new(1.0, 1.0));
        assert_eq!(cells.len(), 16);
        let order: Vec<_> = cells.iter().take(4).map(|cell| cell.cell).collect();
        assert_eq!(order, vec![0, 1, 4, 5]);
        assert_eq!(cells[0].distance, 0.0);
        assert_eq!(cells[1].distance, 1.5);
        assert_eq!(cells[15].cell, 15);
        assert!(cells.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
    }

    #[test]
    fn partition_bounds_span_owned_cells() {
        let mut config = GridConfig::uniform(2, 10.0, 10.0);
        config.owners = vec![0, 0, 1, 1];
        let grid = OwnershipTable::new(&config).unwrap();
        let bounds = grid.bounds_for_partition(1).unwrap();
        assert_eq!(bounds.min, Point::new(0.0, 5.0));
        assert_eq!(bounds.max, Point::new(10.0, 10.0));
        assert!(matches!(grid.bounds_for_partition(5), Err(PartitionError::UnknownPartition(5))));
    }

    #[test]
    fn missing_owner_is_a_recoverable_error() {
        let mut config = GridConfig::uniform(2, 10.0, 10.0);
        config.owners.truncate(3);
        let grid = OwnershipTable::new(&config).unwrap();
        assert!(matches!(
            grid.owner_for_point(&Point::new(9.0, 9.0)),
            Err(PartitionError::CellOutOfRange { cell: 3, owners: 3 })
        ));
        assert!(grid.owners_overlapping_rectangle(&grid.universe()).is_err());
        assert_eq!(grid.owner_for_point(&Point::new(1.0, 9.0)).unwrap(), 2);
    }

    #[test]
    fn invalid_grid_is_rejected() {
        let config = GridConfig::uniform(0, 10.0, 10.0);
        assert!(matches!(OwnershipTable::new(&config), Err(PartitionError::InvalidGrid(_))));
    }
}
