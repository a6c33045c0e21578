//! Sorted cell index
//!
//! A strict total order over all valid cells of a grid, by value, with
//! the row-major scan position as tie-break. Sweeping the index from
//! highest to lowest visits every cell after all cells that drain into it
//! (flow only goes to strictly lower cells), which replaces an explicit
//! topological sort of the drainage graph.

use flowroute_core::raster::Raster;
use flowroute_core::{Error, Progress, Result};
use serde::{Deserialize, Serialize};

/// Sweep direction through a [`SortedIndex`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Lowest value first
    Ascending,
    /// Highest value first
    Descending,
}

/// Owned permutation of the valid cells of a grid, ordered by value.
///
/// Stored ascending by `(value, row * cols + col)`; descending iteration
/// walks the same permutation backwards, so the two orders are exact
/// reverses of each other.
#[derive(Debug, Clone)]
pub struct SortedIndex {
    cells: Vec<(usize, usize)>,
    ranks: Vec<u32>,
    cols: usize,
}

/// Rank stored for cells that are not part of the index
const NO_RANK: u32 = u32::MAX;

impl SortedIndex {
    /// Build the index over all valid cells of `grid`.
    ///
    /// A grid without valid cells yields an empty index; callers treat
    /// that as a no-op. A grid with zero rows or columns is an error.
    pub fn build(grid: &Raster<f64>, progress: &dyn Progress) -> Result<Self> {
        let (rows, cols) = grid.shape();
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }
        if rows * cols >= NO_RANK as usize {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }

        let mut keyed: Vec<(f64, usize)> = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                let z = unsafe { grid.get_unchecked(row, col) };
                if !grid.is_nodata(z) {
                    keyed.push((z, row * cols + col));
                }
            }
            progress.set_progress(row + 1, rows);
        }

        // Scan positions are unique, so the order is strict
        keyed.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut ranks = vec![NO_RANK; rows * cols];
        let cells = keyed
            .iter()
            .enumerate()
            .map(|(rank, &(_, pos))| {
                ranks[pos] = rank as u32;
                (pos / cols, pos % cols)
            })
            .collect::<Vec<_>>();

        tracing::debug!(valid = cells.len(), total = rows * cols, "sorted index built");

        Ok(Self { cells, ranks, cols })
    }

    /// Number of indexed (valid) cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Dimensions of the indexed grid as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.ranks.len() / self.cols, self.cols)
    }

    /// Whether the grid had no valid cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cell at position `n` of the sweep in `order`
    pub fn get(&self, order: SortOrder, n: usize) -> Option<(usize, usize)> {
        if n >= self.cells.len() {
            return None;
        }
        match order {
            SortOrder::Ascending => Some(self.cells[n]),
            SortOrder::Descending => Some(self.cells[self.cells.len() - 1 - n]),
        }
    }

    /// Iterate cells in sweep order
    pub fn iter(&self, order: SortOrder) -> Box<dyn Iterator<Item = (usize, usize)> + '_> {
        match order {
            SortOrder::Ascending => Box::new(self.cells.iter().copied()),
            SortOrder::Descending => Box::new(self.cells.iter().rev().copied()),
        }
    }

    /// Ascending rank of (row, col), `None` for cells not in the index
    pub fn rank_of(&self, row: usize, col: usize) -> Option<usize> {
        if col >= self.cols {
            return None;
        }
        match self.ranks.get(row * self.cols + col) {
            Some(&r) if r != NO_RANK => Some(r as usize),
            _ => None,
        }
    }

    /// Position of (row, col) in a sweep in `order`
    pub fn position(&self, order: SortOrder, row: usize, col: usize) -> Option<usize> {
        let rank = self.rank_of(row, col)?;
        Some(match order {
            SortOrder::Ascending => rank,
            SortOrder::Descending => self.cells.len() - 1 - rank,
        })
    }
}
