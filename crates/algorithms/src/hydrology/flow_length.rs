//! Flow path length
//!
//! Longest weighted path length along the direction field, either from
//! each cell down to its terminal cell or from the drainage divide down
//! to each cell. Edge lengths come from the grid transform (cell size for
//! cardinal steps, cell size × √2 for diagonals).

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::flow_accumulation::{ensure_index_shape, ensure_routing_shape, mark_unprocessed, sweep};
use super::routing::FlowRouting;
use super::sorted_index::{SortOrder, SortedIndex};
use flowroute_core::raster::Raster;
use flowroute_core::{Progress, Result};

/// Which end of the flow path the length is measured from.
///
/// On a ramp draining left to right, `Downstream` is largest at the
/// leftmost cell (the whole path still ahead of it) and `Upstream` is
/// largest at the rightmost cell (the whole path behind it). The
/// "downstream length reaching 4 × cell size at the outlet" reading of a
/// 1×5 ramp is the `Upstream` measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FlowLengthDirection {
    /// Distance from the cell down to where its flow terminates
    #[default]
    Downstream,
    /// Longest path arriving at the cell, measured from the divide;
    /// the length flow has travelled by the time it reaches the cell
    Upstream,
}

/// Parameters for [`flow_length`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowLengthParams<'a> {
    pub direction: FlowLengthDirection,
    /// Optional per-cell multiplier of edge lengths (friction, travel
    /// time per unit length). No-data weights count as zero.
    pub weights: Option<&'a Raster<f64>>,
}

/// Output of [`flow_length`]
#[derive(Debug, Clone)]
pub struct FlowLengthOutput {
    /// Path lengths in map units, NaN at no-data cells
    pub length: Raster<f64>,
    /// False when the sweep was cancelled
    pub completed: bool,
}

/// Compute flow path lengths.
///
/// Downstream lengths sweep low to high, so every receiver is final when
/// a cell reads it; the weight applied to an edge is the receiver's.
/// Upstream lengths sweep high to low, each cell pushing its candidate
/// into its receivers; the weight applied is the sending cell's. Under
/// MFD the longest branch wins.
pub fn flow_length(
    dem: &Raster<f64>,
    index: &SortedIndex,
    routing: &FlowRouting,
    params: FlowLengthParams<'_>,
    progress: &dyn Progress,
) -> Result<FlowLengthOutput> {
    ensure_routing_shape(dem, routing)?;
    ensure_index_shape(dem, index)?;
    if let Some(weights) = params.weights {
        dem.ensure_same_shape(weights)?;
    }

    let weight_at = |row: usize, col: usize| match params.weights {
        Some(w) => {
            let v = unsafe { w.get_unchecked(row, col) };
            if w.is_nodata(v) { 0.0 } else { v }
        }
        None => 1.0,
    };

    let mut length = Array2::from_elem(dem.shape(), f64::NAN);

    let (order, cancelled) = match params.direction {
        FlowLengthDirection::Downstream => {
            let order = SortOrder::Ascending;
            let cancelled = sweep(index, order, progress, |row, col| {
                let mut longest = 0.0_f64;
                for (dir, nr, nc, _) in routing.receivers(row, col) {
                    let below = length[(nr, nc)];
                    if below.is_nan() {
                        continue;
                    }
                    longest = longest.max(below + dem.edge_length(dir) * weight_at(nr, nc));
                }
                length[(row, col)] = longest;
            });
            (order, cancelled)
        }
        FlowLengthDirection::Upstream => {
            let order = SortOrder::Descending;
            for (row, col) in index.iter(order) {
                length[(row, col)] = 0.0;
            }
            let cancelled = sweep(index, order, progress, |row, col| {
                let here = length[(row, col)];
                let w = weight_at(row, col);
                for (dir, nr, nc, _) in routing.receivers(row, col) {
                    let target = &mut length[(nr, nc)];
                    if target.is_nan() {
                        continue;
                    }
                    *target = target.max(here + dem.edge_length(dir) * w);
                }
            });
            (order, cancelled)
        }
    };

    if let Some(n) = cancelled {
        mark_unprocessed(index, order, n, &mut [&mut length]);
    }

    tracing::debug!(
        direction = ?params.direction,
        cells = index.len(),
        completed = cancelled.is_none(),
        "flow length computed"
    );

    let mut output = dem.with_same_meta::<f64>(f64::NAN, Some(f64::NAN));
    *output.data_mut() = length;
    Ok(FlowLengthOutput {
        length: output,
        completed: cancelled.is_none(),
    })
}
