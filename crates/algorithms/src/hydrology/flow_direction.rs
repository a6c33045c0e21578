//! D8 flow direction algorithm
//!
//! Calculates the direction of flow from each cell to its steepest
//! downslope neighbor using the D8 (deterministic eight-node) method.
//!
//! Flow direction encoding (clockwise from north):
//! ```text
//!   7  0  1
//!   6  8  2
//!   5  4  3
//! ```
//! 8 = sink (no downslope neighbor), 255 = no-data cell

use ndarray::Array2;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::maybe_rayon::*;
use flowroute_core::raster::{d8, Raster};
use flowroute_core::{Algorithm, Error, NoProgress, Progress, Result};

/// Flow direction algorithm (D8)
#[derive(Debug, Clone, Default)]
pub struct FlowDirection;

impl Algorithm for FlowDirection {
    type Input = Raster<f64>;
    type Output = Raster<u8>;
    type Params = ();
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Direction (D8)"
    }

    fn description(&self) -> &'static str {
        "Calculate D8 steepest-descent flow direction from a DEM"
    }

    fn execute(&self, input: Self::Input, _params: Self::Params) -> Result<Self::Output> {
        flow_direction(&input, &NoProgress)
    }
}

/// Steepest downslope neighbour of (row, col).
///
/// Only in-grid, valid neighbours with strictly lower elevation qualify.
/// On equal drops the first direction in enumeration order wins.
pub(crate) fn steepest_descent(dem: &Raster<f64>, row: usize, col: usize) -> u8 {
    let z = unsafe { dem.get_unchecked(row, col) };
    if dem.is_nodata(z) {
        return d8::NODATA;
    }

    let mut max_drop = 0.0_f64;
    let mut best_dir = d8::SINK;

    for (dir, _, _, nz) in dem.neighbors(row, col) {
        let drop = (z - nz) / dem.edge_length(dir);
        if drop > max_drop {
            max_drop = drop;
            best_dir = dir;
        }
    }

    best_dir
}

/// Run `cell_fn` over every cell, row-parallel, polling `progress` once per row.
pub(crate) fn map_cells<T, F>(
    dem: &Raster<f64>,
    progress: &dyn Progress,
    cell_fn: F,
) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize, usize) -> T + Sync,
{
    let (rows, cols) = dem.shape();
    if rows == 0 || cols == 0 {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let done = AtomicUsize::new(0);
    let per_row: Option<Vec<Vec<T>>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            if progress.is_cancelled() {
                return None;
            }
            let row_data = (0..cols).map(|col| cell_fn(row, col)).collect::<Vec<T>>();
            progress.set_progress(done.fetch_add(1, Ordering::Relaxed) + 1, rows);
            Some(row_data)
        })
        .collect();

    match per_row {
        Some(per_row) => Ok(per_row.into_iter().flatten().collect()),
        None => {
            let processed = done.load(Ordering::Relaxed) * cols;
            tracing::warn!(processed, "flow direction pass cancelled");
            Err(Error::Cancelled {
                processed,
                total: rows * cols,
            })
        }
    }
}

/// Calculate D8 flow direction from a DEM.
///
/// The input DEM should ideally be hydrologically conditioned (sinks
/// filled or streams burned) for meaningful drainage networks.
///
/// # Returns
/// Raster<u8> with codes `0..=7`, [`d8::SINK`] for cells without a
/// downslope neighbour and [`d8::NODATA`] (the raster's no-data value)
/// for no-data cells.
pub fn flow_direction(dem: &Raster<f64>, progress: &dyn Progress) -> Result<Raster<u8>> {
    let (rows, cols) = dem.shape();
    let output_data = map_cells(dem, progress, |row, col| steepest_descent(dem, row, col))?;

    let mut output = dem.with_same_meta::<u8>(d8::SINK, Some(d8::NODATA));
    *output.data_mut() = Array2::from_shape_vec((rows, cols), output_data)
        .map_err(|e| Error::Other(e.to_string()))?;

    tracing::debug!(rows, cols, "D8 flow direction resolved");
    Ok(output)
}
