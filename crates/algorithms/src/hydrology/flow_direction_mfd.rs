//! Multiple Flow Direction (MFD) weights
//!
//! Distributes flow from each cell to ALL strictly downslope neighbors,
//! proportional to a power of the slope towards each of them.
//!
//! The flow fraction to neighbor i is:
//!   f_i = tan_i^p / Σ tan_j^p      (over downslope neighbors only)
//! where tan_i = (z - z_i) / distance_i and p is the convergence
//! exponent (default 1.1, Freeman 1991 / Quinn et al. 1991). Higher p
//! concentrates flow and approaches D8 as p → ∞.
//!
//! References:
//! - Freeman, G.T. (1991). Calculating catchment area with divergent flow
//!   based on a regular grid. *Computers and Geosciences*, 17, 413–422.
//! - Quinn, P. et al. (1991). The prediction of hillslope flow paths.
//!   *Hydrological Processes*, 5(1), 59–79.

use ndarray::{s, Array3, ArrayView1};
use serde::{Deserialize, Serialize};

use super::flow_direction::map_cells;
use flowroute_core::raster::Raster;
use flowroute_core::{Error, Progress, Result};

/// Parameters for MFD flow partitioning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MfdParams {
    /// Convergence exponent (p).
    /// p=1.0: original Quinn et al. 1991
    /// p=1.1: recommended default
    /// Default: 1.1
    pub exponent: f64,
}

impl Default for MfdParams {
    fn default() -> Self {
        Self { exponent: 1.1 }
    }
}

impl MfdParams {
    pub(crate) fn validate(&self) -> Result<()> {
        if !self.exponent.is_finite() || self.exponent < 0.0 {
            return Err(Error::invalid_parameter(
                "exponent",
                self.exponent,
                "convergence exponent must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

/// Per-cell MFD weights, one per D8 direction code.
///
/// Weights of a cell sum to 1 when it has at least one downslope
/// neighbor and are all zero otherwise (sinks and no-data cells).
#[derive(Debug, Clone)]
pub struct MfdWeights {
    weights: Array3<f64>,
}

impl MfdWeights {
    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        let (rows, cols, _) = self.weights.dim();
        (rows, cols)
    }

    /// The eight weights of (row, col), indexed by direction code
    pub fn cell(&self, row: usize, col: usize) -> ArrayView1<'_, f64> {
        self.weights.slice(s![row, col, ..])
    }

    /// Weight of the edge from (row, col) in direction `dir`
    pub fn weight(&self, row: usize, col: usize, dir: u8) -> f64 {
        if dir >= 8 {
            return 0.0;
        }
        self.weights
            .get((row, col, dir as usize))
            .copied()
            .unwrap_or(0.0)
    }

    /// Sum of the outgoing weights of (row, col)
    pub fn total(&self, row: usize, col: usize) -> f64 {
        self.cell(row, col).sum()
    }
}

/// Normalised MFD weights of a single cell.
pub(crate) fn mfd_cell_weights(dem: &Raster<f64>, row: usize, col: usize, exponent: f64) -> [f64; 8] {
    let mut weights = [0.0_f64; 8];

    let z = unsafe { dem.get_unchecked(row, col) };
    if dem.is_nodata(z) {
        return weights;
    }

    // Scaled by the steepest slope: the largest term is exactly 1
    let mut steepest = 0.0_f64;
    for (dir, _, _, nz) in dem.neighbors(row, col) {
        let drop = z - nz;
        if drop > 0.0 {
            let tan = drop / dem.edge_length(dir);
            weights[dir as usize] = tan;
            steepest = steepest.max(tan);
        }
    }
    if !steepest.is_finite() || steepest <= 0.0 {
        return [0.0; 8];
    }

    let mut sum = 0.0_f64;
    for w in weights.iter_mut().filter(|w| **w > 0.0) {
        *w = (*w / steepest).powf(exponent);
        sum += *w;
    }
    for w in weights.iter_mut() {
        *w /= sum;
    }
    weights
}

/// Compute MFD flow partition weights for every cell of a DEM.
///
/// Out-of-grid and no-data neighbors never receive flow.
pub fn flow_direction_mfd(
    dem: &Raster<f64>,
    params: MfdParams,
    progress: &dyn Progress,
) -> Result<MfdWeights> {
    params.validate()?;
    let (rows, cols) = dem.shape();
    let p = params.exponent;

    let per_cell = map_cells(dem, progress, |row, col| mfd_cell_weights(dem, row, col, p))?;
    let flat: Vec<f64> = per_cell.into_iter().flatten().collect();
    let weights = Array3::from_shape_vec((rows, cols, 8), flat)
        .map_err(|e| Error::Other(e.to_string()))?;

    tracing::debug!(rows, cols, exponent = p, "MFD weights resolved");
    Ok(MfdWeights { weights })
}
