//! Unified direction field
//!
//! [`FlowRouting`] lets every sweep treat D8 (one receiver, weight 1) and
//! MFD (several receivers, weights summing to 1) the same way: a cell
//! has receivers it sends to, and donors that send to it.

use serde::{Deserialize, Serialize};

use super::flow_direction::flow_direction;
use super::flow_direction_mfd::{flow_direction_mfd, MfdParams, MfdWeights};
use flowroute_core::raster::{d8, Raster};
use flowroute_core::{Progress, Result};

/// Flow routing method selector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum RoutingMethod {
    /// Single steepest-descent receiver
    #[default]
    D8,
    /// Slope-weighted receivers with convergence exponent
    Mfd { exponent: f64 },
}

impl RoutingMethod {
    /// MFD with the default convergence exponent
    pub fn mfd() -> Self {
        RoutingMethod::Mfd {
            exponent: MfdParams::default().exponent,
        }
    }
}

/// Direction field over a grid
#[derive(Debug, Clone)]
pub enum FlowRouting {
    D8(Raster<u8>),
    Mfd(MfdWeights),
}

impl FlowRouting {
    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        match self {
            FlowRouting::D8(dirs) => dirs.shape(),
            FlowRouting::Mfd(weights) => weights.shape(),
        }
    }

    /// Fraction of the flow of (row, col) sent in direction `dir`
    pub fn weight(&self, row: usize, col: usize, dir: u8) -> f64 {
        match self {
            FlowRouting::D8(dirs) => match dirs.get(row, col) {
                Ok(code) if code == dir && d8::is_flow(code) => 1.0,
                _ => 0.0,
            },
            FlowRouting::Mfd(weights) => weights.weight(row, col, dir),
        }
    }

    /// Whether (row, col) sends flow in direction `dir`
    pub fn drains_into(&self, row: usize, col: usize, dir: u8) -> bool {
        self.weight(row, col, dir) > 0.0
    }

    /// Receivers of (row, col) as `(dir, row, col, weight)`
    pub fn receivers(&self, row: usize, col: usize) -> impl Iterator<Item = (u8, usize, usize, f64)> + '_ {
        let (rows, cols) = self.shape();
        (0..8u8).filter_map(move |dir| {
            let w = self.weight(row, col, dir);
            if w.is_nan() || w <= 0.0 {
                return None;
            }
            let (nr, nc) = d8::step(row, col, dir, rows, cols)?;
            Some((dir, nr, nc, w))
        })
    }

    /// Donors of (row, col) as `(dir, row, col, weight)`, where `dir`
    /// points from (row, col) to the donor and `weight` is the fraction
    /// of the donor's flow arriving here
    pub fn donors(&self, row: usize, col: usize) -> impl Iterator<Item = (u8, usize, usize, f64)> + '_ {
        let (rows, cols) = self.shape();
        (0..8u8).filter_map(move |dir| {
            let (nr, nc) = d8::step(row, col, dir, rows, cols)?;
            let w = self.weight(nr, nc, d8::opposite(dir));
            (w > 0.0).then_some((dir, nr, nc, w))
        })
    }

    /// Whether (row, col) has no receiver (sink, flat, edge or no-data)
    pub fn is_terminal(&self, row: usize, col: usize) -> bool {
        self.receivers(row, col).next().is_none()
    }

    /// The D8 direction raster, if this is a D8 field
    pub fn as_d8(&self) -> Option<&Raster<u8>> {
        match self {
            FlowRouting::D8(dirs) => Some(dirs),
            FlowRouting::Mfd(_) => None,
        }
    }
}

/// Resolve the direction field of `dem` with the chosen method.
pub fn resolve_routing(
    dem: &Raster<f64>,
    method: RoutingMethod,
    progress: &dyn Progress,
) -> Result<FlowRouting> {
    match method {
        RoutingMethod::D8 => Ok(FlowRouting::D8(flow_direction(dem, progress)?)),
        RoutingMethod::Mfd { exponent } => Ok(FlowRouting::Mfd(flow_direction_mfd(
            dem,
            MfdParams { exponent },
            progress,
        )?)),
    }
}
