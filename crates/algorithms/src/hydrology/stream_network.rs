//! Stream network extraction
//!
//! Builds a channel mask either by thresholding flow accumulation
//! (cells with accumulation >= threshold are channels) or by keeping
//! cells whose Strahler order reaches a minimum.
//!
//! The output is a binary raster (1 = channel, 0 = hillslope, 255 =
//! no-data). It feeds basin labelling from channels and stream burning.

use ndarray::Zip;
use serde::{Deserialize, Serialize};

use super::stream_order::ORDER_NODATA;
use flowroute_core::raster::{d8, Raster};
use flowroute_core::{Error, Result};

/// Parameters for stream network extraction
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamNetworkParams {
    /// Flow accumulation threshold, in the unit of the accumulation grid.
    /// Cells with accumulation >= this value are classified as channels.
    /// Default: 1000.0
    pub threshold: f64,
}

impl Default for StreamNetworkParams {
    fn default() -> Self {
        Self { threshold: 1000.0 }
    }
}

/// Extract a channel mask from flow accumulation.
///
/// # Arguments
/// * `flow_acc` - Flow accumulation raster (from `flow_accumulation`)
/// * `params` - Stream network parameters (threshold)
///
/// # Returns
/// Raster<u8> with 1 = channel, 0 = non-channel, 255 = no-data
pub fn stream_network(flow_acc: &Raster<f64>, params: StreamNetworkParams) -> Result<Raster<u8>> {
    if params.threshold.is_nan() {
        return Err(Error::invalid_parameter(
            "threshold",
            params.threshold,
            "threshold must be a number",
        ));
    }
    let threshold = params.threshold;

    let mut output = flow_acc.with_same_meta::<u8>(0, Some(d8::NODATA));
    Zip::from(output.data_mut())
        .and(flow_acc.data())
        .for_each(|out, &acc| {
            *out = if flow_acc.is_nodata(acc) {
                d8::NODATA
            } else {
                u8::from(acc >= threshold)
            };
        });

    tracing::debug!(threshold, "stream network extracted");
    Ok(output)
}

/// Channel mask of cells whose Strahler order is at least `min_order`.
pub fn channels_from_order(order: &Raster<i32>, min_order: i32) -> Result<Raster<u8>> {
    if min_order < 1 {
        return Err(Error::invalid_parameter(
            "min_order",
            min_order,
            "Strahler orders start at 1",
        ));
    }

    let mut output = order.with_same_meta::<u8>(0, Some(d8::NODATA));
    Zip::from(output.data_mut())
        .and(order.data())
        .for_each(|out, &o| {
            *out = if o == ORDER_NODATA {
                d8::NODATA
            } else {
                u8::from(o >= min_order)
            };
        });
    Ok(output)
}
