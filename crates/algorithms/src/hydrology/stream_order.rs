//! Strahler stream order
//!
//! Orders every cell of a D8 drainage graph: headwater cells are order 1,
//! and where two or more inflows of the highest order meet the order
//! increases by one. A descending sweep sees every donor before its
//! receiver, so each cell's inflows are complete when it is reached.
//!
//! Reference:
//! Strahler, A.N. (1957). Quantitative analysis of watershed geomorphology.
//! *Transactions of the American Geophysical Union*, 38(6), 913–920.

use ndarray::Array2;

use super::sorted_index::{SortOrder, SortedIndex};
use flowroute_core::raster::{d8, Raster};
use flowroute_core::{Error, Progress, Result};

/// No-data value of the order raster
pub const ORDER_NODATA: i32 = -1;

/// Output of [`strahler_order`]
#[derive(Debug, Clone)]
pub struct StreamOrderOutput {
    /// Strahler order, [`ORDER_NODATA`] at no-data cells
    pub order: Raster<i32>,
    /// Number of D8 inflows per cell, 255 at no-data cells
    pub connectivity: Raster<u8>,
    /// False when the sweep was cancelled
    pub completed: bool,
}

/// Strahler order and inflow count of a D8 direction field.
///
/// `index` must have been built from the grid `flow_dir` was derived
/// from.
pub fn strahler_order(
    index: &SortedIndex,
    flow_dir: &Raster<u8>,
    progress: &dyn Progress,
) -> Result<StreamOrderOutput> {
    let (rows, cols) = flow_dir.shape();
    let (ir, ic) = index.shape();
    if (rows, cols) != (ir, ic) {
        return Err(Error::SizeMismatch {
            er: ir,
            ec: ic,
            ar: rows,
            ac: cols,
        });
    }

    let mut order = Array2::from_elem((rows, cols), ORDER_NODATA);
    let mut connectivity = Array2::from_elem((rows, cols), d8::NODATA);
    // Highest inflow order seen so far, and how many inflows carry it
    let mut max_in = Array2::<i32>::zeros((rows, cols));
    let mut max_count = Array2::<u8>::zeros((rows, cols));

    for (row, col) in index.iter(SortOrder::Descending) {
        connectivity[(row, col)] = 0;
    }

    let total = index.len();
    let mut cancelled_at = None;
    for (n, (row, col)) in index.iter(SortOrder::Descending).enumerate() {
        if progress.is_cancelled() {
            tracing::warn!(processed = n, total, "stream order sweep cancelled");
            cancelled_at = Some(n);
            break;
        }

        let o = match (max_in[(row, col)], max_count[(row, col)]) {
            (0, _) => 1,
            (m, c) if c >= 2 => m + 1,
            (m, _) => m,
        };
        order[(row, col)] = o;

        let dir = unsafe { flow_dir.get_unchecked(row, col) };
        if let Some((nr, nc)) = flow_dir.neighbor(row, col, dir) {
            if connectivity[(nr, nc)] != d8::NODATA {
                connectivity[(nr, nc)] += 1;
                if o > max_in[(nr, nc)] {
                    max_in[(nr, nc)] = o;
                    max_count[(nr, nc)] = 1;
                } else if o == max_in[(nr, nc)] {
                    max_count[(nr, nc)] += 1;
                }
            }
        }
        progress.set_progress(n + 1, total);
    }

    if let Some(n) = cancelled_at {
        for (row, col) in index.iter(SortOrder::Descending).skip(n) {
            order[(row, col)] = ORDER_NODATA;
            connectivity[(row, col)] = d8::NODATA;
        }
    }

    let max_order = order.iter().copied().max().unwrap_or(ORDER_NODATA);
    tracing::debug!(max_order, completed = cancelled_at.is_none(), "Strahler order computed");

    let mut order_raster = flow_dir.with_same_meta::<i32>(ORDER_NODATA, Some(ORDER_NODATA));
    *order_raster.data_mut() = order;
    let mut conn_raster = flow_dir.with_same_meta::<u8>(d8::NODATA, Some(d8::NODATA));
    *conn_raster.data_mut() = connectivity;

    Ok(StreamOrderOutput {
        order: order_raster,
        connectivity: conn_raster,
        completed: cancelled_at.is_none(),
    })
}
