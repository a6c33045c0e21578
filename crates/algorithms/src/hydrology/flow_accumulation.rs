//! Flow accumulation algorithm
//!
//! Propagates a per-cell contribution (a cell count, an area, or any
//! weight) downslope along a D8 or MFD direction field. Cells are visited
//! from the highest to the lowest elevation, so when a cell passes its
//! value on, every cell draining into it has already done so. One pass,
//! O(N) after sorting, no recursion.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::flow_direction::steepest_descent;
use super::routing::{resolve_routing, FlowRouting, RoutingMethod};
use super::sorted_index::{SortOrder, SortedIndex};
use flowroute_core::raster::Raster;
use flowroute_core::{Algorithm, Error, NoProgress, Progress, Result};

/// Unit of the accumulated value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FlowUnit {
    /// Number of contributing cells
    #[default]
    Cells,
    /// Contributing area (cells × cell area)
    Area,
}

/// Parameters for [`flow_accumulation`]
#[derive(Debug, Clone, Default)]
pub struct AccumulationParams<'a> {
    /// Direction method used to route flow
    pub routing: RoutingMethod,
    /// Output unit
    pub unit: FlowUnit,
    /// Optional weight multiplying each cell's own contribution.
    /// No-data weights contribute nothing.
    pub weights: Option<&'a Raster<f64>>,
    /// Clamp negative accumulated flow to zero before passing it on,
    /// recording the clamped amount in the `loss` output
    pub no_negatives: bool,
    /// Cells whose accumulated flow (in cells) reaches this threshold
    /// route everything to their D8 steepest neighbor, even under MFD
    pub linear_threshold: Option<f64>,
    /// Optional grid whose contribution-weighted mean over each cell's
    /// catchment is reported in `upslope_mean`
    pub upslope_mean_of: Option<&'a Raster<f64>>,
}

/// Result of the bare accumulation sweep
#[derive(Debug, Clone)]
pub struct Accumulated {
    /// Accumulated values, NaN at no-data cells
    pub grid: Raster<f64>,
    /// False when the sweep was cancelled; unprocessed cells are NaN
    pub completed: bool,
}

/// Outputs of [`flow_accumulation`]
#[derive(Debug, Clone)]
pub struct AccumulationOutput {
    /// Accumulated flow in the requested unit
    pub flow: Raster<f64>,
    /// Average distance travelled by the flow arriving at each cell
    pub mean_flow_length: Raster<f64>,
    /// Catchment mean of `upslope_mean_of`, if requested
    pub upslope_mean: Option<Raster<f64>>,
    /// Negative flow removed at each cell, if `no_negatives` was set
    pub loss: Option<Raster<f64>>,
    /// False when the sweep was cancelled
    pub completed: bool,
}

/// Flow accumulation algorithm
#[derive(Debug, Clone, Default)]
pub struct FlowAccumulation;

impl Algorithm for FlowAccumulation {
    type Input = Raster<f64>;
    type Output = AccumulationOutput;
    type Params = AccumulationParams<'static>;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Flow Accumulation"
    }

    fn description(&self) -> &'static str {
        "Top-down accumulation of contributing area along D8 or MFD flow directions"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        flow_accumulation(&input, params, &NoProgress)
    }
}

/// Visit cells from highest to lowest, polling `progress` once per cell.
///
/// Returns the number of processed cells if the sweep was cancelled.
pub(crate) fn sweep<F>(
    index: &SortedIndex,
    order: SortOrder,
    progress: &dyn Progress,
    mut visit: F,
) -> Option<usize>
where
    F: FnMut(usize, usize),
{
    let total = index.len();
    for (n, (row, col)) in index.iter(order).enumerate() {
        if progress.is_cancelled() {
            tracing::warn!(processed = n, total, "sweep cancelled");
            return Some(n);
        }
        visit(row, col);
        progress.set_progress(n + 1, total);
    }
    None
}

/// Set every cell at sweep position `from..` to NaN in each grid.
pub(crate) fn mark_unprocessed(
    index: &SortedIndex,
    order: SortOrder,
    from: usize,
    grids: &mut [&mut Array2<f64>],
) {
    for (row, col) in index.iter(order).skip(from) {
        for grid in grids.iter_mut() {
            grid[(row, col)] = f64::NAN;
        }
    }
}

pub(crate) fn ensure_routing_shape(dem: &Raster<f64>, routing: &FlowRouting) -> Result<()> {
    let (er, ec) = dem.shape();
    let (ar, ac) = routing.shape();
    if er != ar || ec != ac {
        return Err(Error::SizeMismatch { er, ec, ar, ac });
    }
    Ok(())
}

pub(crate) fn ensure_index_shape(dem: &Raster<f64>, index: &SortedIndex) -> Result<()> {
    let (er, ec) = dem.shape();
    let (ar, ac) = index.shape();
    if er != ar || ec != ac {
        return Err(Error::SizeMismatch { er, ec, ar, ac });
    }
    Ok(())
}

/// Accumulate `contribution` along `routing`.
///
/// Every valid cell starts at its own contribution; sweeping `index`
/// from highest to lowest, each cell adds its current value, split by
/// its receiver weights, to its receivers. No-data cells stay NaN and
/// neither give nor receive.
pub fn accumulate<F>(
    dem: &Raster<f64>,
    index: &SortedIndex,
    routing: &FlowRouting,
    contribution: F,
    progress: &dyn Progress,
) -> Result<Accumulated>
where
    F: Fn(usize, usize) -> f64,
{
    ensure_routing_shape(dem, routing)?;
    ensure_index_shape(dem, index)?;

    let mut acc = Array2::from_elem(dem.shape(), f64::NAN);
    for (row, col) in index.iter(SortOrder::Ascending) {
        acc[(row, col)] = contribution(row, col);
    }

    let cancelled = sweep(index, SortOrder::Descending, progress, |row, col| {
        let value = acc[(row, col)];
        for (_, nr, nc, w) in routing.receivers(row, col) {
            if dem.is_valid(nr, nc) {
                acc[(nr, nc)] += value * w;
            }
        }
    });

    if let Some(n) = cancelled {
        mark_unprocessed(index, SortOrder::Descending, n, &mut [&mut acc]);
    }

    let mut grid = dem.with_same_meta::<f64>(f64::NAN, Some(f64::NAN));
    *grid.data_mut() = acc;
    Ok(Accumulated {
        grid,
        completed: cancelled.is_none(),
    })
}

/// Compute flow accumulation from a DEM.
///
/// Builds the sorted index and direction field, then runs
/// [`accumulate_flow`].
pub fn flow_accumulation(
    dem: &Raster<f64>,
    params: AccumulationParams<'_>,
    progress: &dyn Progress,
) -> Result<AccumulationOutput> {
    validate_params(dem, &params)?;
    let index = SortedIndex::build(dem, progress)?;
    let routing = resolve_routing(dem, params.routing, progress)?;
    accumulate_flow(dem, &index, &routing, &params, progress)
}

fn validate_params(dem: &Raster<f64>, params: &AccumulationParams<'_>) -> Result<()> {
    if let Some(weights) = params.weights {
        dem.ensure_same_shape(weights)?;
    }
    if let Some(values) = params.upslope_mean_of {
        dem.ensure_same_shape(values)?;
    }
    if let Some(t) = params.linear_threshold {
        if !t.is_finite() || t < 0.0 {
            return Err(Error::invalid_parameter(
                "linear_threshold",
                t,
                "threshold must be finite and non-negative",
            ));
        }
    }
    Ok(())
}

/// Full accumulation over a prepared index and direction field.
///
/// Besides the flow itself this tracks, in the same sweep, the
/// flow-weighted travel distance (reported as a mean) and optionally
/// the catchment mean of an input grid and the negative flow removed.
pub fn accumulate_flow(
    dem: &Raster<f64>,
    index: &SortedIndex,
    routing: &FlowRouting,
    params: &AccumulationParams<'_>,
    progress: &dyn Progress,
) -> Result<AccumulationOutput> {
    validate_params(dem, params)?;
    ensure_routing_shape(dem, routing)?;
    ensure_index_shape(dem, index)?;

    let shape = dem.shape();
    let mut flow = Array2::from_elem(shape, f64::NAN);
    let mut length = Array2::from_elem(shape, f64::NAN);
    let mut value_sum = params.upslope_mean_of.map(|_| Array2::from_elem(shape, f64::NAN));
    let mut loss = params.no_negatives.then(|| Array2::from_elem(shape, f64::NAN));

    for (row, col) in index.iter(SortOrder::Ascending) {
        let own = match params.weights {
            Some(w) => {
                let v = unsafe { w.get_unchecked(row, col) };
                if w.is_nodata(v) { 0.0 } else { v }
            }
            None => 1.0,
        };
        flow[(row, col)] = own;
        length[(row, col)] = 0.0;
        if let (Some(sum), Some(values)) = (value_sum.as_mut(), params.upslope_mean_of) {
            let v = unsafe { values.get_unchecked(row, col) };
            sum[(row, col)] = if values.is_nodata(v) { 0.0 } else { own * v };
        }
    }

    let cancelled = sweep(index, SortOrder::Descending, progress, |row, col| {
        let mut f = flow[(row, col)];
        if f < 0.0 {
            if let Some(loss) = loss.as_mut() {
                loss[(row, col)] = -f;
                f = 0.0;
                flow[(row, col)] = 0.0;
            }
        }
        let l = length[(row, col)];
        let v = value_sum.as_ref().map_or(0.0, |s| s[(row, col)]);

        let linear = params.linear_threshold.is_some_and(|t| f >= t);
        let mut pass_on = |dir: u8, nr: usize, nc: usize, w: f64| {
            if !dem.is_valid(nr, nc) {
                return;
            }
            flow[(nr, nc)] += w * f;
            length[(nr, nc)] += w * (l + f * dem.edge_length(dir));
            if let Some(sum) = value_sum.as_mut() {
                sum[(nr, nc)] += w * v;
            }
        };

        if linear {
            let dir = steepest_descent(dem, row, col);
            if let Some((nr, nc)) = dem.neighbor(row, col, dir) {
                pass_on(dir, nr, nc, 1.0);
            }
        } else {
            for (dir, nr, nc, w) in routing.receivers(row, col) {
                pass_on(dir, nr, nc, w);
            }
        }
    });

    if let Some(n) = cancelled {
        let mut grids: Vec<&mut Array2<f64>> = vec![&mut flow, &mut length];
        if let Some(sum) = value_sum.as_mut() {
            grids.push(sum);
        }
        if let Some(loss) = loss.as_mut() {
            grids.push(loss);
        }
        mark_unprocessed(index, SortOrder::Descending, n, &mut grids);
    }

    // Length and value sums are flow-weighted; turn them into means
    // before scaling the flow to its output unit.
    let mut upslope_mean = value_sum;
    ndarray::Zip::from(&mut length)
        .and(&flow)
        .for_each(|l, &f| {
            if !l.is_nan() {
                *l = if f > 0.0 { *l / f } else { 0.0 };
            }
        });
    if let Some(mean) = upslope_mean.as_mut() {
        ndarray::Zip::from(mean).and(&flow).for_each(|m, &f| {
            if !m.is_nan() {
                *m = if f > 0.0 { *m / f } else { 0.0 };
            }
        });
    }
    if params.unit == FlowUnit::Area {
        let area = dem.cell_area();
        flow.mapv_inplace(|f| f * area);
    }

    let wrap = |data: Array2<f64>| {
        let mut r = dem.with_same_meta::<f64>(f64::NAN, Some(f64::NAN));
        *r.data_mut() = data;
        r
    };

    let output = AccumulationOutput {
        flow: wrap(flow),
        mean_flow_length: wrap(length),
        upslope_mean: upslope_mean.map(wrap),
        loss: loss.map(wrap),
        completed: cancelled.is_none(),
    };

    tracing::debug!(
        cells = index.len(),
        completed = output.completed,
        d8 = matches!(routing, FlowRouting::D8(_)),
        "flow accumulated"
    );
    Ok(output)
}

/// Sum of the values at terminal cells (cells without a receiver).
///
/// With unit contributions this equals the number of valid cells: flow
/// is neither created nor lost on the way down.
pub fn terminal_sum(acc: &Raster<f64>, routing: &FlowRouting) -> f64 {
    let (rows, cols) = acc.shape();
    let mut total = 0.0;
    for row in 0..rows {
        for col in 0..cols {
            let v = unsafe { acc.get_unchecked(row, col) };
            if !acc.is_nodata(v) && routing.is_terminal(row, col) {
                total += v;
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::flow_direction::flow_direction;
    use approx::assert_relative_eq;
    use flowroute_core::{CancelToken, GeoTransform};

    fn dem_from_fn(rows: usize, cols: usize, cell: f64, f: impl Fn(usize, usize) -> f64) -> Raster<f64> {
        let mut dem = Raster::new(rows, cols);
        dem.set_transform(GeoTransform::square(cell));
        for row in 0..rows {
            for col in 0..cols {
                dem.set(row, col, f(row, col)).unwrap();
            }
        }
        dem
    }

    fn d8_setup(dem: &Raster<f64>) -> (SortedIndex, FlowRouting) {
        let index = SortedIndex::build(dem, &NoProgress).unwrap();
        let routing = FlowRouting::D8(flow_direction(dem, &NoProgress).unwrap());
        (index, routing)
    }

    #[test]
    fn test_flat_grid_keeps_unit_contribution() {
        let dem = dem_from_fn(3, 3, 1.0, |_, _| 5.0);
        let (index, routing) = d8_setup(&dem);
        let acc = accumulate(&dem, &index, &routing, |_, _| 1.0, &NoProgress).unwrap();

        assert!(acc.completed);
        assert!(acc.grid.data().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_ramp_accumulates_to_outlet() {
        // 5,4,3,2,1 left to right, cell area 4
        let dem = dem_from_fn(1, 5, 2.0, |_, col| (5 - col) as f64);
        let (index, routing) = d8_setup(&dem);
        let area = dem.cell_area();
        let acc = accumulate(&dem, &index, &routing, |_, _| area, &NoProgress).unwrap();

        for col in 0..5 {
            assert_relative_eq!(acc.grid.get(0, col).unwrap(), (col + 1) as f64 * area);
        }
    }

    #[test]
    fn test_pit_collects_its_catchment() {
        //  5 5 5
        //  5 1 5
        //  5 5 5
        let dem = dem_from_fn(3, 3, 1.0, |row, col| if (row, col) == (1, 1) { 1.0 } else { 5.0 });
        let (index, routing) = d8_setup(&dem);
        let acc = accumulate(&dem, &index, &routing, |_, _| 1.0, &NoProgress).unwrap();

        assert!(routing.is_terminal(1, 1));
        assert_eq!(acc.grid.get(1, 1).unwrap(), 9.0);
    }

    #[test]
    fn test_conservation_d8_and_mfd() {
        let dem = dem_from_fn(12, 10, 1.0, |row, col| {
            let cross = (col as f64 - 4.5).abs();
            cross + (11 - row) as f64 * 0.5 + ((row * 3 + col * 7) % 5) as f64 * 0.1
        });
        let index = SortedIndex::build(&dem, &NoProgress).unwrap();

        for method in [RoutingMethod::D8, RoutingMethod::mfd()] {
            let routing = resolve_routing(&dem, method, &NoProgress).unwrap();
            let acc = accumulate(&dem, &index, &routing, |_, _| 1.0, &NoProgress).unwrap();
            assert_relative_eq!(terminal_sum(&acc.grid, &routing), 120.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_nodata_neither_gives_nor_receives() {
        let mut dem = dem_from_fn(1, 4, 1.0, |_, col| (4 - col) as f64);
        dem.set(0, 2, f64::NAN).unwrap();
        let (index, routing) = d8_setup(&dem);
        let acc = accumulate(&dem, &index, &routing, |_, _| 1.0, &NoProgress).unwrap();

        assert_eq!(acc.grid.get(0, 1).unwrap(), 2.0);
        assert!(acc.grid.get(0, 2).unwrap().is_nan());
        assert_eq!(acc.grid.get(0, 3).unwrap(), 1.0);
    }

    #[test]
    fn test_rerun_is_bit_identical() {
        let dem = dem_from_fn(8, 8, 1.0, |row, col| ((row * 13 + col * 7) % 9) as f64 + row as f64);
        let out_a = flow_accumulation(&dem, AccumulationParams { routing: RoutingMethod::mfd(), ..Default::default() }, &NoProgress).unwrap();
        let out_b = flow_accumulation(&dem, AccumulationParams { routing: RoutingMethod::mfd(), ..Default::default() }, &NoProgress).unwrap();

        let bits = |r: &Raster<f64>| r.data().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&out_a.flow), bits(&out_b.flow));
    }

    #[test]
    fn test_area_unit_and_mean_length() {
        let dem = dem_from_fn(1, 5, 10.0, |_, col| (5 - col) as f64);
        let out = flow_accumulation(
            &dem,
            AccumulationParams {
                unit: FlowUnit::Area,
                ..Default::default()
            },
            &NoProgress,
        )
        .unwrap();

        assert_relative_eq!(out.flow.get(0, 4).unwrap(), 500.0);
        // Parcels from cols 0..=4 travelled 40, 30, 20, 10, 0
        assert_relative_eq!(out.mean_flow_length.get(0, 4).unwrap(), 20.0);
        assert_eq!(out.mean_flow_length.get(0, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_weights_and_upslope_mean() {
        let dem = dem_from_fn(1, 3, 1.0, |_, col| (3 - col) as f64);
        let weights = Raster::from_vec(vec![2.0, f64::NAN, 1.0], 1, 3).unwrap();
        let values = Raster::from_vec(vec![10.0, 50.0, 40.0], 1, 3).unwrap();

        let out = flow_accumulation(
            &dem,
            AccumulationParams {
                weights: Some(&weights),
                upslope_mean_of: Some(&values),
                ..Default::default()
            },
            &NoProgress,
        )
        .unwrap();

        assert_eq!(out.flow.get(0, 2).unwrap(), 3.0);
        let mean = out.upslope_mean.unwrap();
        // (2 * 10 + 0 * 50 + 1 * 40) / 3
        assert_relative_eq!(mean.get(0, 2).unwrap(), 20.0);
    }

    #[test]
    fn test_no_negatives_records_loss() {
        let dem = dem_from_fn(1, 3, 1.0, |_, col| (3 - col) as f64);
        let weights = Raster::from_vec(vec![-2.0, 1.0, 1.0], 1, 3).unwrap();

        let out = flow_accumulation(
            &dem,
            AccumulationParams {
                weights: Some(&weights),
                no_negatives: true,
                ..Default::default()
            },
            &NoProgress,
        )
        .unwrap();

        let loss = out.loss.unwrap();
        assert_eq!(loss.get(0, 0).unwrap(), 2.0);
        assert!(loss.get(0, 1).unwrap().is_nan());
        assert_eq!(out.flow.get(0, 0).unwrap(), 0.0);
        assert_eq!(out.flow.get(0, 2).unwrap(), 2.0);
    }

    #[test]
    fn test_linear_threshold_concentrates_mfd() {
        let dem = dem_from_fn(9, 9, 1.0, |row, col| (8 - row) as f64 * 2.0 + (col as f64 - 4.0).abs());
        let spread = flow_accumulation(&dem, AccumulationParams { routing: RoutingMethod::mfd(), ..Default::default() }, &NoProgress).unwrap();
        let linear = flow_accumulation(
            &dem,
            AccumulationParams {
                routing: RoutingMethod::mfd(),
                linear_threshold: Some(1.0),
                ..Default::default()
            },
            &NoProgress,
        )
        .unwrap();
        let d8 = flow_accumulation(&dem, AccumulationParams::default(), &NoProgress).unwrap();

        // A threshold every cell reaches makes MFD behave exactly like D8
        assert_eq!(linear.flow.data(), d8.flow.data());
        assert_ne!(spread.flow.data(), d8.flow.data());
    }

    #[test]
    fn test_weight_shape_mismatch_rejected() {
        let dem = dem_from_fn(3, 3, 1.0, |_, _| 1.0);
        let weights = Raster::filled(2, 3, 1.0);
        let err = flow_accumulation(
            &dem,
            AccumulationParams {
                weights: Some(&weights),
                ..Default::default()
            },
            &NoProgress,
        )
        .unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { .. }));
    }

    #[test]
    fn test_cancelled_sweep_marks_unprocessed() {
        let dem = dem_from_fn(1, 6, 1.0, |_, col| (6 - col) as f64);
        let (index, routing) = d8_setup(&dem);
        let token = CancelToken::after(2);
        let acc = accumulate(&dem, &index, &routing, |_, _| 1.0, &token).unwrap();

        assert!(!acc.completed);
        // The two highest cells were processed; the rest are flagged
        assert_eq!(acc.grid.get(0, 0).unwrap(), 1.0);
        assert_eq!(acc.grid.get(0, 1).unwrap(), 2.0);
        for col in 2..6 {
            assert!(acc.grid.get(0, col).unwrap().is_nan());
        }
    }

    #[test]
    fn test_cancelled_full_sweep_marks_every_output() {
        let dem = dem_from_fn(1, 6, 1.0, |_, col| (6 - col) as f64);
        let (index, routing) = d8_setup(&dem);
        let weights = Raster::from_vec(vec![-2.0, 1.0, 1.0, 1.0, 1.0, 1.0], 1, 6).unwrap();
        let values = Raster::filled(1, 6, 3.0);
        let params = AccumulationParams {
            weights: Some(&weights),
            no_negatives: true,
            upslope_mean_of: Some(&values),
            ..Default::default()
        };
        let token = CancelToken::after(2);
        let out = accumulate_flow(&dem, &index, &routing, &params, &token).unwrap();

        assert!(!out.completed);
        let loss = out.loss.unwrap();
        let mean = out.upslope_mean.unwrap();
        assert_eq!(loss.get(0, 0).unwrap(), 2.0);
        assert_eq!(out.flow.get(0, 1).unwrap(), 1.0);
        for (row, col) in index.iter(SortOrder::Descending).skip(2) {
            assert!(out.flow.get(row, col).unwrap().is_nan());
            assert!(out.mean_flow_length.get(row, col).unwrap().is_nan());
            assert!(mean.get(row, col).unwrap().is_nan());
            assert!(loss.get(row, col).unwrap().is_nan());
        }
    }

    #[test]
    fn test_index_from_other_grid_rejected() {
        let dem = dem_from_fn(2, 2, 1.0, |row, col| (row + col) as f64);
        let other = dem_from_fn(4, 4, 1.0, |row, col| (row + col) as f64);
        let index = SortedIndex::build(&other, &NoProgress).unwrap();
        let routing = FlowRouting::D8(flow_direction(&dem, &NoProgress).unwrap());

        let err = accumulate(&dem, &index, &routing, |_, _| 1.0, &NoProgress).unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { .. }));
        let err = accumulate_flow(&dem, &index, &routing, &AccumulationParams::default(), &NoProgress)
            .unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { .. }));
    }

    #[test]
    fn test_empty_index_is_noop() {
        let dem = Raster::filled(2, 2, f64::NAN);
        let out = flow_accumulation(&dem, AccumulationParams::default(), &NoProgress).unwrap();
        assert!(out.completed);
        assert!(out.flow.data().iter().all(|v| v.is_nan()));
    }
}
