//! Drainage basin labelling
//!
//! Labels every cell with the basin it drains to. Seeds (channel cells,
//! terminal cells or explicit pour points) are visited in order; each
//! seed not yet reached opens a basin that is grown upstream by following
//! donors with an explicit stack. Basins smaller than a minimum size are
//! flipped back to [`UNASSIGNED`] after their trace, and their cells are
//! never traced again.

use ndarray::Array2;

use super::flow_accumulation::{ensure_index_shape, ensure_routing_shape};
use super::routing::FlowRouting;
use super::sorted_index::{SortOrder, SortedIndex};
use flowroute_core::raster::Raster;
use flowroute_core::{Error, Progress, Result};

/// Label of valid cells that belong to no kept basin
pub const UNASSIGNED: i32 = 0;
/// Label (and raster no-data value) of no-data cells
pub const BASIN_NODATA: i32 = -1;

/// Where basins start
#[derive(Debug, Clone, Default)]
pub enum BasinSeeds {
    /// Non-zero cells of a channel mask, lowest first
    Channels(Raster<u8>),
    /// Every terminal cell (no receiver), lowest first
    #[default]
    Outlets,
    /// Explicit cells, in the given order
    PourPoints(Vec<(usize, usize)>),
}

/// Parameters for [`label_basins`]
#[derive(Debug, Clone, Default)]
pub struct BasinParams {
    pub seeds: BasinSeeds,
    /// Basins with fewer cells are discarded. 0 keeps everything.
    pub min_size: usize,
}

/// A kept basin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasinSummary {
    pub id: i32,
    /// Seed cell the basin was traced from
    pub outlet: (usize, usize),
    /// Number of cells labelled with `id`
    pub cells: usize,
}

/// Output of [`label_basins`]
#[derive(Debug, Clone)]
pub struct BasinOutput {
    /// Basin ids from 1, [`UNASSIGNED`] or [`BASIN_NODATA`]
    pub labels: Raster<i32>,
    /// Kept basins in id order
    pub basins: Vec<BasinSummary>,
    /// Number of traced basins discarded for being too small
    pub suppressed: usize,
    /// False when labelling was cancelled
    pub completed: bool,
}

fn collect_seeds(
    dem: &Raster<f64>,
    index: &SortedIndex,
    routing: &FlowRouting,
    seeds: &BasinSeeds,
) -> Result<Vec<(usize, usize)>> {
    let (rows, cols) = dem.shape();
    match seeds {
        BasinSeeds::Channels(mask) => {
            dem.ensure_same_shape(mask)?;
            Ok(index
                .iter(SortOrder::Ascending)
                .filter(|&(row, col)| {
                    let v = unsafe { mask.get_unchecked(row, col) };
                    v != 0 && !mask.is_nodata(v)
                })
                .collect())
        }
        BasinSeeds::Outlets => Ok(index
            .iter(SortOrder::Ascending)
            .filter(|&(row, col)| routing.is_terminal(row, col))
            .collect()),
        BasinSeeds::PourPoints(points) => {
            for &(row, col) in points {
                if row >= rows || col >= cols {
                    return Err(Error::IndexOutOfBounds { row, col, rows, cols });
                }
                if !dem.is_valid(row, col) {
                    return Err(Error::invalid_parameter(
                        "pour_points",
                        format!("({}, {})", row, col),
                        "pour point lies on a no-data cell",
                    ));
                }
            }
            Ok(points.clone())
        }
    }
}

/// Label drainage basins.
///
/// Every valid cell ends with exactly one basin id or [`UNASSIGNED`]:
/// a cell is marked visited when first pushed and is never pushed again,
/// so two traces cannot claim the same cell. Ids are dense; the id of a
/// suppressed basin is reused by the next one.
pub fn label_basins(
    dem: &Raster<f64>,
    index: &SortedIndex,
    routing: &FlowRouting,
    params: BasinParams,
    progress: &dyn Progress,
) -> Result<BasinOutput> {
    ensure_routing_shape(dem, routing)?;
    ensure_index_shape(dem, index)?;
    let seeds = collect_seeds(dem, index, routing, &params.seeds)?;

    let (rows, cols) = dem.shape();
    let mut labels = Array2::from_elem((rows, cols), BASIN_NODATA);
    for (row, col) in index.iter(SortOrder::Ascending) {
        labels[(row, col)] = UNASSIGNED;
    }
    let mut visited = Array2::from_elem((rows, cols), false);

    let total = index.len();
    let mut done = 0usize;
    let mut next_id: i32 = 1;
    let mut basins = Vec::new();
    let mut suppressed = 0usize;
    let mut completed = true;

    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut members: Vec<(usize, usize)> = Vec::new();

    'seeds: for &seed in &seeds {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        stack.clear();
        members.clear();
        stack.push(seed);

        while let Some((row, col)) = stack.pop() {
            if progress.is_cancelled() {
                // The unfinished trace is not a basin
                for &cell in &members {
                    labels[cell] = UNASSIGNED;
                }
                tracing::warn!(processed = done, total, "basin labelling cancelled");
                completed = false;
                break 'seeds;
            }

            labels[(row, col)] = next_id;
            members.push((row, col));
            done += 1;
            progress.set_progress(done, total);

            for (_, nr, nc, _) in routing.donors(row, col) {
                if !visited[(nr, nc)] && dem.is_valid(nr, nc) {
                    visited[(nr, nc)] = true;
                    stack.push((nr, nc));
                }
            }
        }

        if members.len() < params.min_size {
            for &cell in &members {
                labels[cell] = UNASSIGNED;
            }
            suppressed += 1;
        } else {
            basins.push(BasinSummary {
                id: next_id,
                outlet: seed,
                cells: members.len(),
            });
            next_id += 1;
        }
    }

    if suppressed > 0 {
        tracing::info!(suppressed, min_size = params.min_size, "small basins suppressed");
    }
    tracing::debug!(basins = basins.len(), seeds = seeds.len(), completed, "basins labelled");

    let mut output = dem.with_same_meta::<i32>(BASIN_NODATA, Some(BASIN_NODATA));
    *output.data_mut() = labels;
    Ok(BasinOutput {
        labels: output,
        basins,
        suppressed,
        completed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::routing::{resolve_routing, RoutingMethod};
    use flowroute_core::{CancelToken, NoProgress};
    use std::collections::HashSet;

    fn setup(dem: &Raster<f64>, method: RoutingMethod) -> (SortedIndex, FlowRouting) {
        (
            SortedIndex::build(dem, &NoProgress).unwrap(),
            resolve_routing(dem, method, &NoProgress).unwrap(),
        )
    }

    /// Two valleys draining west and east, split by a ridge at col 3
    fn two_valleys() -> Raster<f64> {
        let mut dem = Raster::new(5, 7);
        for row in 0..5 {
            for col in 0..7 {
                let z = 10.0 - (col as f64 - 3.0).abs() * 2.0 + (row as f64 - 2.0).abs() * 0.5;
                dem.set(row, col, z).unwrap();
            }
        }
        dem
    }

    #[test]
    fn test_every_valid_cell_labelled_once() {
        let dem = two_valleys();
        for method in [RoutingMethod::D8, RoutingMethod::mfd()] {
            let (index, routing) = setup(&dem, method);
            let out = label_basins(&dem, &index, &routing, BasinParams::default(), &NoProgress).unwrap();

            assert!(out.completed);
            assert!(out.labels.data().iter().all(|&id| id >= 1));
            let total: usize = out.basins.iter().map(|b| b.cells).sum();
            assert_eq!(total, 35);

            let ids: HashSet<i32> = out.basins.iter().map(|b| b.id).collect();
            assert_eq!(ids.len(), out.basins.len());
            for basin in &out.basins {
                let counted = out.labels.data().iter().filter(|&&id| id == basin.id).count();
                assert_eq!(counted, basin.cells);
            }
        }
    }

    #[test]
    fn test_ramp_is_one_basin() {
        let dem = Raster::from_vec(vec![5.0, 4.0, 3.0, 2.0, 1.0], 1, 5).unwrap();
        let (index, routing) = setup(&dem, RoutingMethod::D8);
        let out = label_basins(&dem, &index, &routing, BasinParams::default(), &NoProgress).unwrap();

        assert_eq!(out.basins.len(), 1);
        assert_eq!(out.basins[0].outlet, (0, 4));
        assert!(out.labels.data().iter().all(|&id| id == 1));
    }

    #[test]
    fn test_small_basins_suppressed_and_ids_reused() {
        // Cells 0 and 1 drain west into a two-cell basin
        let dem = Raster::from_vec(vec![1.0, 9.0, 5.0, 4.0, 3.0, 2.0, 0.5], 1, 7).unwrap();
        let (index, routing) = setup(&dem, RoutingMethod::D8);

        let all = label_basins(&dem, &index, &routing, BasinParams::default(), &NoProgress).unwrap();
        assert_eq!(all.basins.len(), 2);

        let out = label_basins(
            &dem,
            &index,
            &routing,
            BasinParams {
                min_size: 3,
                ..Default::default()
            },
            &NoProgress,
        )
        .unwrap();

        // Outlets ascending: (0,6) at 0.5 then (0,0) at 1.0
        assert_eq!(out.suppressed, 1);
        assert_eq!(out.basins.len(), 1);
        assert_eq!(out.basins[0].id, 1);
        assert_eq!(out.labels.get(0, 0).unwrap(), UNASSIGNED);
        assert_eq!(out.labels.get(0, 6).unwrap(), 1);
    }

    #[test]
    fn test_suppressed_id_recycled() {
        // Lowest outlet first: (0,0) is a one-cell basin, then the ramp
        let dem = Raster::from_vec(vec![0.1, f64::NAN, 5.0, 4.0, 3.0, 2.0, 1.0], 1, 7).unwrap();
        let (index, routing) = setup(&dem, RoutingMethod::D8);
        let out = label_basins(
            &dem,
            &index,
            &routing,
            BasinParams {
                min_size: 2,
                ..Default::default()
            },
            &NoProgress,
        )
        .unwrap();

        assert_eq!(out.suppressed, 1);
        assert_eq!(out.basins[0].id, 1);
        assert_eq!(out.basins[0].outlet, (0, 6));
        assert_eq!(out.labels.get(0, 0).unwrap(), UNASSIGNED);
    }

    #[test]
    fn test_pour_points_in_given_order() {
        let dem = Raster::from_vec(vec![5.0, 4.0, 3.0, 2.0, 1.0], 1, 5).unwrap();
        let (index, routing) = setup(&dem, RoutingMethod::D8);
        let out = label_basins(
            &dem,
            &index,
            &routing,
            BasinParams {
                seeds: BasinSeeds::PourPoints(vec![(0, 2), (0, 4)]),
                min_size: 0,
            },
            &NoProgress,
        )
        .unwrap();

        assert_eq!(out.labels.data().iter().copied().collect::<Vec<_>>(), vec![1, 1, 1, 2, 2]);
    }

    #[test]
    fn test_channel_seeds() {
        let dem = two_valleys();
        let (index, routing) = setup(&dem, RoutingMethod::D8);
        let mut channels = dem.with_same_meta::<u8>(0, Some(u8::MAX));
        channels.set(2, 0, 1).unwrap();

        let out = label_basins(
            &dem,
            &index,
            &routing,
            BasinParams {
                seeds: BasinSeeds::Channels(channels),
                min_size: 0,
            },
            &NoProgress,
        )
        .unwrap();

        assert_eq!(out.basins.len(), 1);
        assert_eq!(out.labels.get(2, 0).unwrap(), 1);
        // The east valley does not drain through the channel cell
        assert_eq!(out.labels.get(2, 6).unwrap(), UNASSIGNED);
    }

    #[test]
    fn test_nodata_and_bad_pour_points() {
        let mut dem = Raster::from_vec(vec![5.0, 4.0, 3.0, 2.0, 1.0], 1, 5).unwrap();
        dem.set(0, 1, f64::NAN).unwrap();
        let (index, routing) = setup(&dem, RoutingMethod::D8);

        let out = label_basins(&dem, &index, &routing, BasinParams::default(), &NoProgress).unwrap();
        assert_eq!(out.labels.get(0, 1).unwrap(), BASIN_NODATA);

        let off_grid = BasinParams {
            seeds: BasinSeeds::PourPoints(vec![(3, 0)]),
            min_size: 0,
        };
        assert!(label_basins(&dem, &index, &routing, off_grid, &NoProgress).is_err());

        let on_nodata = BasinParams {
            seeds: BasinSeeds::PourPoints(vec![(0, 1)]),
            min_size: 0,
        };
        assert!(label_basins(&dem, &index, &routing, on_nodata, &NoProgress).is_err());
    }

    #[test]
    fn test_cancelled_trace_is_discarded() {
        let dem = Raster::from_vec(vec![5.0, 4.0, 3.0, 2.0, 1.0], 1, 5).unwrap();
        let (index, routing) = setup(&dem, RoutingMethod::D8);
        let token = CancelToken::after(2);
        let out = label_basins(&dem, &index, &routing, BasinParams::default(), &token).unwrap();

        assert!(!out.completed);
        assert!(out.basins.is_empty());
        assert!(out.labels.data().iter().all(|&id| id == UNASSIGNED));
    }

    #[test]
    fn test_index_from_other_grid_rejected() {
        let dem = two_valleys();
        let (_, routing) = setup(&dem, RoutingMethod::D8);
        let index = SortedIndex::build(&Raster::filled(9, 9, 1.0), &NoProgress).unwrap();

        let err = label_basins(&dem, &index, &routing, BasinParams::default(), &NoProgress).unwrap_err();
        assert!(matches!(err, Error::SizeMismatch { .. }));
    }
}
