//! Stream burning
//!
//! Lowers the elevation of known channel cells so that flow directions
//! computed afterwards follow the mapped network. Run before direction
//! resolution; the input DEM is copied unless the in-place variant is
//! used.

use serde::{Deserialize, Serialize};

use flowroute_core::raster::Raster;
use flowroute_core::{Algorithm, Error, Result};

/// How channel cells are lowered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BurnMethod {
    /// Subtract epsilon from every channel cell
    #[default]
    Decrement,
    /// Drop each channel cell below its lowest non-channel neighbour
    NeighborMinimum,
}

/// Parameters for stream burning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BurnParams {
    pub method: BurnMethod,
    /// Amount to lower by, in elevation units.
    /// Default: 1.0
    pub epsilon: f64,
}

impl Default for BurnParams {
    fn default() -> Self {
        Self {
            method: BurnMethod::Decrement,
            epsilon: 1.0,
        }
    }
}

/// Stream burning algorithm
#[derive(Debug, Clone, Default)]
pub struct StreamBurn;

impl Algorithm for StreamBurn {
    /// (elevation, channel mask)
    type Input = (Raster<f64>, Raster<u8>);
    type Output = Raster<f64>;
    type Params = BurnParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Stream Burning"
    }

    fn description(&self) -> &'static str {
        "Lower channel cells of a DEM so that drainage follows a mapped network"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        let (mut dem, channels) = input;
        burn_streams_in_place(&mut dem, &channels, params)?;
        Ok(dem)
    }
}

fn is_channel(channels: &Raster<u8>, row: usize, col: usize) -> bool {
    let v = unsafe { channels.get_unchecked(row, col) };
    v != 0 && !channels.is_nodata(v)
}

/// Burn channels into a copy of `dem`.
pub fn burn_streams(dem: &Raster<f64>, channels: &Raster<u8>, params: BurnParams) -> Result<Raster<f64>> {
    let mut burned = dem.clone();
    burn_streams_in_place(&mut burned, channels, params)?;
    Ok(burned)
}

/// Burn channels directly into `dem`.
///
/// No-data elevations are left alone. With [`BurnMethod::NeighborMinimum`]
/// each channel cell becomes `min(z, m - epsilon)` where `m` is the lowest
/// valid non-channel neighbour in the unburned surface, or `z - epsilon`
/// when every neighbour is a channel or missing.
pub fn burn_streams_in_place(dem: &mut Raster<f64>, channels: &Raster<u8>, params: BurnParams) -> Result<()> {
    dem.ensure_same_shape(channels)?;
    if !params.epsilon.is_finite() || params.epsilon < 0.0 {
        return Err(Error::invalid_parameter(
            "epsilon",
            params.epsilon,
            "epsilon must be finite and non-negative",
        ));
    }

    let (rows, cols) = dem.shape();
    let eps = params.epsilon;
    let mut updates = Vec::new();

    for row in 0..rows {
        for col in 0..cols {
            let z = unsafe { dem.get_unchecked(row, col) };
            if dem.is_nodata(z) || !is_channel(channels, row, col) {
                continue;
            }
            let burned = match params.method {
                BurnMethod::Decrement => z - eps,
                BurnMethod::NeighborMinimum => dem
                    .neighbors(row, col)
                    .filter(|&(_, nr, nc, _)| !is_channel(channels, nr, nc))
                    .map(|(_, _, _, nz)| nz)
                    .reduce(f64::min)
                    .map_or(z - eps, |m| z.min(m - eps)),
            };
            updates.push((row, col, burned));
        }
    }

    // Written after the scan so neighbours are read unburned
    let data = dem.data_mut();
    for &(row, col, z) in &updates {
        data[(row, col)] = z;
    }

    tracing::debug!(channels = updates.len(), method = ?params.method, eps, "streams burned");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrology::flow_direction::flow_direction;
    use approx::assert_relative_eq;
    use flowroute_core::raster::d8;
    use flowroute_core::NoProgress;

    fn mask(values: Vec<u8>, rows: usize, cols: usize) -> Raster<u8> {
        let mut m = Raster::from_vec(values, rows, cols).unwrap();
        m.set_nodata(Some(d8::NODATA));
        m
    }

    #[test]
    fn test_decrement() {
        let dem = Raster::from_vec(vec![5.0, 5.0, 5.0], 1, 3).unwrap();
        let channels = mask(vec![0, 1, 0], 1, 3);
        let burned = burn_streams(&dem, &channels, BurnParams { method: BurnMethod::Decrement, epsilon: 2.0 }).unwrap();

        assert_eq!(burned.data().iter().copied().collect::<Vec<_>>(), vec![5.0, 3.0, 5.0]);
        // Source untouched
        assert_eq!(dem.get(0, 1).unwrap(), 5.0);
    }

    #[test]
    fn test_neighbor_minimum_reads_unburned_surface() {
        //  9 9 9
        //  4 8 7    centre row is a channel except (1,0)
        //  9 9 9
        let dem = Raster::from_vec(
            vec![
                9.0, 9.0, 9.0, //
                4.0, 8.0, 7.0, //
                9.0, 9.0, 9.0,
            ],
            3,
            3,
        )
        .unwrap();
        let channels = mask(vec![0, 0, 0, 0, 1, 1, 0, 0, 0], 3, 3);
        let burned = burn_streams(
            &dem,
            &channels,
            BurnParams {
                method: BurnMethod::NeighborMinimum,
                epsilon: 0.5,
            },
        )
        .unwrap();

        assert_eq!(burned.get(1, 1).unwrap(), 3.5);
        // Lowest non-channel neighbour of (1,2) is 9, so it keeps 7
        assert_eq!(burned.get(1, 2).unwrap(), 7.0);
    }

    #[test]
    fn test_neighbor_minimum_all_channel_falls_back() {
        let dem = Raster::from_vec(vec![3.0, 2.0], 1, 2).unwrap();
        let channels = mask(vec![1, 1], 1, 2);
        let burned = burn_streams(
            &dem,
            &channels,
            BurnParams {
                method: BurnMethod::NeighborMinimum,
                epsilon: 0.1,
            },
        )
        .unwrap();
        assert_relative_eq!(burned.get(0, 0).unwrap(), 2.9);
        assert_relative_eq!(burned.get(0, 1).unwrap(), 1.9);
    }

    #[test]
    fn test_burn_redirects_flow() {
        // Without burning, (1,0) drains north into the depression at (0,0)
        let dem = Raster::from_vec(
            vec![
                1.0, 6.0, 6.0, //
                5.0, 4.9, 4.8, //
                6.0, 6.0, 6.0,
            ],
            3,
            3,
        )
        .unwrap();
        let before = flow_direction(&dem, &NoProgress).unwrap();
        assert_eq!(before.get(1, 0).unwrap(), d8::N);

        let channels = mask(vec![0, 0, 0, 1, 1, 1, 0, 0, 0], 3, 3);
        let burned = burn_streams(&dem, &channels, BurnParams { method: BurnMethod::Decrement, epsilon: 10.0 }).unwrap();
        let after = flow_direction(&burned, &NoProgress).unwrap();
        assert_eq!(after.get(1, 0).unwrap(), d8::E);
        assert_eq!(after.get(1, 1).unwrap(), d8::E);
    }

    #[test]
    fn test_nodata_and_mask_nodata_ignored() {
        let mut dem = Raster::from_vec(vec![5.0, 5.0, 5.0], 1, 3).unwrap();
        dem.set(0, 0, f64::NAN).unwrap();
        let channels = mask(vec![1, d8::NODATA, 1], 1, 3);
        let burned = burn_streams(&dem, &channels, BurnParams::default()).unwrap();

        assert!(burned.get(0, 0).unwrap().is_nan());
        assert_eq!(burned.get(0, 1).unwrap(), 5.0);
        assert_eq!(burned.get(0, 2).unwrap(), 4.0);
    }

    #[test]
    fn test_in_place_and_algorithm_wrapper() {
        let dem = Raster::from_vec(vec![5.0, 5.0], 1, 2).unwrap();
        let channels = mask(vec![1, 0], 1, 2);

        let mut in_place = dem.clone();
        burn_streams_in_place(&mut in_place, &channels, BurnParams::default()).unwrap();
        let wrapped = StreamBurn.execute_default((dem, channels)).unwrap();
        assert_eq!(in_place.data(), wrapped.data());
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let dem = Raster::filled(2, 2, 1.0);
        let channels = mask(vec![1, 0, 0], 1, 3);
        assert!(burn_streams(&dem, &channels, BurnParams::default()).is_err());

        let channels = mask(vec![1, 0, 0, 0], 2, 2);
        let bad = BurnParams { epsilon: -1.0, ..Default::default() };
        assert!(burn_streams(&dem, &channels, bad).is_err());
    }
}
