//! D8 neighbourhood enumeration for flow routing

use super::{Raster, RasterElement};

/// D8 flow directions.
///
/// Codes enumerate the eight neighbours clockwise from north:
/// ```text
///   7  0  1
///   6  .  2
///   5  4  3
/// ```
/// This enumeration order is also the tie-break order of every
/// steepest-descent choice.
pub mod d8 {
    pub const N: u8 = 0;
    pub const NE: u8 = 1;
    pub const E: u8 = 2;
    pub const SE: u8 = 3;
    pub const S: u8 = 4;
    pub const SW: u8 = 5;
    pub const W: u8 = 6;
    pub const NW: u8 = 7;

    /// No downslope neighbour (pit, flat, or grid boundary)
    pub const SINK: u8 = 8;

    /// Direction of a no-data cell
    pub const NODATA: u8 = u8::MAX;

    /// Direction offsets: (row_offset, col_offset), indexed by direction code
    pub const OFFSETS: [(isize, isize); 8] = [
        (-1, 0),  // 0: N
        (-1, 1),  // 1: NE
        (0, 1),   // 2: E
        (1, 1),   // 3: SE
        (1, 0),   // 4: S
        (1, -1),  // 5: SW
        (0, -1),  // 6: W
        (-1, -1), // 7: NW
    ];

    /// Distance multipliers for each direction.
    /// Cardinal directions = 1.0, diagonal = sqrt(2)
    pub const DISTANCES: [f64; 8] = [
        1.0,
        std::f64::consts::SQRT_2,
        1.0,
        std::f64::consts::SQRT_2,
        1.0,
        std::f64::consts::SQRT_2,
        1.0,
        std::f64::consts::SQRT_2,
    ];

    /// Whether `dir` is one of the eight neighbour codes
    pub fn is_flow(dir: u8) -> bool {
        dir < 8
    }

    /// The direction pointing back to the source cell
    pub fn opposite(dir: u8) -> u8 {
        if is_flow(dir) {
            (dir + 4) % 8
        } else {
            dir
        }
    }

    /// Neighbour of `(row, col)` in direction `dir`, if inside a `rows x cols` grid
    pub fn step(row: usize, col: usize, dir: u8, rows: usize, cols: usize) -> Option<(usize, usize)> {
        if !is_flow(dir) {
            return None;
        }
        let (dr, dc) = OFFSETS[dir as usize];
        let nr = row as isize + dr;
        let nc = col as isize + dc;
        if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
            None
        } else {
            Some((nr as usize, nc as usize))
        }
    }
}

/// Iterator over the valid (in-grid, not no-data) D8 neighbours of a cell.
///
/// Yields `(dir, row, col, value)` in direction-code order.
pub struct Neighbors<'a, T: RasterElement> {
    raster: &'a Raster<T>,
    row: usize,
    col: usize,
    dir: u8,
}

impl<'a, T: RasterElement> Neighbors<'a, T> {
    pub fn new(raster: &'a Raster<T>, row: usize, col: usize) -> Self {
        Self {
            raster,
            row,
            col,
            dir: 0,
        }
    }
}

impl<'a, T: RasterElement> Iterator for Neighbors<'a, T> {
    type Item = (u8, usize, usize, T);

    fn next(&mut self) -> Option<Self::Item> {
        let (rows, cols) = self.raster.shape();
        while self.dir < 8 {
            let dir = self.dir;
            self.dir += 1;

            let Some((nr, nc)) = d8::step(self.row, self.col, dir, rows, cols) else {
                continue;
            };
            // Safe because d8::step only returns in-grid coordinates
            let value = unsafe { self.raster.get_unchecked(nr, nc) };
            if !self.raster.is_nodata(value) {
                return Some((dir, nr, nc, value));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_d8_opposite() {
        assert_eq!(d8::opposite(d8::N), d8::S);
        assert_eq!(d8::opposite(d8::E), d8::W);
        assert_eq!(d8::opposite(d8::NE), d8::SW);
        assert_eq!(d8::opposite(d8::NW), d8::SE);
        assert_eq!(d8::opposite(d8::SINK), d8::SINK);
    }

    #[test]
    fn test_d8_step_bounds() {
        assert_eq!(d8::step(0, 0, d8::N, 3, 3), None);
        assert_eq!(d8::step(0, 0, d8::SE, 3, 3), Some((1, 1)));
        assert_eq!(d8::step(2, 2, d8::E, 3, 3), None);
        assert_eq!(d8::step(1, 1, d8::SINK, 3, 3), None);
    }

    #[test]
    fn test_neighbors_skip_edges_and_nodata() {
        let mut raster: Raster<f64> = Raster::filled(3, 3, 1.0);
        raster.set(0, 1, f64::NAN).unwrap();

        let corner: Vec<u8> = Neighbors::new(&raster, 0, 0).map(|(d, ..)| d).collect();
        // N of (0,0) is out of grid, E is no-data
        assert_eq!(corner, vec![d8::SE, d8::S]);

        let center = Neighbors::new(&raster, 1, 1).count();
        assert_eq!(center, 7);
    }
}
