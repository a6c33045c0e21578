//! Row-parallel execution with a sequential fallback.
//!
//! With the `parallel` feature, per-cell passes that have no cross-cell
//! dependency (flow direction resolution) fan out over rows with rayon.
//! Without it (e.g. WASM builds) the same code runs sequentially. The
//! sorted sweeps never go through here: each cell depends on cells
//! processed before it.

#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
mod sequential {
    /// Sequential stand-in for `rayon::prelude::IntoParallelIterator`.
    pub trait IntoParallelIterator {
        type Iter;
        type Item;
        fn into_par_iter(self) -> Self::Iter;
    }

    impl<I: IntoIterator> IntoParallelIterator for I {
        type Iter = I::IntoIter;
        type Item = I::Item;
        fn into_par_iter(self) -> Self::Iter {
            self.into_iter()
        }
    }
}

#[cfg(not(feature = "parallel"))]
pub use sequential::*;
