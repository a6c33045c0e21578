//! # Flowroute Algorithms
//!
//! Sorted-order flow routing over raster elevation surfaces.
//!
//! Every propagation (accumulation, path length, stream order, basin
//! labelling) is a single sweep over a [`hydrology::SortedIndex`], so no
//! engine recurses and the result does not depend on traversal luck.
//!
//! ## Modules
//!
//! - **hydrology**: sorted index, D8/MFD flow direction, flow accumulation,
//!   flow path length, basins, stream order, lake flooding, stream burning

pub mod hydrology;
pub(crate) mod maybe_rayon;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::hydrology::{
        burn_streams, burn_streams_in_place, channels_from_order, flow_accumulation,
        flow_direction, flow_direction_mfd, flow_length, label_basins, resolve_routing,
        stream_network, strahler_order, AccumulationParams, BasinParams, BasinSeeds, BurnMethod,
        BurnParams, FloodOutcome, FloodTarget, FlowLengthDirection, FlowLengthParams,
        FlowRouting, FlowUnit, LakeFlood, MfdParams, RoutingMethod, SortOrder, SortedIndex,
        StreamNetworkParams,
    };
    pub use flowroute_core::prelude::*;
}
