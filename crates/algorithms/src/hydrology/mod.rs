//! Hydrological analysis algorithms
//!
//! Flow routing over raster DEMs, built on one idea: sort the valid
//! cells by elevation once, then propagate along the direction field in
//! a single sweep.
//! - Sorted index: strict value order over valid cells
//! - Flow direction: D8 steepest descent and MFD slope-weighted partition
//! - Flow accumulation: upstream contributing cells, area or weight
//! - Flow length: longest path down to the outlet or up to the divide
//! - Basins: basin labels from channels, outlets or pour points
//! - Stream order: Strahler order and inflow counts
//! - Stream network: channel masks from accumulation or order
//! - Lake flood: uniform-level flood fill from a seed
//! - Stream burn: lower mapped channels before routing

mod basins;
pub(crate) mod flow_accumulation;
pub(crate) mod flow_direction;
mod flow_direction_mfd;
mod flow_length;
mod lake_flood;
mod routing;
mod sorted_index;
mod stream_burn;
mod stream_network;
mod stream_order;

pub use basins::{label_basins, BasinOutput, BasinParams, BasinSeeds, BasinSummary, BASIN_NODATA, UNASSIGNED};
pub use flow_accumulation::{
    accumulate, accumulate_flow, flow_accumulation, terminal_sum, Accumulated, AccumulationOutput,
    AccumulationParams, FlowAccumulation, FlowUnit,
};
pub use flow_direction::{flow_direction, FlowDirection};
pub use flow_direction_mfd::{flow_direction_mfd, MfdParams, MfdWeights};
pub use flow_length::{flow_length, FlowLengthDirection, FlowLengthOutput, FlowLengthParams};
pub use lake_flood::{FloodOutcome, FloodTarget, LakeFlood};
pub use routing::{resolve_routing, FlowRouting, RoutingMethod};
pub use sorted_index::{SortOrder, SortedIndex};
pub use stream_burn::{burn_streams, burn_streams_in_place, BurnMethod, BurnParams, StreamBurn};
pub use stream_network::{channels_from_order, stream_network, StreamNetworkParams};
pub use stream_order::{strahler_order, StreamOrderOutput, ORDER_NODATA};
