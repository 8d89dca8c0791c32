//! In-process radio medium for multi-node mesh tests
//!
//! Nodes are wired into an explicit neighbour graph. Frames broadcast by one
//! node land in the inboxes of its neighbours, optionally lost, duplicated or
//! corrupted, and are delivered when the test pumps the medium.

pub mod air;

pub use air::{Air, AirConfig, AirStats, SimRadio};
