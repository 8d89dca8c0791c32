//! Event-driven node runtime
//!
//! Owns the outbound queue, the channel dispatcher and the mesh relay engine
//! of one device, and reacts to inbound mesh frames, inbound SMS and flush
//! ticks.

pub mod error;
pub mod node;
pub mod types;

pub use error::{NodeError, NodeResult};
pub use node::BeaconNode;
pub use types::{FlushReport, NodeEvent, NodeStats};
