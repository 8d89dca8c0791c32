//! Beacon Link - resilient multi-channel delivery for emergency coordination
//!
//! Moves panic alerts, status updates and chat messages towards a coordination
//! center over whichever channel is currently viable: the data network, a
//! device-to-device flood mesh, SMS or satellite.
//!
//! Building blocks:
//! - [`mesh`]: packet wire codec, fragmentation, deduplication and flood relay
//! - [`sms`]: compact single-segment status codec
//! - [`queue`]: durable priority queue with retry accounting and dead letters
//! - [`channel`]: transport capabilities and the dispatcher that drives them
//! - [`node`]: the event-driven runtime tying the pieces together

pub mod channel;
pub mod clock;
pub mod config;
pub mod mesh;
pub mod metrics;
pub mod node;
pub mod queue;
pub mod sms;

pub use clock::{Clock, IdSource, ManualClock, RandomIds, SequentialIds, SystemClock};
pub use config::{BeaconConfig, ConfigError};
pub use node::{BeaconNode, NodeError, NodeEvent};
