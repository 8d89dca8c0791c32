//! Metrics and observability module
//!
//! Counters, gauges and histograms for the relay and delivery paths, all
//! prefixed `beacon_`:
//! - Mesh frames received, relayed, delivered and dropped (by reason)
//! - Entries queued, sent, failed and dead-lettered
//! - Queue depth per priority
//! - Transport send latency

pub mod recorder;

pub use recorder::{init_metrics, SendTimer};
