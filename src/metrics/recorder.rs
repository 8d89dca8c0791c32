//! Metrics recorder for relay and delivery operations
//!
//! Emits through the `metrics` facade; nothing is recorded unless the host
//! application installs a recorder.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    // Mesh counters
    describe_counter!(
        "beacon_packets_received_total",
        "Mesh frames received from the radio"
    );
    describe_counter!(
        "beacon_packets_relayed_total",
        "Mesh packets rebroadcast with a decremented hop budget"
    );
    describe_counter!(
        "beacon_packets_delivered_total",
        "Mesh payloads handed to the local application"
    );
    describe_counter!(
        "beacon_packets_dropped_total",
        "Mesh packets dropped, by reason"
    );
    describe_counter!(
        "beacon_relays_throttled_total",
        "Rebroadcasts delayed by the relay rate limit"
    );

    // SMS
    describe_counter!(
        "beacon_sms_received_total",
        "Beacon SMS bodies decoded"
    );
    describe_counter!(
        "beacon_sms_rejected_total",
        "Beacon SMS bodies that failed to decode"
    );

    // Queue counters
    describe_counter!("beacon_entries_enqueued_total", "Outbound entries queued");
    describe_counter!(
        "beacon_entries_sent_total",
        "Outbound entries confirmed sent"
    );
    describe_counter!(
        "beacon_send_failures_total",
        "Failed send attempts, by channel and failure kind"
    );
    describe_counter!(
        "beacon_dead_letters_total",
        "Entries moved to the dead-letter record"
    );

    // Gauges
    describe_gauge!("beacon_queue_depth", "Pending outbound entries per priority");

    // Histograms
    describe_histogram!(
        "beacon_send_duration_seconds",
        "Time spent in one transport send"
    );
}

// ============== Mesh ==============

pub fn record_packet_received() {
    counter!("beacon_packets_received_total").increment(1);
}

pub fn record_packet_relayed() {
    counter!("beacon_packets_relayed_total").increment(1);
}

pub fn record_packet_delivered(kind: &str) {
    counter!("beacon_packets_delivered_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_packet_dropped(reason: &str) {
    counter!("beacon_packets_dropped_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_relay_throttled() {
    counter!("beacon_relays_throttled_total").increment(1);
}

// ============== SMS ==============

pub fn record_sms_received(status: &str) {
    counter!("beacon_sms_received_total", "status" => status.to_string()).increment(1);
}

pub fn record_sms_rejected() {
    counter!("beacon_sms_rejected_total").increment(1);
}

// ============== Queue ==============

pub fn record_enqueued(priority: &str) {
    counter!("beacon_entries_enqueued_total", "priority" => priority.to_string()).increment(1);
}

pub fn record_entry_sent(channel: &str, priority: &str) {
    counter!("beacon_entries_sent_total", "channel" => channel.to_string(), "priority" => priority.to_string()).increment(1);
}

pub fn record_send_failure(channel: &str, kind: &str) {
    counter!("beacon_send_failures_total", "channel" => channel.to_string(), "kind" => kind.to_string()).increment(1);
}

pub fn record_dead_letter(priority: &str) {
    counter!("beacon_dead_letters_total", "priority" => priority.to_string()).increment(1);
}

/// Update queue depth gauge
pub fn set_queue_depth(priority: &str, depth: usize) {
    gauge!("beacon_queue_depth", "priority" => priority.to_string()).set(depth as f64);
}

pub fn record_send_duration(channel: &str, duration: Duration) {
    histogram!("beacon_send_duration_seconds", "channel" => channel.to_string())
        .record(duration.as_secs_f64());
}

/// Times one transport send
pub struct SendTimer {
    channel: &'static str,
    start_time: Instant,
}

impl SendTimer {
    pub fn start(channel: &'static str) -> Self {
        Self {
            channel,
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Stop timing and record the duration
    pub fn stop(self) -> Duration {
        let elapsed = self.start_time.elapsed();
        record_send_duration(self.channel, elapsed);
        elapsed
    }
}
