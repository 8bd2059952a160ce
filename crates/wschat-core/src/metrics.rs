//! Relay instrumentation.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding binary installs a recorder.

use metrics::{counter, gauge};
use wschat_protocol::FrameType;

/// Metric names.
pub mod names {
    pub const PARTICIPANTS_ACTIVE: &str = "wschat_participants_active";
    pub const BROADCASTS_TOTAL: &str = "wschat_broadcasts_total";
    pub const DELIVERIES_TOTAL: &str = "wschat_deliveries_total";
    pub const EVICTIONS_TOTAL: &str = "wschat_evictions_total";
    pub const FRAMES_TOTAL: &str = "wschat_frames_total";
    pub const SESSIONS_TOTAL: &str = "wschat_sessions_total";
}

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    metrics::describe_gauge!(names::PARTICIPANTS_ACTIVE, "Participants currently joined to the hub");
    metrics::describe_counter!(names::BROADCASTS_TOTAL, "Messages fanned out by the hub");
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Messages enqueued onto participant queues");
    metrics::describe_counter!(names::EVICTIONS_TOTAL, "Participants evicted for a full outbound queue");
    metrics::describe_counter!(names::FRAMES_TOTAL, "Frames read from or written to participants");
    metrics::describe_counter!(names::SESSIONS_TOTAL, "Finished sessions by outcome");
}

pub(crate) fn set_participants(count: usize) {
    gauge!(names::PARTICIPANTS_ACTIVE).set(count as f64);
}

pub(crate) fn record_broadcast(delivered: usize) {
    counter!(names::BROADCASTS_TOTAL).increment(1);
    counter!(names::DELIVERIES_TOTAL).increment(delivered as u64);
}

pub(crate) fn record_eviction() {
    counter!(names::EVICTIONS_TOTAL).increment(1);
}

pub(crate) fn record_frame(direction: &'static str, frame_type: FrameType) {
    counter!(names::FRAMES_TOTAL, "direction" => direction, "type" => frame_type.as_str())
        .increment(1);
}

pub(crate) fn record_session_end(outcome: &'static str) {
    counter!(names::SESSIONS_TOTAL, "outcome" => outcome).increment(1);
}
