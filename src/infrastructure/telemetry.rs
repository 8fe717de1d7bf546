//! Metric names and descriptions
//!
//! Only the `metrics` facade is used here; whichever recorder the host
//! installs receives the values.

use metrics::{describe_counter, describe_gauge, gauge};

pub const CALL_EVENTS_TOTAL: &str = "callscribe_call_events_total";
pub const STALE_EVENTS_TOTAL: &str = "callscribe_stale_events_total";
pub const SEGMENTS_PUBLISHED_TOTAL: &str = "callscribe_segments_published_total";
pub const SEGMENTS_DUPLICATE_TOTAL: &str = "callscribe_segments_duplicate_total";
pub const SUBSCRIBERS_DISCONNECTED_TOTAL: &str = "callscribe_subscribers_disconnected_total";
pub const FINALIZATIONS_PERSISTED_TOTAL: &str = "callscribe_finalizations_persisted_total";
pub const FINALIZATIONS_FAILED_TOTAL: &str = "callscribe_finalizations_failed_total";
pub const STORAGE_RETRIES_TOTAL: &str = "storage_retries_total";
pub const ACTIVE_CALLS: &str = "callscribe_active_calls";

/// Register descriptions for every metric this crate emits
pub fn describe_metrics() {
    describe_counter!(CALL_EVENTS_TOTAL, "Call lifecycle events applied, by status");
    describe_counter!(
        STALE_EVENTS_TOTAL,
        "Lifecycle events dropped because the call was already terminal"
    );
    describe_counter!(
        SEGMENTS_PUBLISHED_TOTAL,
        "Transcription segments delivered to subscribers"
    );
    describe_counter!(
        SEGMENTS_DUPLICATE_TOTAL,
        "Redelivered transcription segments acknowledged but not re-sent"
    );
    describe_counter!(
        SUBSCRIBERS_DISCONNECTED_TOTAL,
        "Subscribers disconnected because their queue overflowed"
    );
    describe_counter!(
        FINALIZATIONS_PERSISTED_TOTAL,
        "Calls whose record and insights were persisted"
    );
    describe_counter!(
        FINALIZATIONS_FAILED_TOTAL,
        "Calls whose finalization gave up after retries"
    );
    describe_counter!(
        STORAGE_RETRIES_TOTAL,
        "Storage operations retried after a transient fault"
    );
    describe_gauge!(ACTIVE_CALLS, "Calls currently held by the session registry");
}

/// Update the active calls gauge
pub fn update_active_calls(count: usize) {
    gauge!(ACTIVE_CALLS).set(count as f64);
}
