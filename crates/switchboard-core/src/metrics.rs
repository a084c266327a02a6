//! Metrics instrumentation for Switchboard.
//!
//! Uses the `metrics` crate facade; nothing is exported unless the embedding
//! application installs a recorder.

use crate::error::ErrorCode;
use crate::middleware::Operation;
use metrics::{counter, gauge, histogram};

/// Metric names.
pub mod names {
    pub const OPERATIONS_TOTAL: &str = "switchboard_operations_total";
    pub const OPERATION_SECONDS: &str = "switchboard_operation_seconds";
    pub const ERRORS_TOTAL: &str = "switchboard_errors_total";
    pub const MESSAGES_PUBLISHED: &str = "switchboard_messages_published_total";
    pub const CHANNELS_ACTIVE: &str = "switchboard_channels_active";
}

/// Describe every metric. Call once after installing a recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        names::OPERATIONS_TOTAL,
        "Intercepted operations by kind and outcome"
    );
    metrics::describe_histogram!(
        names::OPERATION_SECONDS,
        "Time from the first pre hook to the last post hook"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Errors by stable error code");
    metrics::describe_counter!(
        names::MESSAGES_PUBLISHED,
        "Messages published through the facade"
    );
    metrics::describe_gauge!(
        names::CHANNELS_ACTIVE,
        "Channels held in the facade's channel cache"
    );
}

/// Record an operation outcome.
pub fn record_operation(operation: Operation, outcome: &'static str) {
    counter!(
        names::OPERATIONS_TOTAL,
        "operation" => operation.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record operation latency.
pub fn record_latency(operation: Operation, seconds: f64) {
    histogram!(names::OPERATION_SECONDS, "operation" => operation.as_str()).record(seconds);
}

/// Record an error.
pub fn record_error(code: ErrorCode) {
    counter!(names::ERRORS_TOTAL, "code" => code.as_str()).increment(1);
}

/// Record a published message.
pub fn record_publish(channel: &str) {
    counter!(names::MESSAGES_PUBLISHED, "channel" => channel.to_string()).increment(1);
}

/// Update the cached channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: every call is a no-op.
        describe_metrics();
        record_operation(Operation::Connect, "ok");
        record_latency(Operation::Connect, 0.01);
        record_error(ErrorCode::Timeout);
        record_publish("room");
        set_active_channels(3);
    }
}
