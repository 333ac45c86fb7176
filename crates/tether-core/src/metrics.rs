//! Metrics recorded by the pool.
//!
//! Uses the `metrics` facade; nothing is exported unless the application
//! installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CONNECT_ATTEMPTS_TOTAL: &str = "tether_connect_attempts_total";
    pub const CONNECT_FAILURES_TOTAL: &str = "tether_connect_failures_total";
    pub const RECONNECTS_TOTAL: &str = "tether_reconnects_total";
    pub const CONNECTIONS_ACTIVE: &str = "tether_connections_active";
    pub const CONNECTIONS_POOLED: &str = "tether_connections_pooled";
    pub const TOPICS_SUBSCRIBED: &str = "tether_topics_subscribed";
    pub const FRAMES_TOTAL: &str = "tether_frames_total";
    pub const MESSAGES_DISPATCHED_TOTAL: &str = "tether_messages_dispatched_total";
    pub const HANDLER_ERRORS_TOTAL: &str = "tether_handler_errors_total";
    pub const REDISTRIBUTE_FAILURES_TOTAL: &str = "tether_redistribute_failures_total";
}

/// Describe all metrics to the installed recorder.
pub fn describe() {
    metrics::describe_counter!(
        names::CONNECT_ATTEMPTS_TOTAL,
        "Connection attempts, including retries"
    );
    metrics::describe_counter!(names::CONNECT_FAILURES_TOTAL, "Failed connection attempts");
    metrics::describe_counter!(names::RECONNECTS_TOTAL, "Reconnects by reason");
    metrics::describe_gauge!(names::CONNECTIONS_ACTIVE, "Sockets currently connected");
    metrics::describe_gauge!(names::CONNECTIONS_POOLED, "Connections held by the pool");
    metrics::describe_gauge!(names::TOPICS_SUBSCRIBED, "Topics assigned to connections");
    metrics::describe_counter!(names::FRAMES_TOTAL, "Protocol frames by direction");
    metrics::describe_counter!(
        names::MESSAGES_DISPATCHED_TOTAL,
        "Messages handed to topic handlers"
    );
    metrics::describe_counter!(names::HANDLER_ERRORS_TOTAL, "Topic handler failures");
    metrics::describe_counter!(
        names::REDISTRIBUTE_FAILURES_TOTAL,
        "Recycled topics that could not be reassigned"
    );
}

pub(crate) fn record_connect_attempt() {
    counter!(names::CONNECT_ATTEMPTS_TOTAL).increment(1);
}

pub(crate) fn record_connect_failure() {
    counter!(names::CONNECT_FAILURES_TOTAL).increment(1);
}

pub(crate) fn record_reconnect(reason: &'static str) {
    counter!(names::RECONNECTS_TOTAL, "reason" => reason).increment(1);
}

/// Counts one live socket for as long as it is held, including when the
/// owning task is aborted.
pub(crate) struct ConnectedGuard;

impl ConnectedGuard {
    pub(crate) fn new() -> Self {
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Drop for ConnectedGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

pub(crate) fn set_pooled(connections: usize, topics: usize) {
    gauge!(names::CONNECTIONS_POOLED).set(connections as f64);
    gauge!(names::TOPICS_SUBSCRIBED).set(topics as f64);
}

pub(crate) fn record_frame(direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
}

pub(crate) fn record_dispatch() {
    counter!(names::MESSAGES_DISPATCHED_TOTAL).increment(1);
}

pub(crate) fn record_handler_error() {
    counter!(names::HANDLER_ERRORS_TOTAL).increment(1);
}

pub(crate) fn record_redistribute_failure() {
    counter!(names::REDISTRIBUTE_FAILURES_TOTAL).increment(1);
}
