//! Metric name and label definitions.
//!
//! Every metric the engine emits is named here so dashboards and the
//! engine agree on one spelling.

/// Lane dispatch and processing metrics
pub mod lane {
    /// Items accepted by `enqueue` (labels: path = appended|allocated|deferred|ignored)
    pub const ENQUEUED_TOTAL: &str = "lanework_lane_enqueued_total";
    /// Items handed to the callback by a lane processor
    pub const DELIVERED_TOTAL: &str = "lanework_lane_delivered_total";
    /// Callback failures (labels: error_type = failed|panicked)
    pub const CALLBACK_ERRORS_TOTAL: &str = "lanework_lane_callback_errors_total";
    /// Callback duration in seconds
    pub const CALLBACK_DURATION_SECONDS: &str = "lanework_lane_callback_duration_seconds";
    /// Lanes bound to an owner
    pub const BOUND: &str = "lanework_lanes_bound";
    /// Lane bindings created
    pub const BINDINGS_TOTAL: &str = "lanework_lane_bindings_total";
    /// Lanes released (labels: reason = drained|dropped)
    pub const RELEASES_TOTAL: &str = "lanework_lane_releases_total";
}

/// Waiting list (overflow) metrics
pub mod waiting {
    /// Items currently waiting for a free lane
    pub const DEPTH: &str = "lanework_waiting_depth";
    /// Items forwarded from the waiting list onto a lane
    pub const FORWARDED_TOTAL: &str = "lanework_waiting_forwarded_total";
    /// Items skipped by the drainer (no owner, or engine shut down)
    pub const SKIPPED_TOTAL: &str = "lanework_waiting_skipped_total";
    /// Drainer tasks started
    pub const DRAINER_STARTS_TOTAL: &str = "lanework_waiting_drainer_starts_total";
    /// Drainer tasks torn down after their idle timeout
    pub const DRAINER_TEARDOWNS_TOTAL: &str = "lanework_waiting_drainer_teardowns_total";
}

/// Pull reader metrics
pub mod reader {
    /// Reads by outcome (labels: outcome = item|timed_out|unbound|cancelled|shut_down)
    pub const READS_TOTAL: &str = "lanework_reader_reads_total";
    /// Time a read spent waiting, in seconds
    pub const WAIT_DURATION_SECONDS: &str = "lanework_reader_wait_duration_seconds";
}

/// Common label keys
pub mod labels {
    pub const PATH: &str = "path";
    pub const ERROR_TYPE: &str = "error_type";
    pub const REASON: &str = "reason";
    pub const OUTCOME: &str = "outcome";
}

/// Histogram buckets
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Callback duration buckets (in seconds)
    /// Covers 100µs to 60s
    pub static CALLBACK_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            30.0, 60.0,
        ]
    });

    /// Reader wait buckets (in seconds)
    /// Covers 1ms to 5 minutes; interactive reads wait on humans
    pub static READ_WAIT: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
        ]
    });
}
