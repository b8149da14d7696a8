//! Metrics for the lanework engine.
//!
//! Thin layer over the `metrics` facade. Without an installed recorder every
//! macro is a no-op; the `prometheus` feature installs an exporter whose
//! handle renders the text exposition format.
//!
//! ```rust,ignore
//! use lanework_metrics::{counter, lane, labels};
//!
//! counter!(lane::ENQUEUED_TOTAL, labels::PATH => "allocated").increment(1);
//! ```

mod definitions;
mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
