//! Metrics and observability
//!
//! Prometheus-compatible metrics with atomic counters on the connection path.

mod counters;
mod exporter;

pub use counters::*;
pub use exporter::{init_metrics, set_phase};
