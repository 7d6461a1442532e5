//! Observability for the relay: process-global metrics

pub mod metrics;

pub use metrics::{GaugeSnapshot, Metrics};
