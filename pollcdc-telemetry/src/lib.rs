//! Telemetry setup for pollcdc processes: tracing subscribers, the panic hook and the Prometheus
//! metrics exporter.

pub mod metrics;
pub mod tracing;

pub use self::metrics::{MetricsError, init_metrics};
pub use self::tracing::{
    LogFlusher, TracingError, init_test_tracing, init_tracing, init_tracing_with_top_level_fields,
};
