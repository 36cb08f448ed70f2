// Structured logging
pub mod logging;

// Metric names and the Prometheus exporter
pub mod metrics;

pub use logging::init_logging;
pub use metrics::install_prometheus_recorder;
