use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::{Ipv4Addr, SocketAddr};
use thiserror::Error;

/// Port of the `/metrics` endpoint when none is configured.
pub const DEFAULT_METRICS_PORT: u16 = 9000;

/// Name of the global label carrying the pipeline id.
const PIPELINE_ID_LABEL: &str = "pipeline_id";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to install the prometheus exporter: {0}")]
    Install(#[from] BuildError),
}

/// Installs the global metrics recorder and serves it on `0.0.0.0:{port}/metrics`.
///
/// When `pipeline_id` is set every metric carries it as the `pipeline_id` label. Must be called
/// from within a tokio runtime, at most once per process.
pub fn init_metrics(port: u16, pipeline_id: Option<u64>) -> Result<(), MetricsError> {
    let mut builder = PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));

    if let Some(pipeline_id) = pipeline_id {
        builder = builder.add_global_label(PIPELINE_ID_LABEL, pipeline_id.to_string());
    }

    builder.install()?;

    Ok(())
}
