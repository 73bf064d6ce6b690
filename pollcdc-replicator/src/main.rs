use pollcdc_config::Environment;
use pollcdc_config::shared::{ReplicatorConfig, SentryConfig};
use pollcdc_telemetry::init_tracing_with_top_level_fields;
use pollcdc_telemetry::metrics::{DEFAULT_METRICS_PORT, init_metrics};
use tracing::info;

use crate::config::load_replicator_config;
use crate::core::start_replicator;

mod config;
mod core;
mod migrations;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_name = env!("CARGO_BIN_NAME");

    // An invalid configuration stops the process before anything connects.
    let config = load_replicator_config()?;

    let _log_flusher = init_tracing_with_top_level_fields(
        app_name,
        Some(config.pipeline.id),
        Some(config.table.name.clone()),
    )?;

    let _sentry_guard = init_sentry(&config)?;

    init_metrics(DEFAULT_METRICS_PORT, Some(config.pipeline.id))?;

    start_replicator(config).await?;

    Ok(())
}

/// Initializes Sentry when a DSN is configured, tagging every event with the pipeline.
fn init_sentry(config: &ReplicatorConfig) -> anyhow::Result<Option<sentry::ClientInitGuard>> {
    let Some(SentryConfig { dsn }) = &config.sentry else {
        info!("Sentry not configured for replicator, skipping initialization");

        return Ok(None);
    };

    info!("initializing Sentry for replicator");

    let environment = Environment::load()?;
    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn.parse()?),
        environment: Some(environment.to_string().into()),
        ..Default::default()
    });

    let pipeline_id = config.pipeline.id.to_string();
    sentry::configure_scope(|scope| {
        scope.set_tag("service", "pollcdc-replicator");
        scope.set_tag("pipeline_id", pipeline_id);
    });

    Ok(Some(guard))
}
