use pollcdc::pipeline::Pipeline;
use pollcdc::sink::bigquery::BigQuerySink;
use pollcdc::sink::{MemorySink, Sink};
use pollcdc::source::MySqlSource;
use pollcdc::store::watermark::{MemoryWatermarkStore, PostgresWatermarkStore, WatermarkStore};
use pollcdc::types::TableSchema;
use pollcdc_config::shared::{
    BatchConfig, DestinationConfig, PipelineConfig, ReplicatorConfig, SourceConfig,
    StateStoreConfig, TableConfig, TargetConfig,
};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::migrations::migrate_state_store;

pub async fn start_replicator(config: ReplicatorConfig) -> anyhow::Result<()> {
    info!("starting replicator service");

    log_config(&config);

    let schema = Arc::new(TableSchema::from_config(&config.table)?);
    let source = MySqlSource::new(config.source.clone(), schema.clone());

    // Every sink and store combination is a distinct pipeline type.
    match &config.destination.target {
        TargetConfig::Memory => {
            let sink = MemorySink::new(config.destination.conflict_method);
            start_with_sink(config, source, sink).await?;
        }
        TargetConfig::BigQuery { .. } => {
            let sink = BigQuerySink::from_config(&config.destination, schema).await?;
            start_with_sink(config, source, sink).await?;
        }
    }

    info!("replicator service completed");

    Ok(())
}

async fn start_with_sink<Snk>(
    config: ReplicatorConfig,
    source: MySqlSource,
    sink: Snk,
) -> anyhow::Result<()>
where
    Snk: Sink + Clone + Send + Sync + fmt::Debug + 'static,
{
    match &config.state_store {
        StateStoreConfig::Memory => {
            warn!("the watermark is kept in memory, a restart bootstraps the pipeline again");

            let store = MemoryWatermarkStore::new();
            start_pipeline(Pipeline::new(config.pipeline, source, sink, store)).await
        }
        StateStoreConfig::Postgres(connection) => {
            migrate_state_store(connection).await?;

            let store = PostgresWatermarkStore::new(config.pipeline.id, connection.clone());
            start_pipeline(Pipeline::new(config.pipeline, source, sink, store)).await
        }
    }
}

fn log_config(config: &ReplicatorConfig) {
    log_pipeline_config(&config.pipeline);
    log_source_config(&config.source);
    log_table_config(&config.table);
    log_destination_config(&config.destination);
}

fn log_pipeline_config(config: &PipelineConfig) {
    info!(
        pipeline_id = config.id,
        poll_interval_secs = config.poll_interval_secs,
        bootstrap_mode = %config.bootstrap_mode,
        fetch_timeout_ms = config.fetch_timeout_ms,
        "pipeline config"
    );
    log_batch_config(&config.batch);
}

fn log_batch_config(config: &BatchConfig) {
    info!(
        max_size = config.max_size,
        max_fill_ms = config.max_fill_ms,
        "batch config"
    );
}

fn log_source_config(config: &SourceConfig) {
    info!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        "source mysql connection config",
    );
}

fn log_table_config(config: &TableConfig) {
    info!(
        table = config.name,
        change_column = config.change_column,
        primary_key_column = config.primary_key_column,
        fields = config.fields.len(),
        "table config"
    );
}

fn log_destination_config(config: &DestinationConfig) {
    match &config.target {
        TargetConfig::Memory => {
            info!(conflict_method = ?config.conflict_method, "memory destination config");
        }
        TargetConfig::BigQuery {
            project_id,
            dataset_id,
            table_id,
            service_account_key_path: _,
            max_staleness_mins,
        } => {
            info!(
                project_id,
                dataset_id,
                table_id,
                max_staleness_mins,
                create_policy = ?config.create_policy,
                conflict_method = ?config.conflict_method,
                "bigquery destination config"
            )
        }
    }
}

#[tracing::instrument(skip(pipeline), fields(pipeline_id = pipeline.id()))]
async fn start_pipeline<St, Snk>(mut pipeline: Pipeline<MySqlSource, Snk, St>) -> anyhow::Result<()>
where
    St: WatermarkStore + Clone + Send + Sync + fmt::Debug + 'static,
    Snk: Sink + Clone + Send + Sync + fmt::Debug + 'static,
{
    pipeline.start().await?;

    let shutdown_tx = pipeline.shutdown_tx();
    let shutdown_handle = tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!("failed to register SIGTERM handler: {}", err);
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT (Ctrl+C) received, shutting down pipeline");
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down pipeline");
            }
        }

        if let Err(e) = shutdown_tx.shutdown() {
            warn!("failed to send shutdown signal: {:?}", e);
            return;
        }

        info!("pipeline shutdown successfully")
    });

    let result = pipeline.wait().await;

    // The pipeline may have stopped on its own, the signal task is then still waiting.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    result?;

    Ok(())
}
