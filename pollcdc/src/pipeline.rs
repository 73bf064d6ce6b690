//! Polling pipeline lifecycle.
//!
//! Contains the [`Pipeline`] struct which wires a change source, a sink and a watermark store
//! into a ticker worker and a poll worker, and coordinates their startup and shutdown.

use pollcdc_config::shared::PipelineConfig;
use std::sync::Arc;
use tracing::{error, info};

use crate::cdc_error;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::{CdcResult, ErrorKind};
use crate::metrics::register_metrics;
use crate::polling::{Orchestrator, PartitionState};
use crate::sink::Sink;
use crate::source::ChangeSource;
use crate::store::watermark::WatermarkStore;
use crate::time::{Clock, SystemClock};
use crate::types::PipelineId;
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::poller::{PollWorker, PollWorkerHandle, PollWorkerState};
use crate::workers::ticker::{TickerWorker, TickerWorkerHandle, create_tick_channel};

/// Internal state tracking for pipeline lifecycle.
#[derive(Debug)]
enum PipelineState {
    /// Pipeline has been created but not yet started.
    NotStarted,
    /// Pipeline is running with active workers.
    Started {
        ticker: TickerWorkerHandle,
        poller: PollWorkerHandle,
    },
}

/// Incremental polling pipeline of one source table.
///
/// A [`Pipeline`] periodically reads the rows of the source table changed since its watermark
/// and upserts them into the sink. The watermark store holds the progress of the pipeline, so a
/// restarted pipeline resumes from the last committed watermark.
#[derive(Debug)]
pub struct Pipeline<Src, Snk, St> {
    config: Arc<PipelineConfig>,
    source: Src,
    sink: Snk,
    store: St,
    clock: Arc<dyn Clock>,
    state: PipelineState,
    shutdown_tx: ShutdownTx,
}

impl<Src, Snk, St> Pipeline<Src, Snk, St>
where
    Src: ChangeSource + Clone + Send + Sync + 'static,
    Snk: Sink + Clone + Send + Sync + 'static,
    St: WatermarkStore + Clone + Send + Sync + 'static,
{
    /// Creates a new pipeline which must be explicitly started with [`Pipeline::start`].
    pub fn new(config: PipelineConfig, source: Src, sink: Snk, store: St) -> Self {
        // Safe to call for every pipeline, metrics are described once.
        register_metrics();
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            source,
            sink,
            store,
            clock: Arc::new(SystemClock),
            state: PipelineState::NotStarted,
            shutdown_tx,
        }
    }

    /// Replaces the clock used for the fallback watermarks and the tick timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the unique identifier for this pipeline.
    pub fn id(&self) -> PipelineId {
        self.config.id
    }

    /// Returns a handle for sending shutdown signals to this pipeline.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Returns the status of the poll worker, or `None` when the pipeline is not started.
    pub fn status(&self) -> Option<PollWorkerState> {
        match &self.state {
            PipelineState::NotStarted => None,
            PipelineState::Started { poller, .. } => Some(poller.state()),
        }
    }

    /// Starts the pipeline.
    ///
    /// The configuration is validated, the watermark is loaded and the sink is prepared before
    /// any worker starts. Any failure in these steps is returned and the pipeline does not start.
    pub async fn start(&mut self) -> CdcResult<()> {
        if let PipelineState::Started { .. } = self.state {
            return Err(cdc_error!(
                ErrorKind::InvalidState,
                "Pipeline already started",
                format!("The pipeline {} was already started", self.config.id)
            ));
        }

        info!(
            pipeline_id = self.config.id,
            poll_interval_secs = self.config.poll_interval_secs,
            bootstrap_mode = %self.config.bootstrap_mode,
            "starting pipeline"
        );

        self.config.validate()?;

        let watermark = self.store.load().await?;
        // A corrupted watermark must stop the pipeline before it polls.
        let state = PartitionState::from_watermark(&watermark)?;
        info!(%watermark, ?state, "loaded watermark");

        self.sink.prepare().await?;

        let (tick_tx, tick_rx) = create_tick_channel();

        let orchestrator = Orchestrator::new(
            self.config.clone(),
            self.source.clone(),
            self.sink.clone(),
            self.store.clone(),
            self.clock.clone(),
        );
        let poller = PollWorker::new(
            self.config.id,
            orchestrator,
            tick_rx,
            self.shutdown_tx.subscribe(),
        )
        .start()
        .await?;

        let ticker = TickerWorker::new(
            self.config.id,
            self.config.poll_interval(),
            self.clock.clone(),
            tick_tx,
            self.shutdown_tx.subscribe(),
        )
        .start()
        .await?;

        self.state = PipelineState::Started { ticker, poller };

        Ok(())
    }

    /// Waits for both workers to terminate.
    ///
    /// Returns immediately if the pipeline was never started. Worker panics are aggregated into
    /// the returned error.
    pub async fn wait(self) -> CdcResult<()> {
        let PipelineState::Started { ticker, poller } = self.state else {
            info!("pipeline was not started, nothing to wait for");

            return Ok(());
        };

        let mut errors = vec![];

        info!("waiting for poll worker to complete");
        if let Err(err) = poller.wait().await {
            errors.push(err);

            // Without a poll worker the ticks are useless.
            let _ = self.shutdown_tx.shutdown();

            info!("poll worker completed with an error, shutting down ticker worker");
        }

        info!("waiting for ticker worker to complete");
        if let Err(err) = ticker.wait().await {
            errors.push(err);
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }

    /// Sends the shutdown signal to the workers without waiting for them.
    ///
    /// An in-flight fetch is abandoned and its cycle ends without committing, an in-flight sink
    /// write completes first.
    pub fn shutdown(&self) {
        info!("trying to shut down the pipeline");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the pipeline: {}", err);
            return;
        }

        info!("shut down signal successfully sent to all workers");
    }

    /// Initiates shutdown and waits for complete pipeline termination.
    pub async fn shutdown_and_wait(self) -> CdcResult<()> {
        self.shutdown();
        self.wait().await
    }
}
