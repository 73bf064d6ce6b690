use metrics::counter;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info};

use crate::cdc_error;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{CdcError, CdcResult, ErrorKind};
use crate::metrics::{FAILED, OUTCOME, PIPELINE_ID, POLLCDC_CYCLES_TOTAL};
use crate::polling::Orchestrator;
use crate::sink::Sink;
use crate::source::ChangeSource;
use crate::store::watermark::WatermarkStore;
use crate::types::{CycleOutcome, CycleReport, PipelineId};
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::ticker::Tick;

/// Counters and last results of the poll worker.
#[derive(Debug, Clone, Default)]
pub struct PollWorkerStatus {
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub cycles_cancelled: u64,
    pub last_report: Option<CycleReport>,
    pub last_error: Option<CdcError>,
}

impl PollWorkerStatus {
    /// Total number of cycles which ran, whatever their outcome.
    pub fn cycles(&self) -> u64 {
        self.cycles_succeeded + self.cycles_failed + self.cycles_cancelled
    }

    fn record_report(&mut self, report: CycleReport) {
        match report.outcome {
            CycleOutcome::Cancelled => self.cycles_cancelled += 1,
            CycleOutcome::Committed { .. } | CycleOutcome::Unchanged => self.cycles_succeeded += 1,
        }
        self.last_report = Some(report);
    }

    fn record_error(&mut self, err: CdcError) {
        self.cycles_failed += 1;
        self.last_error = Some(err);
    }
}

/// Read access to the status published by a [`PollWorker`].
#[derive(Debug, Clone)]
pub struct PollWorkerState {
    status_rx: watch::Receiver<PollWorkerStatus>,
}

impl PollWorkerState {
    /// Returns a snapshot of the current status.
    pub fn status(&self) -> PollWorkerStatus {
        self.status_rx.borrow().clone()
    }

    /// Waits until the status satisfies `condition` and returns it.
    ///
    /// Fails when the worker stopped before the condition was met.
    pub async fn wait_for<F>(&mut self, mut condition: F) -> CdcResult<PollWorkerStatus>
    where
        F: FnMut(&PollWorkerStatus) -> bool,
    {
        match self.status_rx.wait_for(|status| condition(status)).await {
            Ok(status) => Ok(status.clone()),
            Err(_) => Err(cdc_error!(
                ErrorKind::InvalidState,
                "Poll worker stopped",
                "The poll worker stopped before reaching the awaited status"
            )),
        }
    }
}

#[derive(Debug)]
pub struct PollWorkerHandle {
    state: PollWorkerState,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle<PollWorkerState> for PollWorkerHandle {
    fn state(&self) -> PollWorkerState {
        self.state.clone()
    }

    async fn wait(mut self) -> CdcResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| {
            cdc_error!(ErrorKind::PollWorkerPanic, "Poll worker panicked", err)
        })
    }
}

/// Runs one poll cycle per received tick.
///
/// The worker is the single owner of the partition: cycles never overlap. A failed cycle is
/// logged, counted and published in the status, the worker then waits for the next tick.
#[derive(Debug)]
pub struct PollWorker<Src, Snk, St> {
    pipeline_id: PipelineId,
    orchestrator: Orchestrator<Src, Snk, St>,
    tick_rx: mpsc::Receiver<Tick>,
    shutdown_rx: ShutdownRx,
}

impl<Src, Snk, St> PollWorker<Src, Snk, St> {
    pub fn new(
        pipeline_id: PipelineId,
        orchestrator: Orchestrator<Src, Snk, St>,
        tick_rx: mpsc::Receiver<Tick>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            pipeline_id,
            orchestrator,
            tick_rx,
            shutdown_rx,
        }
    }
}

impl<Src, Snk, St> Worker<PollWorkerHandle, PollWorkerState> for PollWorker<Src, Snk, St>
where
    Src: ChangeSource + Send + Sync + 'static,
    Snk: Sink + Send + Sync + 'static,
    St: WatermarkStore + Send + Sync + 'static,
{
    async fn start(mut self) -> CdcResult<PollWorkerHandle> {
        info!("starting poll worker");

        let (status_tx, status_rx) = watch::channel(PollWorkerStatus::default());

        let poll_worker_span = tracing::info_span!("poll_worker", pipeline_id = self.pipeline_id);
        let poll_worker = async move {
            loop {
                let tick = tokio::select! {
                    biased;

                    _ = self.shutdown_rx.changed() => {
                        info!("shutting down poll worker");
                        break;
                    }

                    tick = self.tick_rx.recv() => match tick {
                        Some(tick) => tick,
                        None => {
                            info!("ticker stopped, shutting down poll worker");
                            break;
                        }
                    },
                };

                let cycle_span = tracing::info_span!(
                    "poll_cycle",
                    pipeline_id = self.pipeline_id,
                    tick_id = tick.id,
                    tick_emitted_at = %tick.emitted_at,
                    mode = tracing::field::Empty
                );
                let result = self
                    .orchestrator
                    .run_cycle(tick.id, &mut self.shutdown_rx)
                    .instrument(cycle_span)
                    .await;

                match result {
                    Ok(report) => {
                        let outcome = report.outcome;
                        counter!(
                            POLLCDC_CYCLES_TOTAL,
                            PIPELINE_ID => self.pipeline_id.to_string(),
                            OUTCOME => outcome.as_str()
                        )
                        .increment(1);
                        status_tx.send_modify(|status| status.record_report(report));

                        // The shutdown signal was consumed by the cycle.
                        if outcome == CycleOutcome::Cancelled {
                            info!("poll cycle cancelled, shutting down poll worker");
                            break;
                        }
                    }
                    Err(err) => {
                        error!(tick_id = tick.id, error = %err, "poll cycle failed");
                        counter!(
                            POLLCDC_CYCLES_TOTAL,
                            PIPELINE_ID => self.pipeline_id.to_string(),
                            OUTCOME => FAILED
                        )
                        .increment(1);
                        status_tx.send_modify(|status| status.record_error(err));
                    }
                }
            }
        }
        .instrument(poll_worker_span);

        let handle = tokio::spawn(poll_worker);

        Ok(PollWorkerHandle {
            state: PollWorkerState { status_rx },
            handle: Some(handle),
        })
    }
}
