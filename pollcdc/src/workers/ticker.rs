use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{CdcResult, ErrorKind};
use crate::metrics::{PIPELINE_ID, POLLCDC_TICKS_COALESCED_TOTAL};
use crate::time::Clock;
use crate::types::{PipelineId, TickId};
use crate::workers::base::{Worker, WorkerHandle};
use crate::cdc_error;

/// Number of ticks which can wait for the poll worker.
///
/// With a single slot a tick emitted while another one is pending is coalesced into it.
pub const TICK_CHANNEL_CAPACITY: usize = 1;

/// A trigger for one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub id: TickId,
    pub emitted_at: DateTime<Utc>,
}

/// Creates the bounded channel carrying ticks from the ticker to the poll worker.
pub fn create_tick_channel() -> (mpsc::Sender<Tick>, mpsc::Receiver<Tick>) {
    mpsc::channel(TICK_CHANNEL_CAPACITY)
}

#[derive(Debug)]
pub struct TickerWorkerHandle {
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle<()> for TickerWorkerHandle {
    fn state(&self) {}

    async fn wait(mut self) -> CdcResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(|err| {
            cdc_error!(
                ErrorKind::PollWorkerPanic,
                "Ticker worker panicked",
                err
            )
        })
    }
}

/// Emits ticks with strictly increasing ids at a fixed interval.
///
/// The schedule never waits for poll cycles: a tick which finds the channel full is dropped and
/// counted, its id is not reused.
#[derive(Debug)]
pub struct TickerWorker {
    pipeline_id: PipelineId,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
    tick_tx: mpsc::Sender<Tick>,
    shutdown_rx: ShutdownRx,
}

impl TickerWorker {
    pub fn new(
        pipeline_id: PipelineId,
        poll_interval: Duration,
        clock: Arc<dyn Clock>,
        tick_tx: mpsc::Sender<Tick>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            pipeline_id,
            poll_interval,
            clock,
            tick_tx,
            shutdown_rx,
        }
    }
}

impl Worker<TickerWorkerHandle, ()> for TickerWorker {
    async fn start(mut self) -> CdcResult<TickerWorkerHandle> {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "starting ticker worker"
        );

        let ticker_span = tracing::info_span!("ticker_worker", pipeline_id = self.pipeline_id);
        let ticker = async move {
            // The first tick completes immediately.
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut next_tick_id: TickId = 0;
            loop {
                tokio::select! {
                    biased;

                    _ = self.shutdown_rx.changed() => {
                        info!("shutting down ticker worker");
                        break;
                    }

                    _ = interval.tick() => {}
                }

                let tick = Tick {
                    id: next_tick_id,
                    emitted_at: self.clock.now(),
                };
                next_tick_id += 1;

                match self.tick_tx.try_send(tick) {
                    Ok(()) => debug!(tick_id = tick.id, "emitted tick"),
                    Err(TrySendError::Full(tick)) => {
                        warn!(
                            tick_id = tick.id,
                            "previous tick still pending, coalescing tick"
                        );
                        counter!(
                            POLLCDC_TICKS_COALESCED_TOTAL,
                            PIPELINE_ID => self.pipeline_id.to_string()
                        )
                        .increment(1);
                    }
                    Err(TrySendError::Closed(_)) => {
                        info!("poll worker is gone, stopping ticker worker");
                        break;
                    }
                }
            }
        }
        .instrument(ticker_span);

        let handle = tokio::spawn(ticker);

        Ok(TickerWorkerHandle {
            handle: Some(handle),
        })
    }
}
