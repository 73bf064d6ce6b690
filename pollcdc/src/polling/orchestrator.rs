use futures::StreamExt;
use metrics::{counter, gauge, histogram};
use pollcdc_config::shared::{BootstrapMode, PipelineConfig};
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{Span, debug, info, warn};

use crate::concurrency::batch::{BatchEvent, FetchBatchStream};
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{CdcResult, ErrorKind};
#[cfg(feature = "failpoints")]
use crate::failpoints::{
    POLL_CYCLE_BEFORE_COMMIT, POLL_CYCLE_BEFORE_SINK_WRITE, cdc_fail_point,
};
use crate::metrics::{
    MODE, PIPELINE_ID, POLLCDC_CYCLE_DURATION_SECONDS, POLLCDC_ROWS_EMITTED_TOTAL,
    POLLCDC_SINK_BATCH_DURATION_SECONDS, POLLCDC_SINK_BATCH_SIZE, POLLCDC_WATERMARK_MS,
};
use crate::polling::PartitionState;
use crate::sink::Sink;
use crate::source::{ChangeSession, ChangeSource, ChangeStream};
use crate::store::watermark::WatermarkStore;
use crate::time::Clock;
use crate::types::{
    ChangeValue, CycleOutcome, CycleReport, PipelineId, PollCycle, TickId, UpsertRow,
};
use crate::{bail, cdc_error};

/// Result of a source operation raced against the shutdown signal.
enum Guarded<T> {
    Completed(T),
    Shutdown,
}

/// How the emission of a fetch ended.
enum Emission {
    Completed,
    Cancelled,
}

/// Runs poll cycles for one partition.
///
/// Each cycle reads the watermark, fetches the rows selected by the partition state, writes them
/// to the sink in batches and commits the new watermark. Any error aborts the cycle before the
/// commit, leaving the watermark as it was, so the next cycle covers the same range again.
#[derive(Debug)]
pub struct Orchestrator<Src, Snk, St> {
    pipeline_id: PipelineId,
    config: Arc<PipelineConfig>,
    source: Src,
    sink: Snk,
    store: St,
    clock: Arc<dyn Clock>,
}

impl<Src, Snk, St> Orchestrator<Src, Snk, St>
where
    Src: ChangeSource + Sync,
    Snk: Sink + Sync,
    St: WatermarkStore + Sync,
{
    pub fn new(
        config: Arc<PipelineConfig>,
        source: Src,
        sink: Snk,
        store: St,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pipeline_id: config.id,
            config,
            source,
            sink,
            store,
            clock,
        }
    }

    /// Runs the cycle of tick `tick_id`.
    ///
    /// A shutdown observed while waiting on the source ends the cycle as
    /// [`CycleOutcome::Cancelled`] without committing. Sink writes are never interrupted.
    pub async fn run_cycle(
        &self,
        tick_id: TickId,
        shutdown_rx: &mut ShutdownRx,
    ) -> CdcResult<CycleReport> {
        let started_at = Instant::now();

        let watermark = self.store.get().await?;
        let state = PartitionState::from_watermark(&watermark)?;
        let mode = state.fetch_mode(self.config.bootstrap_mode);
        Span::current().record("mode", tracing::field::display(mode));

        let mut cycle = PollCycle::new(tick_id, watermark, mode);
        debug!(%watermark, "starting poll cycle");

        let mut session = match self
            .guarded(shutdown_rx, "connect", self.source.connect())
            .await?
        {
            Guarded::Completed(session) => session,
            Guarded::Shutdown => {
                return Ok(self.report(cycle, CycleOutcome::Cancelled, started_at));
            }
        };

        let result = self
            .drive(&mut session, state, &mut cycle, shutdown_rx)
            .await;

        if let Err(err) = session.close().await {
            warn!(error = %err, "failed to close the source session");
        }

        let outcome = result?;

        Ok(self.report(cycle, outcome, started_at))
    }

    async fn drive(
        &self,
        session: &mut Src::Session,
        state: PartitionState,
        cycle: &mut PollCycle,
        shutdown_rx: &mut ShutdownRx,
    ) -> CdcResult<CycleOutcome> {
        match state {
            PartitionState::Uninitialized => match self.config.bootstrap_mode {
                BootstrapMode::FullSync => {
                    if let Emission::Cancelled =
                        self.emit(session.fetch_all(), cycle, shutdown_rx).await?
                    {
                        return Ok(CycleOutcome::Cancelled);
                    }

                    let value = cycle.max_change_value_seen.unwrap_or_else(|| self.now());
                    self.commit(cycle, value, true).await
                }
                BootstrapMode::WatermarkOnly => {
                    let max = match self
                        .guarded(shutdown_rx, "fetch_max", session.fetch_max())
                        .await?
                    {
                        Guarded::Completed(max) => max,
                        Guarded::Shutdown => return Ok(CycleOutcome::Cancelled),
                    };
                    cycle.observe(max);

                    let value = max.unwrap_or_else(|| self.now());
                    self.commit(cycle, value, true).await
                }
            },
            PartitionState::SteadyState { watermark } => {
                if let Emission::Cancelled = self
                    .emit(session.fetch_since(watermark), cycle, shutdown_rx)
                    .await?
                {
                    return Ok(CycleOutcome::Cancelled);
                }

                match cycle.max_change_value_seen {
                    Some(max) if cycle.rows_emitted > 0 => self.commit(cycle, max, false).await,
                    _ => Ok(CycleOutcome::Unchanged),
                }
            }
        }
    }

    /// Writes every record of `changes` to the sink, tagging each with its sequence token.
    async fn emit(
        &self,
        changes: ChangeStream<'_>,
        cycle: &mut PollCycle,
        shutdown_rx: &mut ShutdownRx,
    ) -> CdcResult<Emission> {
        let mut batches = pin!(FetchBatchStream::wrap(
            changes,
            self.config.batch.clone(),
            self.config.fetch_timeout()
        ));

        loop {
            let event = tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!(
                        rows_emitted = cycle.rows_emitted,
                        "shutdown requested during fetch, cancelling cycle"
                    );

                    return Ok(Emission::Cancelled);
                }

                event = batches.next() => event,
            };

            let records = match event {
                Some(BatchEvent::Batch(records)) => records,
                Some(BatchEvent::Stalled) => bail!(
                    ErrorKind::SourceTimeout,
                    "Source fetch timed out",
                    format!(
                        "No row was received within {}ms",
                        self.config.fetch_timeout_ms
                    )
                ),
                None => return Ok(Emission::Completed),
            };

            let mut upserts = Vec::with_capacity(records.len());
            for record in records {
                let record = record?;
                cycle.observe(record.change_value);

                // Rows without a change value fall back to the current time.
                let sequence_token = record.change_value.unwrap_or_else(|| self.now());
                upserts.push(UpsertRow {
                    key: record.key,
                    row: record.row,
                    sequence_token,
                });
            }

            self.write_batch(cycle, upserts).await?;
        }
    }

    async fn write_batch(&self, cycle: &mut PollCycle, upserts: Vec<UpsertRow>) -> CdcResult<()> {
        #[cfg(feature = "failpoints")]
        cdc_fail_point(POLL_CYCLE_BEFORE_SINK_WRITE)?;

        let num_rows = upserts.len() as u64;
        let before_sending = Instant::now();

        self.sink.write_upserts(upserts).await?;

        let pipeline_id = self.pipeline_id.to_string();
        histogram!(POLLCDC_SINK_BATCH_DURATION_SECONDS, PIPELINE_ID => pipeline_id.clone())
            .record(before_sending.elapsed().as_secs_f64());
        gauge!(POLLCDC_SINK_BATCH_SIZE, PIPELINE_ID => pipeline_id.clone()).set(num_rows as f64);
        counter!(
            POLLCDC_ROWS_EMITTED_TOTAL,
            PIPELINE_ID => pipeline_id,
            MODE => cycle.mode.to_string()
        )
        .increment(num_rows);

        cycle.rows_emitted += num_rows;
        debug!(rows = num_rows, total = cycle.rows_emitted, "wrote batch to sink");

        Ok(())
    }

    /// Commits `value`, never moving the watermark below the one the cycle started from.
    async fn commit(
        &self,
        cycle: &PollCycle,
        value: ChangeValue,
        mark_first_poll_done: bool,
    ) -> CdcResult<CycleOutcome> {
        let value = cycle
            .watermark_at_start
            .last_change_value
            .map_or(value, |current| current.max(value));

        #[cfg(feature = "failpoints")]
        cdc_fail_point(POLL_CYCLE_BEFORE_COMMIT)?;

        let watermark = self.store.commit(value, mark_first_poll_done).await?;

        gauge!(POLLCDC_WATERMARK_MS, PIPELINE_ID => self.pipeline_id.to_string())
            .set(value.as_millis() as f64);
        info!(%watermark, "committed watermark");

        Ok(CycleOutcome::Committed { watermark: value })
    }

    /// Races `future` against the shutdown signal and the fetch timeout.
    async fn guarded<T>(
        &self,
        shutdown_rx: &mut ShutdownRx,
        operation: &'static str,
        future: impl Future<Output = CdcResult<T>>,
    ) -> CdcResult<Guarded<T>> {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                info!(operation, "shutdown requested, cancelling cycle");

                Ok(Guarded::Shutdown)
            }

            result = tokio::time::timeout(self.config.fetch_timeout(), future) => match result {
                Ok(result) => result.map(Guarded::Completed),
                Err(_) => Err(cdc_error!(
                    ErrorKind::SourceTimeout,
                    "Source operation timed out",
                    format!(
                        "The {operation} operation did not complete within {}ms",
                        self.config.fetch_timeout_ms
                    )
                )),
            },
        }
    }

    fn now(&self) -> ChangeValue {
        ChangeValue::from_utc(&self.clock.now())
    }

    fn report(&self, cycle: PollCycle, outcome: CycleOutcome, started_at: Instant) -> CycleReport {
        let duration = started_at.elapsed();

        histogram!(POLLCDC_CYCLE_DURATION_SECONDS, PIPELINE_ID => self.pipeline_id.to_string())
            .record(duration.as_secs_f64());
        info!(
            rows = cycle.rows_emitted,
            outcome = outcome.as_str(),
            duration_ms = duration.as_millis() as u64,
            "poll cycle finished"
        );

        CycleReport {
            cycle,
            outcome,
            duration,
        }
    }
}
