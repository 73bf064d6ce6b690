use futures::{StreamExt, stream};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{CdcResult, ErrorKind};
use crate::sink::Sink;
use crate::source::{ChangeSession, ChangeSource, ChangeStream, MemorySession, MemorySource};
use crate::types::{ChangeValue, UpsertRow};
use crate::{bail, cdc_error};

/// A fault applied to the next session opened on a [`FaultInjectingSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFault {
    /// The connection attempt fails.
    FailConnect,
    /// The connection attempt never completes.
    StallConnect,
    /// The fetch yields the given number of rows, then an error.
    FailAfterRows(usize),
    /// The fetch yields the given number of rows, then nothing ever again.
    StallAfterRows(usize),
    /// The fetch waits for the given duration before yielding each row.
    SlowRows(Duration),
}

/// A [`MemorySource`] whose sessions fail in scripted ways.
///
/// Each injected fault is consumed by one session, in injection order. Sessions opened without a
/// pending fault behave like the wrapped source.
#[derive(Debug, Clone)]
pub struct FaultInjectingSource {
    inner: MemorySource,
    faults: Arc<Mutex<VecDeque<SourceFault>>>,
}

impl FaultInjectingSource {
    pub fn wrap(inner: MemorySource) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn inner(&self) -> &MemorySource {
        &self.inner
    }

    pub async fn inject(&self, fault: SourceFault) {
        let mut faults = self.faults.lock().await;
        faults.push_back(fault);
    }
}

impl ChangeSource for FaultInjectingSource {
    type Session = FaultInjectingSession;

    async fn connect(&self) -> CdcResult<FaultInjectingSession> {
        let fault = {
            let mut faults = self.faults.lock().await;
            faults.pop_front()
        };

        match fault {
            Some(SourceFault::FailConnect) => bail!(
                ErrorKind::SourceConnectionFailed,
                "Injected connection failure"
            ),
            Some(SourceFault::StallConnect) => std::future::pending::<()>().await,
            _ => {}
        }

        let session = self.inner.connect().await?;

        Ok(FaultInjectingSession {
            inner: session,
            fault,
        })
    }
}

#[derive(Debug)]
pub struct FaultInjectingSession {
    inner: MemorySession,
    fault: Option<SourceFault>,
}

fn inject_fault(changes: ChangeStream<'_>, fault: Option<SourceFault>) -> ChangeStream<'_> {
    match fault {
        Some(SourceFault::FailAfterRows(rows)) => changes
            .take(rows)
            .chain(stream::once(async {
                Err(cdc_error!(
                    ErrorKind::SourceQueryFailed,
                    "Injected fetch failure"
                ))
            }))
            .boxed(),
        Some(SourceFault::StallAfterRows(rows)) => {
            changes.take(rows).chain(stream::pending()).boxed()
        }
        Some(SourceFault::SlowRows(delay)) => changes
            .then(move |change| async move {
                tokio::time::sleep(delay).await;
                change
            })
            .boxed(),
        _ => changes,
    }
}

impl ChangeSession for FaultInjectingSession {
    fn fetch_all(&mut self) -> ChangeStream<'_> {
        let fault = self.fault;
        inject_fault(self.inner.fetch_all(), fault)
    }

    fn fetch_since(&mut self, watermark: ChangeValue) -> ChangeStream<'_> {
        let fault = self.fault;
        inject_fault(self.inner.fetch_since(watermark), fault)
    }

    async fn fetch_max(&mut self) -> CdcResult<Option<ChangeValue>> {
        match self.fault {
            Some(SourceFault::FailAfterRows(_)) => bail!(
                ErrorKind::SourceQueryFailed,
                "Injected fetch failure"
            ),
            Some(SourceFault::StallAfterRows(_)) => std::future::pending().await,
            _ => self.inner.fetch_max().await,
        }
    }

    async fn close(self) -> CdcResult<()> {
        self.inner.close().await
    }
}

#[derive(Debug, Default)]
struct SinkFaults {
    fail_prepare: bool,
    write_delay: Option<Duration>,
    remaining_rows: Option<usize>,
    failures: u64,
}

/// A sink which fails once after accepting a given number of rows, which cannot be prepared or
/// which is slow to write.
///
/// The rows accepted before the failure are written to the wrapped sink, like a destination
/// which applied part of a request before breaking.
#[derive(Debug, Clone)]
pub struct FaultInjectingSink<S> {
    inner: S,
    faults: Arc<Mutex<SinkFaults>>,
}

impl<S> FaultInjectingSink<S> {
    pub fn wrap(inner: S) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(SinkFaults::default())),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Makes every following [`Sink::prepare`] fail, like an unreachable destination.
    pub async fn fail_prepare(&self) {
        let mut faults = self.faults.lock().await;
        faults.fail_prepare = true;
    }

    /// Arms a single failure, raised once `rows` more rows have been written.
    pub async fn fail_after_rows(&self, rows: usize) {
        let mut faults = self.faults.lock().await;
        faults.remaining_rows = Some(rows);
    }

    /// Makes every following write wait for `delay` before reaching the wrapped sink.
    pub async fn delay_writes(&self, delay: Duration) {
        let mut faults = self.faults.lock().await;
        faults.write_delay = Some(delay);
    }

    pub async fn failures(&self) -> u64 {
        let faults = self.faults.lock().await;
        faults.failures
    }
}

impl<S> Sink for FaultInjectingSink<S>
where
    S: Sink + Send + Sync,
{
    async fn prepare(&self) -> CdcResult<()> {
        let fail_prepare = self.faults.lock().await.fail_prepare;
        if fail_prepare {
            bail!(
                ErrorKind::DestinationConnectionFailed,
                "Injected sink preparation failure"
            );
        }

        self.inner.prepare().await
    }

    async fn write_upserts(&self, mut rows: Vec<UpsertRow>) -> CdcResult<()> {
        let write_delay = self.faults.lock().await.write_delay;
        if let Some(delay) = write_delay {
            tokio::time::sleep(delay).await;
        }

        let mut faults = self.faults.lock().await;

        let Some(remaining_rows) = faults.remaining_rows else {
            drop(faults);
            return self.inner.write_upserts(rows).await;
        };

        if rows.len() <= remaining_rows {
            faults.remaining_rows = Some(remaining_rows - rows.len());
            drop(faults);
            return self.inner.write_upserts(rows).await;
        }

        faults.remaining_rows = None;
        faults.failures += 1;
        drop(faults);

        rows.truncate(remaining_rows);
        if !rows.is_empty() {
            self.inner.write_upserts(rows).await?;
        }

        bail!(
            ErrorKind::DestinationError,
            "Injected sink failure",
            format!("The sink failed after accepting {remaining_rows} more rows")
        );
    }
}
