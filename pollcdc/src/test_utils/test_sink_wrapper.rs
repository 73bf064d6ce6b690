use std::fmt;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

use crate::error::CdcResult;
use crate::sink::Sink;
use crate::types::{PrimaryKey, UpsertRow};

type RowsCondition = Box<dyn Fn(&[UpsertRow]) -> bool + Send + Sync>;

struct Inner<S> {
    wrapped_sink: S,
    rows: Vec<UpsertRow>,
    write_calls: u64,
    failed_write_calls: u64,
    conditions: Vec<(RowsCondition, Arc<Notify>)>,
}

impl<S> Inner<S> {
    fn check_conditions(&mut self) {
        let rows = &self.rows;
        self.conditions.retain(|(condition, notify)| {
            let should_retain = !condition(rows);
            if !should_retain {
                notify.notify_one();
            }
            should_retain
        });
    }
}

/// A test wrapper that can wrap any sink and track the rows it accepted.
#[derive(Clone)]
pub struct TestSinkWrapper<S> {
    inner: Arc<RwLock<Inner<S>>>,
}

impl<S> TestSinkWrapper<S> {
    pub fn wrap(sink: S) -> Self {
        let inner = Inner {
            wrapped_sink: sink,
            rows: Vec::new(),
            write_calls: 0,
            failed_write_calls: 0,
            conditions: Vec::new(),
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Returns every row of the successful writes, in write order.
    pub async fn rows(&self) -> Vec<UpsertRow> {
        self.inner.read().await.rows.clone()
    }

    /// Returns the keys of the rows of the successful writes, in write order.
    pub async fn keys(&self) -> Vec<PrimaryKey> {
        let inner = self.inner.read().await;
        inner.rows.iter().map(|row| row.key.clone()).collect()
    }

    /// Returns the number of write calls and how many of them failed.
    pub async fn write_calls(&self) -> (u64, u64) {
        let inner = self.inner.read().await;
        (inner.write_calls, inner.failed_write_calls)
    }

    pub async fn notify_on_rows<F>(&self, condition: F) -> Arc<Notify>
    where
        F: Fn(&[UpsertRow]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.write().await;
        inner.conditions.push((Box::new(condition), notify.clone()));

        // The condition might already hold.
        inner.check_conditions();

        notify
    }

    /// Notifies once at least `count` rows were written.
    pub async fn wait_for_rows_count(&self, count: usize) -> Arc<Notify> {
        self.notify_on_rows(move |rows| rows.len() >= count).await
    }
}

impl<S> Sink for TestSinkWrapper<S>
where
    S: Sink + Clone + Send + Sync,
{
    async fn prepare(&self) -> CdcResult<()> {
        let sink = {
            let inner = self.inner.read().await;
            inner.wrapped_sink.clone()
        };

        sink.prepare().await
    }

    async fn write_upserts(&self, rows: Vec<UpsertRow>) -> CdcResult<()> {
        let sink = {
            let inner = self.inner.read().await;
            inner.wrapped_sink.clone()
        };

        let result = sink.write_upserts(rows.clone()).await;

        let mut inner = self.inner.write().await;
        inner.write_calls += 1;
        if result.is_ok() {
            inner.rows.extend(rows);
        } else {
            inner.failed_write_calls += 1;
        }
        inner.check_conditions();

        result
    }
}

impl<S: fmt::Debug> fmt::Debug for TestSinkWrapper<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSinkWrapper").finish()
    }
}
