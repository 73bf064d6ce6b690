use chrono::Utc;
use futures::{StreamExt, stream};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::CdcResult;
use crate::source::{ChangeSession, ChangeSource, ChangeStream};
use crate::types::{ChangeRecord, ChangeValue, PrimaryKey, TableRow, TableSchema};

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<PrimaryKey, TableRow>,
    sessions_opened: u64,
    sessions_closed: u64,
}

/// Change source backed by an in-memory table.
///
/// Clones share the same table, so a test can keep mutating rows while a pipeline polls them.
#[derive(Debug, Clone)]
pub struct MemorySource {
    schema: Arc<TableSchema>,
    inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Inserts `row`, replacing the row with the same primary key.
    pub async fn upsert_row(&self, row: TableRow) -> CdcResult<()> {
        let record = ChangeRecord::from_row(&self.schema, row, Utc::now())?;

        let mut inner = self.inner.lock().await;
        inner.rows.insert(record.key, record.row);

        Ok(())
    }

    pub async fn delete_row(&self, key: &PrimaryKey) -> Option<TableRow> {
        let mut inner = self.inner.lock().await;
        inner.rows.remove(key)
    }

    /// Returns the number of sessions opened and closed so far.
    pub async fn sessions(&self) -> (u64, u64) {
        let inner = self.inner.lock().await;
        (inner.sessions_opened, inner.sessions_closed)
    }

    /// Snapshots the records matching `filter`, ordered like the MySQL fetch queries.
    async fn snapshot(
        &self,
        filter: impl Fn(Option<ChangeValue>) -> bool,
    ) -> Vec<CdcResult<ChangeRecord>> {
        let fetched_at = Utc::now();
        let inner = self.inner.lock().await;

        let mut records = Vec::with_capacity(inner.rows.len());
        for row in inner.rows.values() {
            match ChangeRecord::from_row(&self.schema, row.clone(), fetched_at) {
                Ok(record) if filter(record.change_value) => records.push(record),
                Ok(_) => {}
                Err(err) => return vec![Err(err)],
            }
        }

        // `None` sorts first, as NULL does in an ascending MySQL ordering.
        records.sort_by(|a, b| {
            a.change_value
                .cmp(&b.change_value)
                .then_with(|| a.key.cmp(&b.key))
        });

        records.into_iter().map(Ok).collect()
    }
}

impl ChangeSource for MemorySource {
    type Session = MemorySession;

    async fn connect(&self) -> CdcResult<MemorySession> {
        let mut inner = self.inner.lock().await;
        inner.sessions_opened += 1;

        Ok(MemorySession {
            source: self.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MemorySession {
    source: MemorySource,
}

impl ChangeSession for MemorySession {
    fn fetch_all(&mut self) -> ChangeStream<'_> {
        let source = self.source.clone();

        stream::once(async move { source.snapshot(|_| true).await })
            .flat_map(stream::iter)
            .boxed()
    }

    fn fetch_since(&mut self, watermark: ChangeValue) -> ChangeStream<'_> {
        let source = self.source.clone();

        stream::once(async move {
            source
                .snapshot(|change_value| change_value.is_some_and(|value| value > watermark))
                .await
        })
        .flat_map(stream::iter)
        .boxed()
    }

    async fn fetch_max(&mut self) -> CdcResult<Option<ChangeValue>> {
        let records = self.source.snapshot(|_| true).await;

        let mut max = None;
        for record in records {
            max = max.max(record?.change_value);
        }

        Ok(max)
    }

    async fn close(self) -> CdcResult<()> {
        let mut inner = self.source.inner.lock().await;
        inner.sessions_closed += 1;

        Ok(())
    }
}
