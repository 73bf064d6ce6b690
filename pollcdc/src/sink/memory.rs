use pollcdc_config::shared::ConflictMethod;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::CdcResult;
use crate::sink::Sink;
use crate::types::{ChangeValue, PrimaryKey, TableRow, UpsertRow};

/// A row as stored by a [`MemorySink`] table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub row: TableRow,
    pub sequence_token: ChangeValue,
}

#[derive(Debug)]
struct Inner {
    table: BTreeMap<PrimaryKey, StoredRow>,
    delivered: Vec<UpsertRow>,
    batches: u64,
}

/// Sink keeping the destination table in memory.
///
/// In [`ConflictMethod::Upsert`] mode the table applies the sequence token ordering, in
/// [`ConflictMethod::AppendOnly`] mode rows are only recorded in the delivery log.
#[derive(Debug, Clone)]
pub struct MemorySink {
    conflict_method: ConflictMethod,
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new(conflict_method: ConflictMethod) -> Self {
        let inner = Inner {
            table: BTreeMap::new(),
            delivered: Vec::new(),
            batches: 0,
        };

        Self {
            conflict_method,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns the current content of the table.
    pub async fn table(&self) -> BTreeMap<PrimaryKey, StoredRow> {
        let inner = self.inner.lock().await;
        inner.table.clone()
    }

    /// Returns every row delivered so far, in delivery order, including redeliveries.
    pub async fn delivered(&self) -> Vec<UpsertRow> {
        let inner = self.inner.lock().await;
        inner.delivered.clone()
    }

    pub async fn batches(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner.batches
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(ConflictMethod::Upsert)
    }
}

impl Sink for MemorySink {
    async fn prepare(&self) -> CdcResult<()> {
        info!(conflict_method = ?self.conflict_method, "memory sink ready");

        Ok(())
    }

    async fn write_upserts(&self, rows: Vec<UpsertRow>) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;
        debug!("writing a batch of {} rows", rows.len());

        inner.batches += 1;
        for upsert in rows {
            if self.conflict_method == ConflictMethod::Upsert {
                let replace = inner
                    .table
                    .get(&upsert.key)
                    .is_none_or(|stored| upsert.sequence_token >= stored.sequence_token);

                if replace {
                    inner.table.insert(
                        upsert.key.clone(),
                        StoredRow {
                            row: upsert.row.clone(),
                            sequence_token: upsert.sequence_token,
                        },
                    );
                }
            }

            inner.delivered.push(upsert);
        }

        Ok(())
    }
}
