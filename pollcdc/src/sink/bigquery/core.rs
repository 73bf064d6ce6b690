use gcp_bigquery_client::storage::TableDescriptor;
use pollcdc_config::shared::{ConflictMethod, CreatePolicy, DestinationConfig, TargetConfig};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{CdcResult, ErrorKind};
use crate::sink::Sink;
use crate::sink::bigquery::client::{
    BIGQUERY_UPSERT, BigQueryClient, BigQueryDatasetId, BigQueryTableId,
    column_schemas_to_table_descriptor,
};
use crate::sink::bigquery::encoding::BigQueryTableRow;
use crate::sink::bigquery::encryption::install_crypto_provider_for_bigquery;
use crate::types::{Cell, ChangeValue, TableSchema, UpsertRow};
use crate::{bail, cdc_error};

/// Encodes a sequence token as a `_CHANGE_SEQUENCE_NUMBER`.
///
/// BigQuery compares sequence numbers as unsigned hexadecimal, so the sign bit is flipped to keep
/// negative tokens ordered before positive ones.
fn generate_sequence_number(sequence_token: ChangeValue) -> String {
    let ordered = (sequence_token.as_millis() as u64) ^ (1 << 63);

    format!("{ordered:016x}")
}

#[derive(Debug)]
struct Inner {
    client: BigQueryClient,
}

/// Sink writing rows into a BigQuery table through the Storage Write API.
///
/// In [`ConflictMethod::Upsert`] mode every row carries `_CHANGE_TYPE = UPSERT` and its sequence
/// token, and BigQuery keeps the row with the highest token per primary key.
#[derive(Debug, Clone)]
pub struct BigQuerySink {
    dataset_id: BigQueryDatasetId,
    table_id: BigQueryTableId,
    schema: Arc<TableSchema>,
    create_policy: CreatePolicy,
    conflict_method: ConflictMethod,
    max_staleness_mins: Option<u16>,
    table_descriptor: Arc<TableDescriptor>,
    inner: Arc<Mutex<Inner>>,
}

impl BigQuerySink {
    /// Creates a sink for the BigQuery target described by `config`.
    pub async fn from_config(
        config: &DestinationConfig,
        schema: Arc<TableSchema>,
    ) -> CdcResult<Self> {
        let TargetConfig::BigQuery {
            project_id,
            dataset_id,
            table_id,
            service_account_key_path,
            max_staleness_mins,
        } = &config.target
        else {
            bail!(
                ErrorKind::ConfigError,
                "Destination is not BigQuery",
                "A BigQuery sink requires a bigquery target"
            );
        };

        install_crypto_provider_for_bigquery();
        let client =
            BigQueryClient::new_with_key_path(project_id.clone(), service_account_key_path).await?;

        let use_cdc_columns = config.conflict_method == ConflictMethod::Upsert;
        let table_descriptor =
            column_schemas_to_table_descriptor(&schema.column_schemas, use_cdc_columns);

        Ok(Self {
            dataset_id: dataset_id.clone(),
            table_id: table_id.clone(),
            schema,
            create_policy: config.create_policy,
            conflict_method: config.conflict_method,
            max_staleness_mins: *max_staleness_mins,
            table_descriptor: Arc::new(table_descriptor),
            inner: Arc::new(Mutex::new(Inner { client })),
        })
    }

    fn encode_row(&self, upsert: UpsertRow) -> BigQueryTableRow {
        let mut values = upsert.row.values;

        if self.conflict_method == ConflictMethod::Upsert {
            values.push(Cell::String(BIGQUERY_UPSERT.to_string()));
            values.push(Cell::String(generate_sequence_number(
                upsert.sequence_token,
            )));
        }

        BigQueryTableRow(values)
    }
}

impl Sink for BigQuerySink {
    async fn prepare(&self) -> CdcResult<()> {
        let inner = self.inner.lock().await;

        match self.create_policy {
            CreatePolicy::FailIfMissing => {
                if !inner
                    .client
                    .table_exists(&self.dataset_id, &self.table_id)
                    .await?
                {
                    return Err(cdc_error!(
                        ErrorKind::DestinationTableMissing,
                        "Destination table does not exist",
                        format!(
                            "The table {} is missing and the create policy is fail_if_missing",
                            inner.client.full_table_name(&self.dataset_id, &self.table_id)
                        )
                    ));
                }
            }
            CreatePolicy::CreateIfMissing => {
                let created = inner
                    .client
                    .create_table_if_missing(
                        &self.dataset_id,
                        &self.table_id,
                        &self.schema.column_schemas,
                        self.max_staleness_mins,
                    )
                    .await?;

                if created {
                    info!(table = %self.table_id, "created destination table");
                }
            }
        }

        info!(
            table = %inner.client.full_table_name(&self.dataset_id, &self.table_id),
            conflict_method = ?self.conflict_method,
            "bigquery sink ready"
        );

        Ok(())
    }

    async fn write_upserts(&self, rows: Vec<UpsertRow>) -> CdcResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        debug!("writing a batch of {} rows to bigquery", rows.len());

        let table_rows = rows
            .into_iter()
            .map(|upsert| self.encode_row(upsert))
            .collect::<Vec<_>>();

        let mut inner = self.inner.lock().await;
        inner
            .client
            .stream_rows(
                &self.dataset_id,
                &self.table_id,
                &self.table_descriptor,
                table_rows,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_preserve_token_order() {
        let tokens = [i64::MIN, -1, 0, 1, 1_700_000_000_000, i64::MAX];

        let sequence_numbers = tokens
            .iter()
            .map(|token| generate_sequence_number(ChangeValue::from_millis(*token)))
            .collect::<Vec<_>>();

        let mut sorted = sequence_numbers.clone();
        sorted.sort();
        assert_eq!(sequence_numbers, sorted);
        assert!(sequence_numbers.iter().all(|number| number.len() == 16));
    }

    #[test]
    fn sequence_number_of_epoch_millis() {
        assert_eq!(
            generate_sequence_number(ChangeValue::from_millis(100)),
            "8000000000000064"
        );
    }
}
