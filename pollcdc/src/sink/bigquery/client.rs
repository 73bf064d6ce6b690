use futures::StreamExt;
use gcp_bigquery_client::google::cloud::bigquery::storage::v1::RowError;
use gcp_bigquery_client::storage::{ColumnMode, StorageApi};
use gcp_bigquery_client::{
    Client,
    error::BQError,
    model::{query_request::QueryRequest, query_response::ResultSet},
    storage::{ColumnType as StorageColumnType, FieldDescriptor, StreamName, TableDescriptor},
};
use std::fmt;
use tracing::info;

use crate::cdc_error;
use crate::error::{CdcError, CdcResult, ErrorKind};
use crate::sink::bigquery::encoding::BigQueryTableRow;
use crate::types::{ColumnSchema, ColumnType};

/// Maximum byte size of a single append request.
const MAX_SIZE_BYTES: usize = 9 * 1024 * 1024;

const TRACE_ID: &str = "pollcdc BigQueryClient";

/// Column holding the change type of an upserted row.
pub const BIGQUERY_CDC_SPECIAL_COLUMN: &str = "_CHANGE_TYPE";

/// Column holding the ordering token of an upserted row.
pub const BIGQUERY_CDC_SEQUENCE_COLUMN: &str = "_CHANGE_SEQUENCE_NUMBER";

pub const BIGQUERY_UPSERT: &str = "UPSERT";

pub type BigQueryProjectId = String;
pub type BigQueryDatasetId = String;
pub type BigQueryTableId = String;

/// Thin wrapper over the BigQuery client scoped to one project.
pub struct BigQueryClient {
    project_id: BigQueryProjectId,
    client: Client,
}

impl BigQueryClient {
    /// Creates a client authenticated with the service account key stored at `sa_key_path`.
    pub async fn new_with_key_path(
        project_id: BigQueryProjectId,
        sa_key_path: &str,
    ) -> CdcResult<BigQueryClient> {
        let client = Client::from_service_account_key_file(sa_key_path)
            .await
            .map_err(bq_error_to_cdc_error)?;

        Ok(BigQueryClient { project_id, client })
    }

    /// Returns the quoted `project.dataset.table` name of a table.
    pub fn full_table_name(
        &self,
        dataset_id: &BigQueryDatasetId,
        table_id: &BigQueryTableId,
    ) -> String {
        format!("`{}.{}.{}`", self.project_id, dataset_id, table_id)
    }

    /// Creates the table unless it exists. Returns whether it was created.
    pub async fn create_table_if_missing(
        &self,
        dataset_id: &BigQueryDatasetId,
        table_id: &BigQueryTableId,
        column_schemas: &[ColumnSchema],
        max_staleness_mins: Option<u16>,
    ) -> CdcResult<bool> {
        if self.table_exists(dataset_id, table_id).await? {
            return Ok(false);
        }

        self.create_table(dataset_id, table_id, column_schemas, max_staleness_mins)
            .await?;

        Ok(true)
    }

    pub async fn create_table(
        &self,
        dataset_id: &BigQueryDatasetId,
        table_id: &BigQueryTableId,
        column_schemas: &[ColumnSchema],
        max_staleness_mins: Option<u16>,
    ) -> CdcResult<()> {
        let full_table_name = self.full_table_name(dataset_id, table_id);
        let query = create_table_statement(&full_table_name, column_schemas, max_staleness_mins);

        info!("creating table {full_table_name} in BigQuery");

        let _ = self.query(QueryRequest::new(query)).await?;

        Ok(())
    }

    pub async fn table_exists(
        &self,
        dataset_id: &BigQueryDatasetId,
        table_id: &BigQueryTableId,
    ) -> CdcResult<bool> {
        let table = self
            .client
            .table()
            .get(&self.project_id, dataset_id, table_id, None)
            .await;

        match table {
            Ok(_) => Ok(true),
            Err(BQError::ResponseError { error }) if error.error.code == 404 => Ok(false),
            Err(err) => Err(bq_error_to_cdc_error(err)),
        }
    }

    /// Appends rows to the default stream of a table through the Storage Write API.
    ///
    /// Rows are split into requests of at most [`MAX_SIZE_BYTES`].
    pub async fn stream_rows(
        &mut self,
        dataset_id: &BigQueryDatasetId,
        table_id: &BigQueryTableId,
        table_descriptor: &TableDescriptor,
        table_rows: Vec<BigQueryTableRow>,
    ) -> CdcResult<()> {
        let mut table_rows = table_rows.as_slice();

        let default_stream = StreamName::new_default(
            self.project_id.clone(),
            dataset_id.to_string(),
            table_id.to_string(),
        );

        while !table_rows.is_empty() {
            let (rows, num_processed_rows) =
                StorageApi::create_rows(table_descriptor, table_rows, MAX_SIZE_BYTES);

            let mut append_rows_stream = self
                .client
                .storage_mut()
                .append_rows(&default_stream, rows, TRACE_ID.to_owned())
                .await
                .map_err(bq_error_to_cdc_error)?;

            if let Some(append_rows_response) = append_rows_stream.next().await {
                let append_rows_response = append_rows_response
                    .map_err(BQError::from)
                    .map_err(bq_error_to_cdc_error)?;

                if !append_rows_response.row_errors.is_empty() {
                    let row_errors = append_rows_response
                        .row_errors
                        .into_iter()
                        .map(row_error_to_cdc_error)
                        .collect::<Vec<_>>();

                    return Err(row_errors.into());
                }
            }

            table_rows = &table_rows[num_processed_rows..];
        }

        Ok(())
    }

    pub async fn query(&self, request: QueryRequest) -> CdcResult<ResultSet> {
        let query_response = self
            .client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(bq_error_to_cdc_error)?;

        Ok(ResultSet::new_from_query_response(query_response))
    }
}

impl fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("project_id", &self.project_id)
            .finish()
    }
}

fn bigquery_type(typ: ColumnType) -> &'static str {
    match typ {
        ColumnType::Bool => "bool",
        ColumnType::Integer => "int64",
        ColumnType::Float => "float64",
        ColumnType::String => "string",
        ColumnType::Date => "date",
        ColumnType::Datetime => "timestamp",
        ColumnType::Bytes => "bytes",
        ColumnType::Json => "json",
    }
}

fn column_spec(column_schema: &ColumnSchema) -> String {
    let mut column_spec = format!(
        "`{}` {}",
        column_schema.name,
        bigquery_type(column_schema.typ)
    );

    if !column_schema.nullable {
        column_spec.push_str(" not null");
    }

    column_spec
}

/// Builds the `create table` statement of a table keyed by its (non-enforced) primary key.
fn create_table_statement(
    full_table_name: &str,
    column_schemas: &[ColumnSchema],
    max_staleness_mins: Option<u16>,
) -> String {
    let mut columns = column_schemas
        .iter()
        .map(column_spec)
        .collect::<Vec<_>>()
        .join(",");

    let primary_keys = column_schemas
        .iter()
        .filter(|column| column.primary)
        .map(|column| format!("`{}`", column.name))
        .collect::<Vec<_>>();
    if !primary_keys.is_empty() {
        columns.push_str(&format!(
            ", primary key ({}) not enforced",
            primary_keys.join(",")
        ));
    }

    match max_staleness_mins {
        Some(max_staleness_mins) => format!(
            "create table {full_table_name} ({columns}) \
             options (max_staleness = interval {max_staleness_mins} minute)"
        ),
        None => format!("create table {full_table_name} ({columns})"),
    }
}

/// Builds the Storage Write API descriptor of the table.
///
/// With `use_cdc_columns`, the `_CHANGE_TYPE` and `_CHANGE_SEQUENCE_NUMBER` pseudo columns are
/// appended after the table columns.
pub fn column_schemas_to_table_descriptor(
    column_schemas: &[ColumnSchema],
    use_cdc_columns: bool,
) -> TableDescriptor {
    let mut field_descriptors = Vec::with_capacity(column_schemas.len() + 2);

    for (number, column_schema) in (1..).zip(column_schemas) {
        let typ = match column_schema.typ {
            ColumnType::Bool => StorageColumnType::Bool,
            ColumnType::Integer => StorageColumnType::Int64,
            ColumnType::Float => StorageColumnType::Double,
            ColumnType::Bytes => StorageColumnType::Bytes,
            ColumnType::String | ColumnType::Date | ColumnType::Datetime | ColumnType::Json => {
                StorageColumnType::String
            }
        };

        let mode = if column_schema.nullable {
            ColumnMode::Nullable
        } else {
            ColumnMode::Required
        };

        field_descriptors.push(FieldDescriptor {
            number,
            name: column_schema.name.clone(),
            typ,
            mode,
        });
    }

    if use_cdc_columns {
        let number = field_descriptors.len() as u32 + 1;

        field_descriptors.push(FieldDescriptor {
            number,
            name: BIGQUERY_CDC_SPECIAL_COLUMN.to_string(),
            typ: StorageColumnType::String,
            mode: ColumnMode::Required,
        });
        field_descriptors.push(FieldDescriptor {
            number: number + 1,
            name: BIGQUERY_CDC_SEQUENCE_COLUMN.to_string(),
            typ: StorageColumnType::String,
            mode: ColumnMode::Required,
        });
    }

    TableDescriptor { field_descriptors }
}

/// Converts a [`BQError`] into a [`CdcError`] of the matching kind.
fn bq_error_to_cdc_error(err: BQError) -> CdcError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account key",
        ),
        BQError::InvalidServiceAccountAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account authenticator",
        ),
        BQError::InvalidInstalledFlowAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery installed flow authenticator",
        ),
        BQError::InvalidApplicationDefaultCredentialsAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery application default credentials",
        ),
        BQError::InvalidAuthorizedUserAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery authorized user authenticator",
        ),
        BQError::AuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication error",
        ),
        BQError::YupAuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery OAuth authentication error",
        ),
        BQError::NoToken => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication token missing",
        ),
        BQError::RequestError(_) => (
            ErrorKind::DestinationConnectionFailed,
            "BigQuery request failed",
        ),
        BQError::TonicTransportError(_) => (
            ErrorKind::DestinationConnectionFailed,
            "BigQuery transport error",
        ),
        BQError::ResponseError { .. } => (
            ErrorKind::DestinationQueryFailed,
            "BigQuery response error",
        ),
        BQError::NoDataAvailable => (
            ErrorKind::InvalidState,
            "BigQuery result set positioning error",
        ),
        BQError::InvalidColumnIndex { .. } => {
            (ErrorKind::InvalidData, "BigQuery invalid column index")
        }
        BQError::InvalidColumnName { .. } => {
            (ErrorKind::InvalidData, "BigQuery invalid column name")
        }
        BQError::InvalidColumnType { .. } => {
            (ErrorKind::ConversionError, "BigQuery column type mismatch")
        }
        BQError::SerializationError(_) => (
            ErrorKind::SerializationError,
            "BigQuery JSON serialization error",
        ),
        BQError::TonicInvalidMetadataValueError(_) => {
            (ErrorKind::ConfigError, "BigQuery invalid metadata value")
        }
        BQError::TonicStatusError(status) => {
            // The `Code` type of `tonic` is not re-exported, so the status is matched by its
            // description.
            if status.code().description()
                == "The caller does not have permission to execute the specified operation"
            {
                (ErrorKind::PermissionDenied, "BigQuery permission denied")
            } else {
                (ErrorKind::DestinationError, "BigQuery gRPC status error")
            }
        }
    };

    cdc_error!(kind, description, err)
}

fn row_error_to_cdc_error(err: RowError) -> CdcError {
    cdc_error!(
        ErrorKind::DestinationError,
        "BigQuery row error",
        format!("{err:?}")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("id".to_string(), ColumnType::Integer, false, true),
            ColumnSchema::new("name".to_string(), ColumnType::String, true, false),
            ColumnSchema::new("updated_at".to_string(), ColumnType::Datetime, true, false),
        ]
    }

    #[test]
    fn column_spec_marks_required_columns() {
        let columns = columns();

        assert_eq!(column_spec(&columns[0]), "`id` int64 not null");
        assert_eq!(column_spec(&columns[1]), "`name` string");
        assert_eq!(column_spec(&columns[2]), "`updated_at` timestamp");
    }

    #[test]
    fn create_table_statement_has_non_enforced_primary_key() {
        let statement = create_table_statement("`p.d.products`", &columns(), None);

        assert_eq!(
            statement,
            "create table `p.d.products` (`id` int64 not null,`name` string,`updated_at` timestamp, \
             primary key (`id`) not enforced)"
        );
    }

    #[test]
    fn create_table_statement_with_max_staleness() {
        let statement = create_table_statement("`p.d.products`", &columns(), Some(15));

        assert!(statement.ends_with("options (max_staleness = interval 15 minute)"));
    }

    #[test]
    fn descriptor_with_cdc_columns() {
        let descriptor = column_schemas_to_table_descriptor(&columns(), true);

        assert_eq!(descriptor.field_descriptors.len(), 5);
        assert_eq!(descriptor.field_descriptors[0].number, 1);
        assert!(matches!(
            descriptor.field_descriptors[0].typ,
            StorageColumnType::Int64
        ));
        assert!(matches!(
            descriptor.field_descriptors[0].mode,
            ColumnMode::Required
        ));
        assert!(matches!(
            descriptor.field_descriptors[2].typ,
            StorageColumnType::String
        ));
        assert!(matches!(
            descriptor.field_descriptors[2].mode,
            ColumnMode::Nullable
        ));
        assert_eq!(
            descriptor.field_descriptors[3].name,
            BIGQUERY_CDC_SPECIAL_COLUMN
        );
        assert_eq!(descriptor.field_descriptors[4].number, 5);
        assert_eq!(
            descriptor.field_descriptors[4].name,
            BIGQUERY_CDC_SEQUENCE_COLUMN
        );
    }

    #[test]
    fn descriptor_without_cdc_columns() {
        let descriptor = column_schemas_to_table_descriptor(&columns(), false);

        assert_eq!(descriptor.field_descriptors.len(), 3);
    }
}
