use chrono::{NaiveDate, NaiveDateTime, Utc};
use futures::{StreamExt, stream};
use pollcdc_config::shared::{IntoConnectOptions, SourceConfig};
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::{Connection, Row};
use std::sync::Arc;
use tracing::debug;

use crate::error::{CdcError, CdcResult, ErrorKind};
use crate::source::{ChangeSession, ChangeSource, ChangeStream};
use crate::types::{
    Cell, ChangeRecord, ChangeValue, ColumnSchema, ColumnType, TableRow, TableSchema,
};
use crate::{bail, cdc_error};

/// Quotes a MySQL identifier.
fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Statements of a table, built once per source.
#[derive(Debug)]
struct Queries {
    fetch_all: String,
    fetch_since: String,
    fetch_max: String,
}

impl Queries {
    fn new(schema: &TableSchema) -> Self {
        let table = quote_identifier(&schema.name);
        let change_column = quote_identifier(&schema.change_column().name);
        let primary_key = quote_identifier(&schema.primary_key_column().name);
        let columns = schema
            .column_names()
            .map(quote_identifier)
            .collect::<Vec<_>>()
            .join(", ");

        // Datetime watermarks are bound as `watermark + 1ms` so that the comparison stays strict
        // at millisecond granularity even for columns with sub-millisecond precision.
        let since_operator = match schema.change_column().typ {
            ColumnType::Datetime => ">=",
            _ => ">",
        };

        Self {
            fetch_all: format!(
                "select {columns} from {table} order by {change_column} asc, {primary_key} asc"
            ),
            fetch_since: format!(
                "select {columns} from {table} where {change_column} {since_operator} ? \
                 order by {change_column} asc, {primary_key} asc"
            ),
            fetch_max: format!("select max({change_column}) from {table}"),
        }
    }
}

fn decode_cell(row: &MySqlRow, index: usize, column: &ColumnSchema) -> CdcResult<Cell> {
    let cell = match column.typ {
        ColumnType::Bool => Cell::from(row.try_get::<Option<bool>, _>(index)?),
        ColumnType::Integer => Cell::from(row.try_get::<Option<i64>, _>(index)?),
        ColumnType::Float => Cell::from(row.try_get::<Option<f64>, _>(index)?),
        ColumnType::String => Cell::from(row.try_get::<Option<String>, _>(index)?),
        ColumnType::Date => Cell::from(row.try_get::<Option<NaiveDate>, _>(index)?),
        ColumnType::Datetime => Cell::from(row.try_get::<Option<NaiveDateTime>, _>(index)?),
        ColumnType::Bytes => Cell::from(row.try_get::<Option<Vec<u8>>, _>(index)?),
        ColumnType::Json => Cell::from(
            row.try_get::<Option<sqlx::types::Json<serde_json::Value>>, _>(index)?
                .map(|json| json.0),
        ),
    };

    if cell.is_null() && !column.nullable {
        bail!(
            ErrorKind::InvalidData,
            "Null value in a required column",
            format!("The column '{}' is required but the source returned null", column.name)
        );
    }

    Ok(cell)
}

fn decode_record(schema: &TableSchema, row: MySqlRow) -> CdcResult<ChangeRecord> {
    let values = schema
        .column_schemas
        .iter()
        .enumerate()
        .map(|(index, column)| decode_cell(&row, index, column))
        .collect::<CdcResult<Vec<_>>>()?;

    ChangeRecord::from_row(schema, TableRow::new(values), Utc::now())
}

/// Change source reading a MySQL table through `sqlx`.
#[derive(Debug, Clone)]
pub struct MySqlSource {
    config: SourceConfig,
    schema: Arc<TableSchema>,
    queries: Arc<Queries>,
}

impl MySqlSource {
    pub fn new(config: SourceConfig, schema: Arc<TableSchema>) -> Self {
        let queries = Arc::new(Queries::new(&schema));

        Self {
            config,
            schema,
            queries,
        }
    }
}

impl ChangeSource for MySqlSource {
    type Session = MySqlSession;

    async fn connect(&self) -> CdcResult<MySqlSession> {
        let connection = MySqlConnection::connect_with(&self.config.with_db())
            .await
            .map_err(|err| {
                cdc_error!(
                    ErrorKind::SourceConnectionFailed,
                    "Failed to connect to the source database",
                    err
                )
            })?;

        debug!(host = %self.config.host, database = %self.config.name, "opened source session");

        Ok(MySqlSession {
            connection,
            schema: self.schema.clone(),
            queries: self.queries.clone(),
        })
    }
}

/// A single MySQL connection used by one poll cycle.
#[derive(Debug)]
pub struct MySqlSession {
    connection: MySqlConnection,
    schema: Arc<TableSchema>,
    queries: Arc<Queries>,
}

impl ChangeSession for MySqlSession {
    fn fetch_all(&mut self) -> ChangeStream<'_> {
        let schema = self.schema.clone();

        sqlx::query(&self.queries.fetch_all)
            .fetch(&mut self.connection)
            .map(move |row| decode_record(&schema, row?))
            .boxed()
    }

    fn fetch_since(&mut self, watermark: ChangeValue) -> ChangeStream<'_> {
        let schema = self.schema.clone();
        let query = sqlx::query(&self.queries.fetch_since);

        let query = match self.schema.change_column().typ {
            ColumnType::Datetime => match watermark.next().to_datetime() {
                Some(lower_bound) => query.bind(lower_bound),
                None => {
                    let err: CdcError = cdc_error!(
                        ErrorKind::ConversionError,
                        "Watermark out of the datetime range",
                        format!("The watermark {watermark} cannot be converted to a datetime")
                    );
                    return stream::once(async move { Err(err) }).boxed();
                }
            },
            _ => query.bind(watermark.as_millis()),
        };

        query
            .fetch(&mut self.connection)
            .map(move |row| decode_record(&schema, row?))
            .boxed()
    }

    async fn fetch_max(&mut self) -> CdcResult<Option<ChangeValue>> {
        let row = sqlx::query(&self.queries.fetch_max)
            .fetch_one(&mut self.connection)
            .await?;

        let max = match self.schema.change_column().typ {
            ColumnType::Datetime => row
                .try_get::<Option<NaiveDateTime>, _>(0)?
                .map(|datetime| ChangeValue::from_datetime(&datetime)),
            _ => row
                .try_get::<Option<i64>, _>(0)?
                .map(ChangeValue::from_millis),
        };

        Ok(max)
    }

    async fn close(self) -> CdcResult<()> {
        self.connection.close().await.map_err(|err| {
            cdc_error!(
                ErrorKind::SourceConnectionFailed,
                "Failed to close the source session",
                err
            )
        })
    }
}
