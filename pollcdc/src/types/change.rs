use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::types::{Cell, TableRow, TableSchema};

/// Value of the change column as milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangeValue(i64);

impl ChangeValue {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Interprets a naive datetime as UTC.
    pub fn from_datetime(datetime: &NaiveDateTime) -> Self {
        Self(datetime.and_utc().timestamp_millis())
    }

    pub fn from_utc(datetime: &DateTime<Utc>) -> Self {
        Self(datetime.timestamp_millis())
    }

    /// Returns the value as a UTC naive datetime, `None` when out of chrono's range.
    pub fn to_datetime(self) -> Option<NaiveDateTime> {
        DateTime::from_timestamp_millis(self.0).map(|datetime| datetime.naive_utc())
    }

    /// The smallest value strictly greater than this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Reads a change value from a cell of the change column.
    ///
    /// `Null` yields `None`, integers are taken as epoch milliseconds.
    pub fn from_cell(cell: &Cell) -> CdcResult<Option<Self>> {
        match cell {
            Cell::Null => Ok(None),
            Cell::Datetime(datetime) => Ok(Some(Self::from_datetime(datetime))),
            Cell::I64(millis) => Ok(Some(Self(*millis))),
            other => bail!(
                ErrorKind::ConversionError,
                "Invalid change column value",
                format!("Expected a datetime or an integer, got {other:?}")
            ),
        }
    }
}

impl From<i64> for ChangeValue {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

impl fmt::Display for ChangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Primary key of a source row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrimaryKey {
    Int(i64),
    Text(String),
}

impl PrimaryKey {
    pub fn from_cell(cell: &Cell) -> CdcResult<Self> {
        match cell {
            Cell::I64(value) => Ok(PrimaryKey::Int(*value)),
            Cell::String(value) => Ok(PrimaryKey::Text(value.clone())),
            Cell::Null => bail!(
                ErrorKind::InvalidData,
                "Null primary key",
                "A row without a primary key value cannot be upserted"
            ),
            other => bail!(
                ErrorKind::ConversionError,
                "Invalid primary key value",
                format!("Expected an integer or a string, got {other:?}")
            ),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Int(value) => write!(f, "{value}"),
            PrimaryKey::Text(value) => write!(f, "{value}"),
        }
    }
}

/// Snapshot of a changed source row, produced by a fetch and consumed once by the cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub key: PrimaryKey,
    pub row: TableRow,
    /// Value of the change column, `None` when the column is null.
    pub change_value: Option<ChangeValue>,
    pub fetched_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// Extracts the key and the change value of `row` using the column positions of `schema`.
    pub fn from_row(
        schema: &TableSchema,
        row: TableRow,
        fetched_at: DateTime<Utc>,
    ) -> CdcResult<Self> {
        if row.values.len() != schema.column_schemas.len() {
            bail!(
                ErrorKind::InvalidData,
                "Row does not match the table schema",
                format!(
                    "Expected {} values for table '{}', got {}",
                    schema.column_schemas.len(),
                    schema.name,
                    row.values.len()
                )
            );
        }

        let key = PrimaryKey::from_cell(&row.values[schema.primary_key_index()])?;
        let change_value = ChangeValue::from_cell(&row.values[schema.change_column_index()])?;

        Ok(Self {
            key,
            row,
            change_value,
            fetched_at,
        })
    }
}

/// A row handed to the sink together with its sequence token.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertRow {
    pub key: PrimaryKey,
    pub row: TableRow,
    /// Ordering token, a stored row is only replaced by a row with an equal or greater token.
    pub sequence_token: ChangeValue,
}
