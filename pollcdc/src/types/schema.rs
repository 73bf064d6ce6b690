use pollcdc_config::shared::{FieldMode, TableConfig};

pub use pollcdc_config::shared::FieldType as ColumnType;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: ColumnType,
    pub nullable: bool,
    /// Whether the column is the primary key.
    pub primary: bool,
}

impl ColumnSchema {
    pub fn new(name: String, typ: ColumnType, nullable: bool, primary: bool) -> Self {
        Self {
            name,
            typ,
            nullable,
            primary,
        }
    }
}

/// Schema of the polled table, shared by the source query and the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub column_schemas: Vec<ColumnSchema>,
    change_column_index: usize,
    primary_key_index: usize,
}

impl TableSchema {
    /// Builds the schema of the table described by `config`.
    pub fn from_config(config: &TableConfig) -> CdcResult<Self> {
        let column_schemas = config
            .fields
            .iter()
            .map(|field| {
                ColumnSchema::new(
                    field.name.clone(),
                    field.typ,
                    field.mode == FieldMode::Nullable,
                    field.name == config.primary_key_column,
                )
            })
            .collect::<Vec<_>>();

        Self::new(
            config.name.clone(),
            column_schemas,
            &config.change_column,
            &config.primary_key_column,
        )
    }

    pub fn new(
        name: String,
        column_schemas: Vec<ColumnSchema>,
        change_column: &str,
        primary_key_column: &str,
    ) -> CdcResult<Self> {
        let Some(change_column_index) = column_schemas
            .iter()
            .position(|column| column.name == change_column)
        else {
            bail!(
                ErrorKind::ConfigError,
                "Change column missing from the schema",
                format!("The column '{change_column}' is not part of table '{name}'")
            );
        };

        let Some(primary_key_index) = column_schemas
            .iter()
            .position(|column| column.name == primary_key_column)
        else {
            bail!(
                ErrorKind::ConfigError,
                "Primary key column missing from the schema",
                format!("The column '{primary_key_column}' is not part of table '{name}'")
            );
        };

        Ok(Self {
            name,
            column_schemas,
            change_column_index,
            primary_key_index,
        })
    }

    pub fn change_column(&self) -> &ColumnSchema {
        &self.column_schemas[self.change_column_index]
    }

    pub fn change_column_index(&self) -> usize {
        self.change_column_index
    }

    pub fn primary_key_column(&self) -> &ColumnSchema {
        &self.column_schemas[self.primary_key_index]
    }

    pub fn primary_key_index(&self) -> usize {
        self.primary_key_index
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.column_schemas.iter().map(|column| column.name.as_str())
    }
}
