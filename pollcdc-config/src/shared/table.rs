use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::shared::ValidationError;

/// Type of a column, shared by the source query and the sink schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Bool,
    Integer,
    Float,
    String,
    Date,
    Datetime,
    Bytes,
    Json,
}

/// Whether a column may hold nulls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldMode {
    #[default]
    Required,
    Nullable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub typ: FieldType,
    #[serde(default)]
    pub mode: FieldMode,
}

/// The polled source table and the schema carried to the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TableConfig {
    /// Name of the table in the source database.
    pub name: String,
    /// Last-modified column used as the change signal.
    pub change_column: String,
    pub primary_key_column: String,
    /// Ordered list of the columns read from the source and written to the sink.
    pub fields: Vec<FieldConfig>,
}

impl TableConfig {
    /// Returns the declared field called `name`, if any.
    pub fn field(&self, name: &str) -> Option<&FieldConfig> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyIdentifier("table.name"));
        }

        if self.fields.is_empty() {
            return Err(ValidationError::NoFields);
        }

        let mut seen = HashSet::with_capacity(self.fields.len());
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(ValidationError::EmptyIdentifier("table.fields.name"));
            }

            if !seen.insert(field.name.as_str()) {
                return Err(ValidationError::DuplicateField(field.name.clone()));
            }
        }

        let change_field =
            self.field(&self.change_column)
                .ok_or_else(|| ValidationError::MissingColumn {
                    role: "change",
                    column: self.change_column.clone(),
                })?;
        if !matches!(change_field.typ, FieldType::Datetime | FieldType::Integer) {
            return Err(ValidationError::InvalidChangeColumnType(
                change_field.name.clone(),
            ));
        }

        let key_field =
            self.field(&self.primary_key_column)
                .ok_or_else(|| ValidationError::MissingColumn {
                    role: "primary key",
                    column: self.primary_key_column.clone(),
                })?;
        if !matches!(key_field.typ, FieldType::Integer | FieldType::String) {
            return Err(ValidationError::InvalidPrimaryKeyType(key_field.name.clone()));
        }
        if key_field.mode == FieldMode::Nullable {
            return Err(ValidationError::NullablePrimaryKey(key_field.name.clone()));
        }

        Ok(())
    }
}
