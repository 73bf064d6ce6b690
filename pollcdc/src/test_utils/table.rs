use pollcdc_config::shared::{FieldConfig, FieldMode, FieldType, TableConfig};
use std::sync::Arc;

use crate::types::{Cell, TableRow, TableSchema};

pub const PRODUCTS_TABLE: &str = "products";

/// A `products(id, name, cv)` table with an integer change column `cv`.
pub fn products_table_config() -> TableConfig {
    TableConfig {
        name: PRODUCTS_TABLE.to_string(),
        change_column: "cv".to_string(),
        primary_key_column: "id".to_string(),
        fields: vec![
            FieldConfig {
                name: "id".to_string(),
                typ: FieldType::Integer,
                mode: FieldMode::Required,
            },
            FieldConfig {
                name: "name".to_string(),
                typ: FieldType::String,
                mode: FieldMode::Nullable,
            },
            FieldConfig {
                name: "cv".to_string(),
                typ: FieldType::Integer,
                mode: FieldMode::Nullable,
            },
        ],
    }
}

pub fn products_schema() -> Arc<TableSchema> {
    let schema = TableSchema::from_config(&products_table_config())
        .expect("the products table config is valid");

    Arc::new(schema)
}

pub fn product_row(id: i64, cv: Option<i64>) -> TableRow {
    TableRow::new(vec![
        Cell::I64(id),
        Cell::String(format!("product-{id}")),
        Cell::from(cv),
    ])
}
