use crate::types::Cell;

/// A row of the source table.
///
/// Values are ordered like the columns of the [`crate::types::TableSchema`] the row was read
/// with.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub values: Vec<Cell>,
}

impl TableRow {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }
}
