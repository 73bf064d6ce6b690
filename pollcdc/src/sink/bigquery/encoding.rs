use prost::bytes;

use crate::types::Cell;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A row encoded as a protocol buffer message for the Storage Write API.
///
/// Field `n` of the message holds the `n`-th cell, null cells are omitted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BigQueryTableRow(pub Vec<Cell>);

/// Temporal and JSON cells are written as strings, BigQuery parses them into the column type.
fn cell_as_string(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Date(date) => Some(date.format(DATE_FORMAT).to_string()),
        Cell::Datetime(datetime) => Some(datetime.format(TIMESTAMP_FORMAT).to_string()),
        Cell::Json(json) => Some(json.to_string()),
        _ => None,
    }
}

fn cell_encode_prost(cell: &Cell, tag: u32, buf: &mut impl bytes::BufMut) {
    match cell {
        Cell::Null => {}
        Cell::Bool(value) => prost::encoding::bool::encode(tag, value, buf),
        Cell::String(value) => prost::encoding::string::encode(tag, value, buf),
        Cell::I64(value) => prost::encoding::int64::encode(tag, value, buf),
        Cell::F64(value) => prost::encoding::double::encode(tag, value, buf),
        Cell::Bytes(value) => prost::encoding::bytes::encode(tag, value, buf),
        Cell::Date(_) | Cell::Datetime(_) | Cell::Json(_) => {
            if let Some(value) = cell_as_string(cell) {
                prost::encoding::string::encode(tag, &value, buf);
            }
        }
    }
}

fn cell_encoded_len_prost(cell: &Cell, tag: u32) -> usize {
    match cell {
        Cell::Null => 0,
        Cell::Bool(value) => prost::encoding::bool::encoded_len(tag, value),
        Cell::String(value) => prost::encoding::string::encoded_len(tag, value),
        Cell::I64(value) => prost::encoding::int64::encoded_len(tag, value),
        Cell::F64(value) => prost::encoding::double::encoded_len(tag, value),
        Cell::Bytes(value) => prost::encoding::bytes::encoded_len(tag, value),
        Cell::Date(_) | Cell::Datetime(_) | Cell::Json(_) => cell_as_string(cell)
            .map(|value| prost::encoding::string::encoded_len(tag, &value))
            .unwrap_or(0),
    }
}

impl prost::Message for BigQueryTableRow {
    fn encode_raw(&self, buf: &mut impl bytes::BufMut)
    where
        Self: Sized,
    {
        for (tag, cell) in (1..).zip(&self.0) {
            cell_encode_prost(cell, tag, buf);
        }
    }

    /// Rows are only ever sent, never decoded.
    fn merge_field(
        &mut self,
        _tag: u32,
        _wire_type: prost::encoding::WireType,
        _buf: &mut impl bytes::Buf,
        _ctx: prost::encoding::DecodeContext,
    ) -> Result<(), prost::DecodeError>
    where
        Self: Sized,
    {
        unimplemented!("merge_field not implemented yet");
    }

    fn encoded_len(&self) -> usize {
        (1..)
            .zip(&self.0)
            .map(|(tag, cell)| cell_encoded_len_prost(cell, tag))
            .sum()
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}
