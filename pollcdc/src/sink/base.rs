use std::future::Future;

use crate::error::CdcResult;
use crate::types::UpsertRow;

/// Destination of the changed rows.
///
/// The engine delivers rows at least once. A sink in upsert mode must make redelivery harmless:
/// a row is inserted when its key is absent and replaces the stored row only when its
/// `sequence_token` is greater than or equal to the stored one.
pub trait Sink {
    /// Checks, and when configured creates, the destination table.
    ///
    /// Called once before the first poll cycle. An error prevents the pipeline from starting.
    fn prepare(&self) -> impl Future<Output = CdcResult<()>> + Send;

    /// Writes a batch of rows.
    ///
    /// On error, rows of the batch may or may not have been applied.
    fn write_upserts(&self, rows: Vec<UpsertRow>) -> impl Future<Output = CdcResult<()>> + Send;
}
