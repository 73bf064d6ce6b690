use futures::stream::BoxStream;
use std::future::Future;

use crate::error::CdcResult;
use crate::types::{ChangeRecord, ChangeValue};

/// Lazy, finite and forward-only sequence of the records read by one fetch.
///
/// A failure while reading surfaces as an `Err` item, after which the stream should not be polled
/// again.
pub type ChangeStream<'a> = BoxStream<'a, CdcResult<ChangeRecord>>;

/// A table which can be polled for changes.
///
/// Each poll cycle opens its own [`ChangeSession`] through [`ChangeSource::connect`] and closes it
/// before the cycle ends.
pub trait ChangeSource {
    type Session: ChangeSession + Send;

    fn connect(&self) -> impl Future<Output = CdcResult<Self::Session>> + Send;
}

/// A connection to the polled table, used by a single poll cycle.
///
/// Every fetch returns records ordered ascending by their change value.
pub trait ChangeSession {
    /// Reads every row of the table.
    fn fetch_all(&mut self) -> ChangeStream<'_>;

    /// Reads the rows whose change value is strictly greater than `watermark`.
    fn fetch_since(&mut self, watermark: ChangeValue) -> ChangeStream<'_>;

    /// Returns the highest change value in the table, `None` when no row has one.
    fn fetch_max(&mut self) -> impl Future<Output = CdcResult<Option<ChangeValue>>> + Send;

    /// Releases the session.
    fn close(self) -> impl Future<Output = CdcResult<()>> + Send;
}
