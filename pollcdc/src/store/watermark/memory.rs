use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::CdcResult;
use crate::store::watermark::{WatermarkStore, advance_watermark};
use crate::types::{ChangeValue, Watermark};

#[derive(Debug)]
struct Inner {
    watermark: Watermark,
    commits: Vec<Watermark>,
}

/// Watermark store keeping the state in process memory.
///
/// Clones share the same state. The state is lost when the process exits, so a restarted
/// pipeline always bootstraps again.
#[derive(Debug, Clone)]
pub struct MemoryWatermarkStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::with_watermark(Watermark::default())
    }

    /// Creates a store already holding `watermark`, as if it had been persisted by a previous run.
    pub fn with_watermark(watermark: Watermark) -> Self {
        let inner = Inner {
            watermark,
            commits: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns every watermark committed through this store, oldest first.
    pub async fn commits(&self) -> Vec<Watermark> {
        let inner = self.inner.lock().await;
        inner.commits.clone()
    }
}

impl Default for MemoryWatermarkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    async fn load(&self) -> CdcResult<Watermark> {
        let inner = self.inner.lock().await;

        Ok(inner.watermark)
    }

    async fn get(&self) -> CdcResult<Watermark> {
        let inner = self.inner.lock().await;

        Ok(inner.watermark)
    }

    async fn commit(&self, value: ChangeValue, mark_first_poll_done: bool) -> CdcResult<Watermark> {
        let mut inner = self.inner.lock().await;

        let watermark = advance_watermark(inner.watermark, value, mark_first_poll_done)?;
        inner.watermark = watermark;
        inner.commits.push(watermark);

        Ok(watermark)
    }
}
