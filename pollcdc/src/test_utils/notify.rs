use std::fmt;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::store::watermark::{WatermarkStore, advance_watermark};
use crate::types::{ChangeValue, Watermark};

type WatermarkCondition = Box<dyn Fn(&Watermark) -> bool + Send + Sync>;

struct Inner {
    watermark: Watermark,
    commits: Vec<Watermark>,
    failing_commits: u64,
    conditions: Vec<(WatermarkCondition, Arc<Notify>)>,
}

impl Inner {
    fn check_conditions(&mut self) {
        let watermark = self.watermark;
        self.conditions.retain(|(condition, notify)| {
            let should_retain = !condition(&watermark);
            if !should_retain {
                notify.notify_one();
            }
            should_retain
        });
    }
}

/// A watermark store which notifies about committed watermarks.
///
/// Commits can also be made to fail, to simulate a store which is unreachable at the end of a
/// cycle.
#[derive(Clone)]
pub struct NotifyingWatermarkStore {
    inner: Arc<RwLock<Inner>>,
}

impl NotifyingWatermarkStore {
    pub fn new() -> Self {
        Self::with_watermark(Watermark::default())
    }

    pub fn with_watermark(watermark: Watermark) -> Self {
        let inner = Inner {
            watermark,
            commits: Vec::new(),
            failing_commits: 0,
            conditions: Vec::new(),
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    pub async fn commits(&self) -> Vec<Watermark> {
        let inner = self.inner.read().await;
        inner.commits.clone()
    }

    /// Makes the next `count` commits fail.
    pub async fn fail_next_commits(&self, count: u64) {
        let mut inner = self.inner.write().await;
        inner.failing_commits = count;
    }

    pub async fn notify_on_watermark<F>(&self, condition: F) -> Arc<Notify>
    where
        F: Fn(&Watermark) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.write().await;
        inner.conditions.push((Box::new(condition), notify.clone()));

        // The condition might already hold.
        inner.check_conditions();

        notify
    }

    /// Notifies once the watermark reaches at least `value`.
    pub async fn notify_on_watermark_at_least(&self, value: ChangeValue) -> Arc<Notify> {
        self.notify_on_watermark(move |watermark| {
            watermark
                .last_change_value
                .is_some_and(|current| current >= value)
        })
        .await
    }
}

impl Default for NotifyingWatermarkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WatermarkStore for NotifyingWatermarkStore {
    async fn load(&self) -> CdcResult<Watermark> {
        let inner = self.inner.read().await;
        Ok(inner.watermark)
    }

    async fn get(&self) -> CdcResult<Watermark> {
        let inner = self.inner.read().await;
        Ok(inner.watermark)
    }

    async fn commit(&self, value: ChangeValue, mark_first_poll_done: bool) -> CdcResult<Watermark> {
        let mut inner = self.inner.write().await;

        if inner.failing_commits > 0 {
            inner.failing_commits -= 1;
            bail!(
                ErrorKind::StateStoreFailed,
                "Injected watermark commit failure"
            );
        }

        let watermark = advance_watermark(inner.watermark, value, mark_first_poll_done)?;
        inner.watermark = watermark;
        inner.commits.push(watermark);
        inner.check_conditions();

        Ok(watermark)
    }
}

impl fmt::Debug for NotifyingWatermarkStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyingWatermarkStore").finish()
    }
}
