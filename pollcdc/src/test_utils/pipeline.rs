use pollcdc_config::shared::{BatchConfig, BootstrapMode, PipelineConfig};
use std::sync::Arc;

use crate::pipeline::Pipeline;
use crate::polling::Orchestrator;
use crate::sink::MemorySink;
use crate::source::MemorySource;
use crate::test_utils::clock::ManualClock;
use crate::test_utils::fault::{FaultInjectingSink, FaultInjectingSource};
use crate::test_utils::notify::NotifyingWatermarkStore;
use crate::test_utils::table::{product_row, products_schema};
use crate::test_utils::test_sink_wrapper::TestSinkWrapper;
use crate::types::Watermark;

pub const TEST_PIPELINE_ID: u64 = 1;

/// Poll interval of the test pipelines.
pub const TEST_POLL_INTERVAL_SECS: u64 = 10;

pub const TEST_FETCH_TIMEOUT_MS: u64 = 1_000;

/// Time of the [`ManualClock`] of a fresh [`PollingTestContext`].
pub const TEST_CLOCK_START_MS: i64 = 1_700_000_000_000;

pub type TestSink = TestSinkWrapper<FaultInjectingSink<MemorySink>>;

pub type TestOrchestrator = Orchestrator<FaultInjectingSource, TestSink, NotifyingWatermarkStore>;

pub type TestPipeline = Pipeline<FaultInjectingSource, TestSink, NotifyingWatermarkStore>;

/// A pipeline config with small batches, so that multi-row fetches span several sink writes.
pub fn test_pipeline_config(bootstrap_mode: BootstrapMode) -> PipelineConfig {
    PipelineConfig {
        id: TEST_PIPELINE_ID,
        poll_interval_secs: TEST_POLL_INTERVAL_SECS,
        bootstrap_mode,
        fetch_timeout_ms: TEST_FETCH_TIMEOUT_MS,
        batch: BatchConfig {
            max_size: 2,
            max_fill_ms: 100,
        },
    }
}

/// The components of a polling pipeline over the products table, all observable from a test.
///
/// Every handle shares its state with the copies given to orchestrators and pipelines.
#[derive(Debug, Clone)]
pub struct PollingTestContext {
    pub source: FaultInjectingSource,
    /// The sink handed to the pipeline.
    pub sink: TestSink,
    /// Fault control of [`Self::sink`].
    pub faulty_sink: FaultInjectingSink<MemorySink>,
    /// Destination table behind [`Self::sink`].
    pub table: MemorySink,
    pub store: NotifyingWatermarkStore,
    pub clock: ManualClock,
}

impl PollingTestContext {
    pub fn new() -> Self {
        Self::with_watermark(Watermark::default())
    }

    /// Creates a context whose store already holds `watermark`.
    pub fn with_watermark(watermark: Watermark) -> Self {
        let table = MemorySink::default();
        let faulty_sink = FaultInjectingSink::wrap(table.clone());

        Self {
            source: FaultInjectingSource::wrap(MemorySource::new(products_schema())),
            sink: TestSinkWrapper::wrap(faulty_sink.clone()),
            faulty_sink,
            table,
            store: NotifyingWatermarkStore::with_watermark(watermark),
            clock: ManualClock::from_millis(TEST_CLOCK_START_MS),
        }
    }

    /// Inserts or replaces the product `id` in the source table.
    pub async fn upsert_product(&self, id: i64, cv: Option<i64>) {
        self.source
            .inner()
            .upsert_row(product_row(id, cv))
            .await
            .expect("the product row matches the products schema");
    }

    pub fn orchestrator(&self, config: PipelineConfig) -> TestOrchestrator {
        Orchestrator::new(
            Arc::new(config),
            self.source.clone(),
            self.sink.clone(),
            self.store.clone(),
            Arc::new(self.clock.clone()),
        )
    }

    pub fn pipeline(&self, config: PipelineConfig) -> TestPipeline {
        Pipeline::new(
            config,
            self.source.clone(),
            self.sink.clone(),
            self.store.clone(),
        )
        .with_clock(Arc::new(self.clock.clone()))
    }
}

impl Default for PollingTestContext {
    fn default() -> Self {
        Self::new()
    }
}
