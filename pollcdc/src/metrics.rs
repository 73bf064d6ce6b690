use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

pub const POLLCDC_CYCLES_TOTAL: &str = "pollcdc_cycles_total";
pub const POLLCDC_ROWS_EMITTED_TOTAL: &str = "pollcdc_rows_emitted_total";
pub const POLLCDC_TICKS_COALESCED_TOTAL: &str = "pollcdc_ticks_coalesced_total";
pub const POLLCDC_WATERMARK_MS: &str = "pollcdc_watermark_ms";
pub const POLLCDC_CYCLE_DURATION_SECONDS: &str = "pollcdc_cycle_duration_seconds";
pub const POLLCDC_SINK_BATCH_SIZE: &str = "pollcdc_sink_batch_size";
pub const POLLCDC_SINK_BATCH_DURATION_SECONDS: &str = "pollcdc_sink_batch_duration_seconds";
pub const PIPELINE_ID: &str = "pipeline_id";
pub const OUTCOME: &str = "outcome";
pub const MODE: &str = "mode";
/// Outcome label value of the cycles which ended with an error.
pub const FAILED: &str = "failed";

/// Registers the metrics emitted by pollcdc. Safe to call many times, the descriptions are only
/// registered once.
pub(crate) fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            POLLCDC_CYCLES_TOTAL,
            Unit::Count,
            "Total number of poll cycles, labeled by outcome"
        );

        describe_counter!(
            POLLCDC_ROWS_EMITTED_TOTAL,
            Unit::Count,
            "Total number of changed rows written to the sink, labeled by fetch mode"
        );

        describe_counter!(
            POLLCDC_TICKS_COALESCED_TOTAL,
            Unit::Count,
            "Total number of ticks dropped because the previous tick was still pending"
        );

        describe_gauge!(
            POLLCDC_WATERMARK_MS,
            Unit::Milliseconds,
            "Last committed watermark as milliseconds since the Unix epoch"
        );

        describe_histogram!(
            POLLCDC_CYCLE_DURATION_SECONDS,
            Unit::Seconds,
            "Time taken in seconds by a poll cycle"
        );

        describe_gauge!(
            POLLCDC_SINK_BATCH_SIZE,
            Unit::Count,
            "Number of rows in the last batch written to the sink"
        );

        describe_histogram!(
            POLLCDC_SINK_BATCH_DURATION_SECONDS,
            Unit::Seconds,
            "Time taken in seconds to write a batch to the sink"
        );
    });
}
