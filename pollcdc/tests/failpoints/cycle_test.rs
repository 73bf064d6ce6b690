use fail::FailScenario;
use pollcdc::concurrency::shutdown::create_shutdown_channel;
use pollcdc::error::ErrorKind;
use pollcdc::failpoints::{POLL_CYCLE_BEFORE_COMMIT, POLL_CYCLE_BEFORE_SINK_WRITE};
use pollcdc::store::watermark::WatermarkStore;
use pollcdc::test_utils::pipeline::{PollingTestContext, test_pipeline_config};
use pollcdc::types::{ChangeValue, CycleOutcome, Watermark};
use pollcdc_config::shared::BootstrapMode;
use pollcdc_telemetry::init_test_tracing;

fn steady_state(watermark: i64) -> Watermark {
    Watermark::new(Some(ChangeValue::from_millis(watermark)), true)
}

#[tokio::test]
async fn failure_before_commit_redelivers_on_the_next_cycle() {
    let scenario = FailScenario::setup();
    fail::cfg(POLL_CYCLE_BEFORE_COMMIT, "1*return").unwrap();

    init_test_tracing();

    let context = PollingTestContext::with_watermark(steady_state(0));
    context.upsert_product(1, Some(10)).await;
    context.upsert_product(2, Some(20)).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let err = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FailpointTriggered);
    assert_eq!(context.table.table().await.len(), 2);
    assert_eq!(context.store.get().await.unwrap(), steady_state(0));

    let report = orchestrator.run_cycle(1, &mut shutdown_rx).await.unwrap();

    assert_eq!(
        report.outcome,
        CycleOutcome::Committed {
            watermark: ChangeValue::from_millis(20)
        }
    );
    assert_eq!(context.sink.rows().await.len(), 4);
    assert_eq!(context.table.table().await.len(), 2);

    scenario.teardown();
}

#[tokio::test]
async fn failure_before_sink_write_writes_nothing() {
    let scenario = FailScenario::setup();
    fail::cfg(POLL_CYCLE_BEFORE_SINK_WRITE, "return(sink)").unwrap();

    init_test_tracing();

    let context = PollingTestContext::new();
    context.upsert_product(1, Some(10)).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let err = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationError);
    assert!(context.sink.rows().await.is_empty());
    assert_eq!(context.store.get().await.unwrap(), Watermark::default());

    scenario.teardown();
}
