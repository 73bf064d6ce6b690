use std::time::Duration;

use pollcdc::error::ErrorKind;
use pollcdc::store::watermark::WatermarkStore;
use pollcdc::test_utils::fault::SourceFault;
use pollcdc::test_utils::pipeline::{PollingTestContext, test_pipeline_config};
use pollcdc::types::{ChangeValue, CycleOutcome, PrimaryKey, Watermark};
use pollcdc_config::shared::BootstrapMode;
use pollcdc_telemetry::init_test_tracing;

fn cv(millis: i64) -> ChangeValue {
    ChangeValue::from_millis(millis)
}

#[tokio::test(start_paused = true)]
async fn pipeline_bootstraps_then_polls_incrementally() {
    init_test_tracing();

    let context = PollingTestContext::new();
    context.upsert_product(1, Some(10)).await;
    context.upsert_product(2, Some(20)).await;

    let bootstrapped = context.store.notify_on_watermark_at_least(cv(20)).await;

    let mut pipeline = context.pipeline(test_pipeline_config(BootstrapMode::FullSync));
    pipeline.start().await.unwrap();

    bootstrapped.notified().await;
    assert_eq!(context.table.table().await.len(), 2);

    let caught_up = context.store.notify_on_watermark_at_least(cv(30)).await;
    context.upsert_product(1, Some(25)).await;
    context.upsert_product(3, Some(30)).await;

    caught_up.notified().await;

    let mut status = pipeline.status().unwrap();
    pipeline.shutdown_and_wait().await.unwrap();

    let table = context.table.table().await;
    assert_eq!(table.len(), 3);
    assert_eq!(table[&PrimaryKey::Int(1)].sequence_token, cv(25));
    assert_eq!(table[&PrimaryKey::Int(3)].sequence_token, cv(30));

    let status = status.wait_for(|status| status.cycles() >= 2).await.unwrap();
    assert_eq!(status.cycles_failed, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_cycles_do_not_stop_the_pipeline() {
    init_test_tracing();

    let context = PollingTestContext::new();
    context.upsert_product(1, Some(10)).await;
    context.source.inject(SourceFault::FailConnect).await;
    context.source.inject(SourceFault::FailAfterRows(0)).await;

    let bootstrapped = context.store.notify_on_watermark_at_least(cv(10)).await;

    let mut pipeline = context.pipeline(test_pipeline_config(BootstrapMode::FullSync));
    pipeline.start().await.unwrap();

    bootstrapped.notified().await;

    let mut status = pipeline.status().unwrap();
    let current = status
        .wait_for(|status| status.cycles_succeeded >= 1)
        .await
        .unwrap();
    assert_eq!(current.cycles_failed, 2);
    assert_eq!(
        current.last_error.map(|err| err.kind()),
        Some(ErrorKind::SourceQueryFailed)
    );

    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(context.table.table().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_a_stalled_cycle_without_committing() {
    init_test_tracing();

    let context = PollingTestContext::new();
    context.upsert_product(1, Some(10)).await;
    context.source.inject(SourceFault::StallAfterRows(0)).await;

    let mut pipeline = context.pipeline(test_pipeline_config(BootstrapMode::FullSync));
    pipeline.start().await.unwrap();
    let mut status = pipeline.status().unwrap();

    // Less than the fetch timeout, the first cycle is still waiting on the source.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(context.source.inner().sessions().await, (1, 0));

    pipeline.shutdown_and_wait().await.unwrap();

    let status = status
        .wait_for(|status| status.cycles_cancelled == 1)
        .await
        .unwrap();
    assert_eq!(
        status.last_report.map(|report| report.outcome),
        Some(CycleOutcome::Cancelled)
    );
    assert!(context.store.commits().await.is_empty());
    assert_eq!(context.source.inner().sessions().await, (1, 1));
}

#[tokio::test(start_paused = true)]
async fn restarted_pipeline_resumes_from_the_stored_watermark() {
    init_test_tracing();

    let context = PollingTestContext::new();
    context.upsert_product(1, Some(10)).await;

    let bootstrapped = context.store.notify_on_watermark_at_least(cv(10)).await;
    let mut pipeline = context.pipeline(test_pipeline_config(BootstrapMode::FullSync));
    pipeline.start().await.unwrap();
    bootstrapped.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    // Same source and store, fresh sink.
    let restarted = PollingTestContext {
        source: context.source.clone(),
        store: context.store.clone(),
        ..PollingTestContext::new()
    };
    restarted.upsert_product(2, Some(20)).await;

    let caught_up = restarted.store.notify_on_watermark_at_least(cv(20)).await;
    let mut pipeline = restarted.pipeline(test_pipeline_config(BootstrapMode::FullSync));
    pipeline.start().await.unwrap();
    caught_up.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(restarted.sink.keys().await, vec![PrimaryKey::Int(2)]);
}

#[tokio::test]
async fn unreachable_sink_prevents_startup() {
    init_test_tracing();

    let context = PollingTestContext::new();
    context.faulty_sink.fail_prepare().await;

    let mut pipeline = context.pipeline(test_pipeline_config(BootstrapMode::FullSync));
    let err = pipeline.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationConnectionFailed);
    assert!(pipeline.status().is_none());
    pipeline.wait().await.unwrap();
}

#[tokio::test]
async fn invalid_config_prevents_startup() {
    init_test_tracing();

    let context = PollingTestContext::new();
    let mut config = test_pipeline_config(BootstrapMode::WatermarkOnly);
    config.poll_interval_secs = 0;

    let mut pipeline = context.pipeline(config);
    let err = pipeline.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

#[tokio::test]
async fn corrupted_watermark_prevents_startup() {
    init_test_tracing();

    let context = PollingTestContext::with_watermark(Watermark::new(None, true));

    let mut pipeline = context.pipeline(test_pipeline_config(BootstrapMode::FullSync));
    let err = pipeline.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(context.store.load().await.unwrap(), Watermark::new(None, true));
}
