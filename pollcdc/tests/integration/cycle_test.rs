use std::time::Duration;

use pollcdc::concurrency::shutdown::create_shutdown_channel;
use pollcdc::error::ErrorKind;
use pollcdc::store::watermark::WatermarkStore;
use pollcdc::test_utils::fault::SourceFault;
use pollcdc::test_utils::pipeline::{PollingTestContext, TEST_CLOCK_START_MS, test_pipeline_config};
use pollcdc::types::{ChangeValue, CycleOutcome, FetchMode, PrimaryKey, Watermark};
use pollcdc_config::shared::BootstrapMode;
use pollcdc_telemetry::init_test_tracing;

fn steady_state(watermark: i64) -> Watermark {
    Watermark::new(Some(ChangeValue::from_millis(watermark)), true)
}

fn cv(millis: i64) -> ChangeValue {
    ChangeValue::from_millis(millis)
}

#[tokio::test]
async fn empty_source_with_watermark_only_bootstraps_to_now() {
    init_test_tracing();

    let context = PollingTestContext::new();
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::WatermarkOnly));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let report = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap();

    let t0 = cv(TEST_CLOCK_START_MS);
    assert_eq!(report.cycle.mode, FetchMode::WatermarkOnly);
    assert_eq!(report.cycle.rows_emitted, 0);
    assert_eq!(report.outcome, CycleOutcome::Committed { watermark: t0 });
    assert_eq!(context.store.get().await.unwrap(), Watermark::new(Some(t0), true));

    // Nothing changed in the meantime.
    context.clock.advance(Duration::from_secs(10));
    let report = orchestrator.run_cycle(1, &mut shutdown_rx).await.unwrap();

    assert_eq!(report.cycle.mode, FetchMode::Incremental);
    assert_eq!(report.cycle.rows_emitted, 0);
    assert_eq!(report.outcome, CycleOutcome::Unchanged);
    assert_eq!(context.store.get().await.unwrap(), Watermark::new(Some(t0), true));
    assert!(context.sink.rows().await.is_empty());
    assert_eq!(context.store.commits().await.len(), 1);
}

#[tokio::test]
async fn changed_row_is_emitted_with_its_change_value_as_token() {
    init_test_tracing();

    let context = PollingTestContext::with_watermark(steady_state(50));
    context.upsert_product(5, Some(100)).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let report = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap();

    assert_eq!(report.cycle.rows_emitted, 1);
    assert_eq!(report.cycle.max_change_value_seen, Some(cv(100)));
    assert_eq!(report.outcome, CycleOutcome::Committed { watermark: cv(100) });

    let rows = context.sink.rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, PrimaryKey::Int(5));
    assert_eq!(rows[0].sequence_token, cv(100));
    assert_eq!(context.store.get().await.unwrap(), steady_state(100));
}

#[tokio::test]
async fn full_sync_emits_every_row_and_commits_the_max() {
    init_test_tracing();

    let context = PollingTestContext::new();
    context.upsert_product(1, Some(10)).await;
    context.upsert_product(2, Some(20)).await;
    context.upsert_product(3, Some(10)).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let report = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap();

    assert_eq!(report.cycle.mode, FetchMode::FullSync);
    assert_eq!(report.cycle.rows_emitted, 3);
    assert_eq!(report.outcome, CycleOutcome::Committed { watermark: cv(20) });
    assert_eq!(context.store.get().await.unwrap(), steady_state(20));

    // Rows arrive ordered by change value, then key.
    assert_eq!(
        context.sink.keys().await,
        vec![PrimaryKey::Int(1), PrimaryKey::Int(3), PrimaryKey::Int(2)]
    );
    assert_eq!(context.table.table().await.len(), 3);
}

#[tokio::test]
async fn incremental_cycle_skips_rows_at_the_watermark() {
    init_test_tracing();

    let context = PollingTestContext::with_watermark(steady_state(20));
    context.upsert_product(2, Some(25)).await;
    context.upsert_product(4, Some(20)).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let report = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap();

    assert_eq!(report.cycle.rows_emitted, 1);
    assert_eq!(context.sink.keys().await, vec![PrimaryKey::Int(2)]);
    assert_eq!(context.store.get().await.unwrap(), steady_state(25));
}

#[tokio::test]
async fn sink_failure_keeps_the_watermark_and_the_next_cycle_redelivers() {
    init_test_tracing();

    let context = PollingTestContext::with_watermark(steady_state(0));
    for id in 1..=5 {
        context.upsert_product(id, Some(id * 10)).await;
    }
    context.faulty_sink.fail_after_rows(2).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let err = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationError);
    assert_eq!(context.store.get().await.unwrap(), steady_state(0));
    assert!(context.store.commits().await.is_empty());
    // The rows accepted before the failure stay written.
    assert_eq!(context.table.table().await.len(), 2);

    let report = orchestrator.run_cycle(1, &mut shutdown_rx).await.unwrap();

    assert_eq!(report.cycle.rows_emitted, 5);
    assert_eq!(report.outcome, CycleOutcome::Committed { watermark: cv(50) });
    assert_eq!(context.faulty_sink.failures().await, 1);

    // Redelivered rows land on the same keys with the same tokens.
    let table = context.table.table().await;
    assert_eq!(table.len(), 5);
    for id in 1..=5 {
        assert_eq!(table[&PrimaryKey::Int(id)].sequence_token, cv(id * 10));
    }
    assert_eq!(context.table.delivered().await.len(), 7);
}

#[tokio::test]
async fn source_failure_mid_fetch_keeps_the_watermark() {
    init_test_tracing();

    let context = PollingTestContext::with_watermark(steady_state(0));
    for id in 1..=4 {
        context.upsert_product(id, Some(id)).await;
    }
    context.source.inject(SourceFault::FailAfterRows(2)).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let err = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);
    assert_eq!(context.store.get().await.unwrap(), steady_state(0));

    let report = orchestrator.run_cycle(1, &mut shutdown_rx).await.unwrap();

    assert_eq!(report.cycle.rows_emitted, 4);
    assert_eq!(context.store.get().await.unwrap(), steady_state(4));
    assert_eq!(context.table.table().await.len(), 4);
}

#[tokio::test]
async fn connection_failure_aborts_the_cycle() {
    init_test_tracing();

    let context = PollingTestContext::new();
    context.upsert_product(1, Some(10)).await;
    context.source.inject(SourceFault::FailConnect).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let err = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceConnectionFailed);
    assert_eq!(context.store.get().await.unwrap(), Watermark::default());
    assert!(context.sink.rows().await.is_empty());

    // The partition is still uninitialized, so the retry bootstraps.
    let report = orchestrator.run_cycle(1, &mut shutdown_rx).await.unwrap();
    assert_eq!(report.cycle.mode, FetchMode::FullSync);
    assert_eq!(context.store.get().await.unwrap(), steady_state(10));
}

#[tokio::test]
async fn sessions_are_closed_after_every_cycle() {
    init_test_tracing();

    let context = PollingTestContext::with_watermark(steady_state(0));
    context.upsert_product(1, Some(10)).await;
    context.source.inject(SourceFault::FailAfterRows(0)).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    assert!(orchestrator.run_cycle(0, &mut shutdown_rx).await.is_err());
    assert!(orchestrator.run_cycle(1, &mut shutdown_rx).await.is_ok());
    assert!(orchestrator.run_cycle(2, &mut shutdown_rx).await.is_ok());

    assert_eq!(context.source.inner().sessions().await, (3, 3));
}

#[tokio::test]
async fn commit_failure_leads_to_redelivery() {
    init_test_tracing();

    let context = PollingTestContext::with_watermark(steady_state(0));
    context.upsert_product(1, Some(10)).await;
    context.upsert_product(2, Some(20)).await;
    context.store.fail_next_commits(1).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let err = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateStoreFailed);
    assert_eq!(context.store.get().await.unwrap(), steady_state(0));

    let report = orchestrator.run_cycle(1, &mut shutdown_rx).await.unwrap();

    assert_eq!(report.cycle.rows_emitted, 2);
    assert_eq!(context.store.get().await.unwrap(), steady_state(20));
    // At least once: both rows were delivered twice, the table holds them once.
    assert_eq!(context.sink.rows().await.len(), 4);
    assert_eq!(context.table.table().await.len(), 2);
}

#[tokio::test]
async fn full_sync_falls_back_to_now_for_rows_without_change_value() {
    init_test_tracing();

    let context = PollingTestContext::new();
    context.upsert_product(1, None).await;
    context.upsert_product(2, None).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let report = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap();

    let now = context.clock.change_value();
    assert_eq!(report.cycle.rows_emitted, 2);
    assert_eq!(report.cycle.max_change_value_seen, None);
    assert_eq!(report.outcome, CycleOutcome::Committed { watermark: now });
    assert!(
        context
            .sink
            .rows()
            .await
            .iter()
            .all(|row| row.sequence_token == now)
    );
}

#[tokio::test]
async fn full_sync_with_some_null_change_values_commits_the_max() {
    init_test_tracing();

    let context = PollingTestContext::new();
    context.upsert_product(1, None).await;
    context.upsert_product(2, Some(30)).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap();

    assert_eq!(context.store.get().await.unwrap(), steady_state(30));
    let table = context.table.table().await;
    assert_eq!(table[&PrimaryKey::Int(1)].sequence_token, context.clock.change_value());
    assert_eq!(table[&PrimaryKey::Int(2)].sequence_token, cv(30));
}

#[tokio::test]
async fn watermark_only_skips_existing_rows() {
    init_test_tracing();

    let context = PollingTestContext::new();
    context.upsert_product(1, Some(10)).await;
    context.upsert_product(2, Some(40)).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::WatermarkOnly));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let report = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap();

    assert_eq!(report.cycle.rows_emitted, 0);
    assert_eq!(report.outcome, CycleOutcome::Committed { watermark: cv(40) });
    assert!(context.sink.rows().await.is_empty());

    // Only the rows changed after the bootstrap are emitted.
    context.upsert_product(1, Some(41)).await;
    let report = orchestrator.run_cycle(1, &mut shutdown_rx).await.unwrap();

    assert_eq!(report.cycle.rows_emitted, 1);
    assert_eq!(context.sink.keys().await, vec![PrimaryKey::Int(1)]);
    assert_eq!(context.store.get().await.unwrap(), steady_state(41));
}

#[tokio::test]
async fn watermark_never_decreases_across_cycles() {
    init_test_tracing();

    let context = PollingTestContext::new();
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let updates = [(1, 5), (2, 3), (1, 9), (3, 9), (2, 12), (4, 11)];
    for (tick_id, (id, change_value)) in updates.into_iter().enumerate() {
        context.upsert_product(id, Some(change_value)).await;
        // Rows which do not move past the watermark are simply not selected.
        orchestrator
            .run_cycle(tick_id as u64, &mut shutdown_rx)
            .await
            .unwrap();
    }

    let commits = context.store.commits().await;
    assert!(!commits.is_empty());
    assert!(
        commits
            .windows(2)
            .all(|pair| pair[0].last_change_value <= pair[1].last_change_value)
    );
    assert_eq!(context.store.get().await.unwrap(), steady_state(12));
}

#[tokio::test]
async fn corrupted_watermark_is_rejected() {
    init_test_tracing();

    let context = PollingTestContext::with_watermark(Watermark::new(None, true));
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let err = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(context.source.inner().sessions().await, (0, 0));
}

#[tokio::test(start_paused = true)]
async fn stalled_fetch_times_out() {
    init_test_tracing();

    let context = PollingTestContext::with_watermark(steady_state(0));
    context.upsert_product(1, Some(1)).await;
    context.upsert_product(2, Some(2)).await;
    context.source.inject(SourceFault::StallAfterRows(1)).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let err = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceTimeout);
    assert_eq!(context.store.get().await.unwrap(), steady_state(0));
    assert_eq!(context.source.inner().sessions().await, (1, 1));
}

#[tokio::test(start_paused = true)]
async fn slow_sink_writes_do_not_time_out_the_fetch() {
    init_test_tracing();

    let context = PollingTestContext::with_watermark(steady_state(0));
    for id in 1..=4 {
        context.upsert_product(id, Some(id)).await;
    }
    context
        .source
        .inject(SourceFault::SlowRows(Duration::from_millis(10)))
        .await;
    context.faulty_sink.delay_writes(Duration::from_secs(2)).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let report = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap();

    assert_eq!(report.cycle.rows_emitted, 4);
    assert_eq!(report.outcome, CycleOutcome::Committed { watermark: cv(4) });
    assert_eq!(context.store.get().await.unwrap(), steady_state(4));
    assert_eq!(context.sink.write_calls().await, (2, 0));
}

#[tokio::test(start_paused = true)]
async fn stalled_connect_times_out() {
    init_test_tracing();

    let context = PollingTestContext::new();
    context.source.inject(SourceFault::StallConnect).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::WatermarkOnly));
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let err = orchestrator.run_cycle(0, &mut shutdown_rx).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceTimeout);
    assert_eq!(context.store.get().await.unwrap(), Watermark::default());
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_an_in_flight_fetch() {
    init_test_tracing();

    let context = PollingTestContext::with_watermark(steady_state(0));
    context.upsert_product(1, Some(1)).await;
    context.source.inject(SourceFault::StallAfterRows(0)).await;
    let orchestrator = context.orchestrator(test_pipeline_config(BootstrapMode::FullSync));
    let (shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let (result, _) = tokio::join!(orchestrator.run_cycle(0, &mut shutdown_rx), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.shutdown().unwrap();
    });

    let report = result.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Cancelled);
    assert!(context.store.commits().await.is_empty());
    assert_eq!(context.source.inner().sessions().await, (1, 1));
}
