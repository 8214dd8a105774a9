use std::sync::Arc;
use std::time::Duration;

use config::shared::{ImportMechanism, ProgressStrategy};
use importer::concurrency::shutdown::create_shutdown_channel;
use importer::cycle::ImportCycle;
use importer::guard::RunGuard;
use importer::scheduler::{DueTick, ImportScheduler};
use importer::sink::memory::MemorySink;
use importer::store::memory::MemoryCheckpointStore;
use importer::test_utils::fixtures::{TEST_IDENTIFIER_COLUMN, event_rows, test_import_config};
use importer::test_utils::source::MemorySource;
use importer::types::ImportPayload;
use telemetry::tracing::init_test_tracing;

type TestScheduler = ImportScheduler<MemorySource, MemoryCheckpointStore, MemorySink>;

fn build_scheduler(
    mechanism: ImportMechanism,
    idle_delay_ms: u64,
) -> (TestScheduler, MemorySource, MemoryCheckpointStore, MemorySink) {
    let mut config = test_import_config(ProgressStrategy::AntiJoin, mechanism);
    config.schedule.idle_delay_ms = idle_delay_ms;

    let source = MemorySource::new(TEST_IDENTIFIER_COLUMN);
    let store = MemoryCheckpointStore::new();
    let sink = MemorySink::new();
    let cycle = ImportCycle::new(
        Arc::new(config),
        source.clone(),
        store.clone(),
        sink.clone(),
    );

    (
        ImportScheduler::new(cycle, store.clone()),
        source,
        store,
        sink,
    )
}

#[tokio::test(start_paused = true)]
async fn historical_import_runs_to_completion() {
    init_test_tracing();
    let (scheduler, source, store, sink) = build_scheduler(ImportMechanism::HistoricalOnly, 60_000);
    source.insert_rows(event_rows(1, 25)).await;
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    scheduler.run(shutdown_rx).await.unwrap();

    assert_eq!(source.exported_ids().await.len(), 25);
    assert_eq!(sink.events().await.len(), 25);
    assert!(sink.is_shut_down().await);
    assert!(!RunGuard::new(store, None).is_held().await.unwrap());
    assert!(
        source
            .import_log()
            .await
            .contains(&"historical import complete".to_owned())
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_before_start_runs_no_tick() {
    init_test_tracing();
    let (scheduler, source, _store, sink) = build_scheduler(ImportMechanism::Continuous, 60_000);
    source.insert_rows(event_rows(1, 5)).await;
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    shutdown_tx.send(()).unwrap();
    scheduler.run(shutdown_rx).await.unwrap();

    assert!(source.executed().await.is_empty());
    assert!(sink.is_shut_down().await);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_the_idle_wait() {
    init_test_tracing();
    let (scheduler, source, store, sink) = build_scheduler(ImportMechanism::Continuous, 60_000);
    source.insert_rows(event_rows(1, 25)).await;
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_secs(30)).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(source.exported_ids().await.len(), 25);
    assert!(sink.is_shut_down().await);
    assert!(!RunGuard::new(store, None).is_held().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn due_tick_runs_the_chain_and_persists_the_next_run() {
    init_test_tracing();
    let (scheduler, source, _store, sink) = build_scheduler(ImportMechanism::Continuous, 60_000);
    source.insert_rows(event_rows(1, 25)).await;
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let DueTick::Ran { ticks, next } = scheduler.run_due_tick(shutdown_rx.clone()).await.unwrap()
    else {
        panic!("expected the due tick to run");
    };
    assert_eq!(ticks, 3);
    assert_eq!(next.payload, ImportPayload::fresh());
    assert!(!next.finished);
    assert_eq!(source.exported_ids().await.len(), 25);
    assert!(sink.is_shut_down().await);

    let second = scheduler.run_due_tick(shutdown_rx).await.unwrap();
    assert_eq!(
        second,
        DueTick::NotDue {
            not_before: next.not_before
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn due_tick_reports_a_finished_historical_import() {
    init_test_tracing();
    let (scheduler, source, _store, _sink) = build_scheduler(ImportMechanism::HistoricalOnly, 0);
    source.insert_rows(event_rows(1, 5)).await;
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let first = scheduler.run_due_tick(shutdown_rx.clone()).await.unwrap();
    assert!(matches!(first, DueTick::Ran { ticks: 1, .. }));

    let second = scheduler.run_due_tick(shutdown_rx.clone()).await.unwrap();
    assert_eq!(second, DueTick::Finished);

    let third = scheduler.run_due_tick(shutdown_rx).await.unwrap();
    assert_eq!(third, DueTick::Finished);
    assert_eq!(source.exported_ids().await.len(), 5);
}
