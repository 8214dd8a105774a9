use std::sync::Arc;
use std::time::Duration;

use config::shared::{ImportMechanism, ProgressStrategy};
use importer::cycle::{CyclePhase, ImportCycle, NextRun};
use importer::error::ErrorKind;
use importer::executor::StatementKind;
use importer::sink::memory::MemorySink;
use importer::store::{CURSOR_KEY, DROPPED_KEY};
use importer::store::memory::MemoryCheckpointStore;
use importer::test_utils::fixtures::{
    TEST_IDENTIFIER_COLUMN, event_rows, malformed_event_row, test_import_config,
};
use importer::test_utils::source::MemorySource;
use importer::test_utils::store::FaultyCheckpointStore;
use importer::types::ImportPayload;
use serde_json::json;
use telemetry::tracing::init_test_tracing;

fn build_cycle<C>(
    mechanism: ImportMechanism,
    store: C,
) -> (ImportCycle<MemorySource, C, MemorySink>, MemorySource)
where
    C: importer::store::CheckpointStore + Clone,
{
    let config = Arc::new(test_import_config(ProgressStrategy::Offset, mechanism));
    let source = MemorySource::new(TEST_IDENTIFIER_COLUMN);
    let cycle = ImportCycle::new(config, source.clone(), store, MemorySink::new());

    (cycle, source)
}

fn ids(first: i64, last: i64) -> Vec<String> {
    (first..=last).map(|id| id.to_string()).collect()
}

/// Returns the offset of an immediate continuation, which always carries the guard token.
fn continuation_offset(next_run: NextRun) -> (ImportPayload, Option<u64>) {
    let NextRun::Immediately(payload) = next_run else {
        panic!("expected an immediate continuation, got {next_run:?}");
    };
    assert!(payload.is_continuation());
    assert_eq!(payload.retries_performed_so_far, 0);

    (payload, payload.offset)
}

async fn stored_cursor(store: &MemoryCheckpointStore) -> Option<serde_json::Value> {
    store.checkpoints().await.get(CURSOR_KEY).cloned()
}

#[tokio::test(flavor = "multi_thread")]
async fn cursor_advances_by_fetched_rows_and_counts_only_on_fresh_ticks() {
    init_test_tracing();
    let store = MemoryCheckpointStore::new();
    let (cycle, source) = build_cycle(ImportMechanism::Continuous, store.clone());
    source.insert_rows(event_rows(1, 25)).await;

    let first = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(first.report.remaining_rows, Some(25));
    let (payload, offset) = continuation_offset(first.next_run);
    assert_eq!(offset, Some(10));
    assert_eq!(stored_cursor(&store).await, Some(json!(10)));

    let second = cycle.run(payload).await;
    assert_eq!(second.report.remaining_rows, None);
    let (payload, offset) = continuation_offset(second.next_run);
    assert_eq!(offset, Some(20));

    let third = cycle.run(payload).await;
    assert_eq!(third.report.fetched, 5);
    assert_eq!(third.phase, CyclePhase::Scheduled);
    assert_eq!(
        third.next_run,
        NextRun::After {
            delay: Duration::from_secs(60),
            payload: ImportPayload::fresh(),
        }
    );
    assert_eq!(stored_cursor(&store).await, Some(json!(25)));

    let fourth = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(fourth.phase, CyclePhase::Stopped);
    assert_eq!(fourth.report.remaining_rows, Some(0));

    let counts = source
        .executed()
        .await
        .into_iter()
        .filter(|kind| *kind == StatementKind::CountTotal)
        .count();
    assert_eq!(counts, 2);
    assert_eq!(source.exported_ids().await, ids(1, 25));
}

#[tokio::test(flavor = "multi_thread")]
async fn abandoned_range_moves_the_cursor_past_one_batch() {
    init_test_tracing();
    let store = MemoryCheckpointStore::new();
    let (cycle, source) = build_cycle(ImportMechanism::Continuous, store.clone());
    source.insert_rows(event_rows(1, 25)).await;
    source.fail_next(StatementKind::FetchPage, 16).await;

    let mut payload = ImportPayload::fresh();
    let outcome = loop {
        let outcome = cycle.run(payload).await;
        match outcome.next_run {
            NextRun::After { payload: next, .. } if outcome.phase == CyclePhase::Retrying => {
                assert_eq!(next.offset, Some(0));
                payload = next;
            }
            _ => break outcome,
        }
    };

    assert_eq!(outcome.phase, CyclePhase::Stopped);
    assert_eq!(
        outcome.next_run,
        NextRun::AwaitTrigger(ImportPayload::fresh())
    );
    assert_eq!(stored_cursor(&store).await, Some(json!(10)));

    let outcome = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(outcome.report.remaining_rows, Some(15));
    assert_eq!(source.exported_ids().await, ids(11, 20));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_cursor_write_retries_from_the_advanced_offset() {
    init_test_tracing();
    let store = FaultyCheckpointStore::new();
    let (cycle, source) = build_cycle(ImportMechanism::Continuous, store.clone());
    source.insert_rows(event_rows(1, 25)).await;
    store.fail_next_writes(CURSOR_KEY, 1).await;

    let outcome = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(outcome.phase, CyclePhase::Retrying);
    assert_eq!(outcome.report.committed, 10);
    let NextRun::After { delay, payload } = outcome.next_run else {
        panic!("expected a delayed retry, got {:?}", outcome.next_run);
    };
    assert_eq!(delay, Duration::from_secs(3));
    assert_eq!(payload.offset, Some(10));
    assert_eq!(payload.retries_performed_so_far, 1);
    assert!(payload.is_continuation());

    let outcome = cycle.run(payload).await;
    let (_, offset) = continuation_offset(outcome.next_run);
    assert_eq!(offset, Some(20));
    assert_eq!(source.exported_ids().await, ids(1, 20));
    assert_eq!(stored_cursor(store.inner()).await, Some(json!(20)));
}

#[tokio::test(flavor = "multi_thread")]
async fn historical_offset_import_ignores_rows_past_the_snapshot() {
    init_test_tracing();
    let store = MemoryCheckpointStore::new();
    let (cycle, source) = build_cycle(ImportMechanism::HistoricalOnly, store);
    source.insert_rows(event_rows(1, 15)).await;

    let first = cycle.run(ImportPayload::fresh()).await;
    let (payload, _) = continuation_offset(first.next_run);

    source.insert_rows(event_rows(16, 20)).await;

    let second = cycle.run(payload).await;
    assert_eq!(second.report.remaining_rows, Some(5));
    assert_eq!(second.report.fetched, 5);

    let third = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(third.next_run, NextRun::Finished);
    assert_eq!(source.exported_ids().await, ids(1, 15));
}

#[tokio::test(flavor = "multi_thread")]
async fn unretryable_error_leaves_the_cursor_in_place() {
    init_test_tracing();
    let store = MemoryCheckpointStore::new();
    let (cycle, source) = build_cycle(ImportMechanism::Continuous, store.clone());
    source.insert_rows(event_rows(1, 25)).await;
    source
        .fail_next_with(StatementKind::FetchPage, ErrorKind::InvalidState, 1)
        .await;

    let outcome = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(outcome.phase, CyclePhase::Stopped);
    assert_eq!(
        outcome.next_run,
        NextRun::AwaitTrigger(ImportPayload::fresh())
    );
    assert_eq!(stored_cursor(&store).await, None);
    assert!(
        source
            .import_log()
            .await
            .iter()
            .any(|message| message.starts_with("stopped at offset 0"))
    );

    // Unlike an abandoned range, nothing is skipped.
    let outcome = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(outcome.report.committed, 10);
    assert_eq!(source.exported_ids().await, ids(1, 10));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_rows_are_passed_by_the_cursor() {
    init_test_tracing();
    let store = MemoryCheckpointStore::new();
    let (cycle, source) = build_cycle(ImportMechanism::Continuous, store.clone());
    source
        .insert_rows((1..=10).map(malformed_event_row))
        .await;
    source.insert_rows(event_rows(11, 15)).await;

    let first = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(first.report.committed, 0);
    assert_eq!(first.report.dropped, 10);
    let (payload, offset) = continuation_offset(first.next_run);
    assert_eq!(offset, Some(10));

    let second = cycle.run(payload).await;
    assert_eq!(second.report.committed, 5);
    assert_eq!(source.exported_ids().await, ids(11, 15));
    assert_eq!(stored_cursor(&store).await, Some(json!(15)));
    assert!(store.checkpoints().await.get(DROPPED_KEY).is_none());
}
