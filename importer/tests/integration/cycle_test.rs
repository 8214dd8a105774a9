use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use config::shared::{ImportConfig, ImportMechanism, ProgressStrategy};
use importer::cycle::{CyclePhase, ImportCycle, NextRun};
use importer::error::ErrorKind;
use importer::executor::StatementKind;
use importer::guard::{RunGuard, RunGuardState};
use importer::sink::memory::MemorySink;
use importer::store::memory::MemoryCheckpointStore;
use importer::store::{DROPPED_KEY, RUN_GUARD_KEY, load_checkpoint, store_checkpoint};
use importer::test_utils::fixtures::{
    TEST_IDENTIFIER_COLUMN, event_rows, malformed_event_row, test_import_config,
};
use importer::test_utils::source::MemorySource;
use importer::types::ImportPayload;
use telemetry::tracing::init_test_tracing;

type TestCycle = ImportCycle<MemorySource, MemoryCheckpointStore, MemorySink>;

fn build_cycle(
    mechanism: ImportMechanism,
) -> (TestCycle, MemorySource, MemoryCheckpointStore, MemorySink) {
    let config = test_import_config(ProgressStrategy::AntiJoin, mechanism);
    let source = MemorySource::new(TEST_IDENTIFIER_COLUMN);
    let store = MemoryCheckpointStore::new();
    let sink = MemorySink::new();

    let cycle = cycle_on(config, &source, &store, &sink);

    (cycle, source, store, sink)
}

fn cycle_on(
    config: ImportConfig,
    source: &MemorySource,
    store: &MemoryCheckpointStore,
    sink: &MemorySink,
) -> TestCycle {
    ImportCycle::new(Arc::new(config), source.clone(), store.clone(), sink.clone())
}

fn ids(first: i64, last: i64) -> Vec<String> {
    (first..=last).map(|id| id.to_string()).collect()
}

/// Returns the payload of an immediate continuation, which always carries the guard token.
fn continuation(next_run: NextRun) -> ImportPayload {
    let NextRun::Immediately(payload) = next_run else {
        panic!("expected an immediate continuation, got {next_run:?}");
    };
    assert!(payload.guard_token.is_some());
    assert_eq!(payload.retries_performed_so_far, 0);

    payload
}

/// Moves the acquisition time of the stored run guard `minutes` into the past.
async fn backdate_guard(store: &MemoryCheckpointStore, minutes: i64) {
    let mut state: RunGuardState = load_checkpoint(store, RUN_GUARD_KEY)
        .await
        .unwrap()
        .unwrap();
    state.acquired_at = Some(Utc::now() - chrono::Duration::minutes(minutes));
    store_checkpoint(store, RUN_GUARD_KEY, &state).await.unwrap();
}

const IDLE_DELAY: Duration = Duration::from_secs(60);
const GUARD_TTL: Duration = Duration::from_secs(600);

#[tokio::test(flavor = "multi_thread")]
async fn backlog_is_drained_in_full_batches_then_idles() {
    init_test_tracing();
    let (cycle, source, store, sink) = build_cycle(ImportMechanism::Continuous);
    source.insert_rows(event_rows(1, 25)).await;

    let first = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(first.phase, CyclePhase::Scheduled);
    assert_eq!(first.report.remaining_rows, Some(25));
    assert_eq!(first.report.committed, 10);
    let payload = continuation(first.next_run);
    assert_eq!(payload.offset, None);
    assert_eq!(source.exported_ids().await, ids(1, 10));

    let second = cycle.run(payload).await;
    assert_eq!(second.report.remaining_rows, Some(15));
    let next = continuation(second.next_run);
    assert_eq!(next.guard_token, payload.guard_token);
    assert_eq!(source.exported_ids().await, ids(1, 20));

    let third = cycle.run(next).await;
    assert_eq!(third.phase, CyclePhase::Scheduled);
    assert_eq!(third.report.fetched, 5);
    assert_eq!(
        third.next_run,
        NextRun::After {
            delay: IDLE_DELAY,
            payload: ImportPayload::fresh(),
        }
    );
    assert_eq!(source.exported_ids().await, ids(1, 25));
    assert!(!RunGuard::new(store, None).is_held().await.unwrap());

    let fourth = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(fourth.phase, CyclePhase::Stopped);
    assert_eq!(fourth.report.remaining_rows, Some(0));
    assert_eq!(
        fourth.next_run,
        NextRun::After {
            delay: IDLE_DELAY,
            payload: ImportPayload::fresh(),
        }
    );

    let events = sink.events().await;
    assert_eq!(events.len(), 25);
    assert_eq!(events[0].event_name, "imported_event");
    assert_eq!(events[0].properties["distinct_id"], "user-1");
    assert_eq!(events[24].properties["row"], 25);
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_fetch_backs_off_exponentially_then_abandons_the_range() {
    init_test_tracing();
    let (cycle, source, store, sink) = build_cycle(ImportMechanism::Continuous);
    source.insert_rows(event_rows(1, 25)).await;
    source.fail_next(StatementKind::FetchBatch, 16).await;

    let mut payload = ImportPayload::fresh();
    for attempt in 0..15u32 {
        let outcome = cycle.run(payload).await;
        assert_eq!(outcome.phase, CyclePhase::Retrying);

        let NextRun::After { delay, payload: next } = outcome.next_run else {
            panic!("expected a delayed retry, got {:?}", outcome.next_run);
        };
        assert_eq!(delay, Duration::from_secs(3 * 2u64.pow(attempt)));
        assert_eq!(next.retries_performed_so_far, attempt + 1);
        assert!(next.is_continuation());
        payload = next;
    }

    // The 16th consecutive failure gives up on the range.
    let outcome = cycle.run(payload).await;
    assert_eq!(outcome.phase, CyclePhase::Stopped);
    assert_eq!(
        outcome.next_run,
        NextRun::AwaitTrigger(ImportPayload::fresh())
    );
    assert!(!RunGuard::new(store, None).is_held().await.unwrap());
    assert!(
        source
            .import_log()
            .await
            .iter()
            .any(|message| message.starts_with("abandoned range"))
    );
    assert!(sink.events().await.is_empty());

    // The next trigger starts over with a reset retry counter.
    let outcome = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(outcome.report.committed, 10);
    assert_eq!(source.exported_ids().await, ids(1, 10));
}

#[tokio::test(flavor = "multi_thread")]
async fn first_fetch_failure_retries_after_base_delay() {
    init_test_tracing();
    let (cycle, source, _store, _sink) = build_cycle(ImportMechanism::Continuous);
    source.insert_rows(event_rows(1, 25)).await;
    source.fail_next(StatementKind::FetchBatch, 1).await;

    let outcome = cycle.run(ImportPayload::fresh()).await;

    assert_eq!(outcome.phase, CyclePhase::Retrying);
    let NextRun::After { delay, payload } = outcome.next_run else {
        panic!("expected a delayed retry, got {:?}", outcome.next_run);
    };
    assert_eq!(delay, Duration::from_secs(3));
    assert_eq!(payload.offset, None);
    assert_eq!(payload.retries_performed_so_far, 1);
    assert!(payload.is_continuation());
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_row_is_dropped_while_the_rest_of_the_batch_is_exported() {
    init_test_tracing();
    let (cycle, source, _store, sink) = build_cycle(ImportMechanism::Continuous);
    let mut rows = event_rows(1, 5);
    rows[2] = malformed_event_row(3);
    source.insert_rows(rows).await;

    let outcome = cycle.run(ImportPayload::fresh()).await;

    assert_eq!(outcome.report.fetched, 5);
    assert_eq!(outcome.report.transform_failures, 1);
    assert_eq!(outcome.report.delivered, 4);
    assert_eq!(outcome.report.committed, 4);
    assert_eq!(outcome.report.dropped, 1);
    assert_eq!(source.exported_ids().await, vec!["1", "2", "4", "5"]);
    assert_eq!(sink.events().await.len(), 4);
    assert!(
        source
            .import_log()
            .await
            .iter()
            .any(|message| message.starts_with("dropped row"))
    );
    assert!(matches!(outcome.next_run, NextRun::After { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn anti_join_never_fetches_exported_rows() {
    init_test_tracing();
    let (cycle, source, _store, sink) = build_cycle(ImportMechanism::Continuous);
    source.insert_rows(event_rows(1, 12)).await;

    let mut payload = ImportPayload::fresh();
    let mut previous_remaining = u64::MAX;
    loop {
        let outcome = cycle.run(payload).await;
        let remaining = outcome.report.remaining_rows.unwrap();
        assert!(remaining <= previous_remaining);
        previous_remaining = remaining;

        match outcome.next_run {
            NextRun::Immediately(next) => payload = next,
            _ => break,
        }
    }

    source.insert_rows(event_rows(13, 14)).await;
    cycle.run(ImportPayload::fresh()).await;

    let exported = source.exported_ids().await;
    let unique: HashSet<&String> = exported.iter().collect();
    assert_eq!(exported.len(), 14);
    assert_eq!(unique.len(), 14);
    assert_eq!(sink.events().await.len(), 14);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_commit_redelivers_the_range_on_the_next_tick() {
    init_test_tracing();
    let (cycle, source, _store, sink) = build_cycle(ImportMechanism::Continuous);
    source.insert_rows(event_rows(1, 10)).await;
    source.fail_next(StatementKind::RecordExported, 1).await;

    let outcome = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(outcome.phase, CyclePhase::Retrying);
    assert_eq!(outcome.report.delivered, 10);
    assert_eq!(outcome.report.committed, 0);
    assert!(source.exported_ids().await.is_empty());

    let NextRun::After { payload, .. } = outcome.next_run else {
        panic!("expected a delayed retry");
    };
    let outcome = cycle.run(payload).await;
    assert_eq!(outcome.report.committed, 10);

    // Delivered but uncommitted events are delivered again.
    assert_eq!(source.exported_ids().await, ids(1, 10));
    assert_eq!(sink.events().await.len(), 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn held_guard_stops_the_tick_without_touching_the_source() {
    init_test_tracing();
    let (cycle, source, store, sink) = build_cycle(ImportMechanism::Continuous);
    source.insert_rows(event_rows(1, 10)).await;

    let other_chain = RunGuard::new(store, None);
    assert!(other_chain.acquire().await.unwrap().is_some());

    let outcome = cycle.run(ImportPayload::fresh()).await;

    assert_eq!(outcome.phase, CyclePhase::Stopped);
    assert_eq!(
        outcome.next_run,
        NextRun::AwaitTrigger(ImportPayload::fresh())
    );
    assert!(source.executed().await.is_empty());
    assert!(sink.events().await.is_empty());
    assert!(other_chain.is_held().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn historical_import_stops_at_the_snapshot_ceiling() {
    init_test_tracing();
    let (cycle, source, _store, _sink) = build_cycle(ImportMechanism::HistoricalOnly);
    source.insert_rows(event_rows(1, 15)).await;

    let first = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(first.report.remaining_rows, Some(15));
    let payload = continuation(first.next_run);

    // Rows added after the snapshot are not part of the historical import.
    source.insert_rows(event_rows(16, 25)).await;

    let second = cycle.run(payload).await;
    assert_eq!(second.report.remaining_rows, Some(5));
    assert_eq!(second.report.fetched, 5);
    assert!(matches!(second.next_run, NextRun::After { .. }));

    let third = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(third.phase, CyclePhase::Stopped);
    assert_eq!(third.next_run, NextRun::Finished);
    assert_eq!(source.exported_ids().await, ids(1, 15));
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_of_malformed_rows_does_not_stall_the_import() {
    init_test_tracing();
    let (cycle, source, store, sink) = build_cycle(ImportMechanism::Continuous);
    source
        .insert_rows((1..=10).map(malformed_event_row))
        .await;
    source.insert_rows(event_rows(11, 30)).await;

    let first = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(first.report.fetched, 10);
    assert_eq!(first.report.committed, 0);
    assert_eq!(first.report.dropped, 10);
    let mut payload = continuation(first.next_run);

    let mut ticks = 1;
    loop {
        let outcome = cycle.run(payload).await;
        ticks += 1;
        match outcome.next_run {
            NextRun::Immediately(next) => payload = next,
            _ => break,
        }
    }

    assert_eq!(ticks, 4);
    assert_eq!(source.exported_ids().await, ids(11, 30));
    assert_eq!(sink.events().await.len(), 20);

    let dropped: Vec<String> = load_checkpoint(&store, DROPPED_KEY).await.unwrap().unwrap();
    let mut expected = ids(1, 10);
    expected.sort();
    assert_eq!(dropped, expected);

    // Dropped rows stay out of later counts.
    let outcome = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(outcome.report.remaining_rows, Some(0));
    assert_eq!(outcome.report.fetched, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn historical_import_finishes_past_malformed_rows() {
    init_test_tracing();
    let (cycle, source, _store, _sink) = build_cycle(ImportMechanism::HistoricalOnly);
    source
        .insert_rows((1..=10).map(malformed_event_row))
        .await;
    source.insert_rows(event_rows(11, 15)).await;

    let first = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(first.report.remaining_rows, Some(15));
    assert_eq!(first.report.dropped, 10);
    let payload = continuation(first.next_run);

    let second = cycle.run(payload).await;
    assert_eq!(second.report.remaining_rows, Some(5));
    assert_eq!(second.report.committed, 5);

    let third = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(third.next_run, NextRun::Finished);
    assert_eq!(source.exported_ids().await, ids(11, 15));
}

#[tokio::test(flavor = "multi_thread")]
async fn chain_whose_guard_was_taken_over_stops_without_importing() {
    init_test_tracing();
    let mut config = test_import_config(ProgressStrategy::AntiJoin, ImportMechanism::Continuous);
    config.retry.max_retries = 5;
    config.schedule.guard_ttl_ms = Some(600_000);
    assert!(config.validate().is_ok());
    let source = MemorySource::new(TEST_IDENTIFIER_COLUMN);
    let store = MemoryCheckpointStore::new();
    let sink = MemorySink::new();
    let stalled_chain = cycle_on(config.clone(), &source, &store, &sink);
    let new_chain = cycle_on(config, &source, &store, &sink);
    source.insert_rows(event_rows(1, 25)).await;
    source.fail_next(StatementKind::FetchBatch, 1).await;

    let outcome = stalled_chain.run(ImportPayload::fresh()).await;
    let NextRun::After {
        payload: retry_payload,
        ..
    } = outcome.next_run
    else {
        panic!("expected a delayed retry, got {:?}", outcome.next_run);
    };

    // The retry is late enough for the guard to go stale and be taken over.
    backdate_guard(&store, 20).await;
    let taken_over = new_chain.run(ImportPayload::fresh()).await;
    assert_eq!(taken_over.report.committed, 10);
    let new_payload = continuation(taken_over.next_run);
    assert_ne!(new_payload.guard_token, retry_payload.guard_token);

    let resumed = stalled_chain.run(retry_payload).await;
    assert_eq!(resumed.phase, CyclePhase::Stopped);
    assert_eq!(
        resumed.next_run,
        NextRun::AwaitTrigger(ImportPayload::fresh())
    );
    assert_eq!(resumed.report.fetched, 0);
    assert_eq!(source.exported_ids().await, ids(1, 10));

    // The new chain still holds the guard and nobody else can take it.
    let guard = RunGuard::new(store.clone(), Some(GUARD_TTL));
    assert!(guard.is_held().await.unwrap());
    assert_eq!(guard.state().await.unwrap().owner, new_payload.guard_token);
    assert_eq!(guard.acquire().await.unwrap(), None);

    let next = new_chain.run(new_payload).await;
    assert_eq!(next.report.committed, 10);
    assert_eq!(source.exported_ids().await, ids(1, 20));
    assert_eq!(sink.events().await.len(), 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn unretryable_error_stops_the_chain_without_backoff() {
    init_test_tracing();
    let (cycle, source, store, sink) = build_cycle(ImportMechanism::Continuous);
    source.insert_rows(event_rows(1, 10)).await;
    source
        .fail_next_with(StatementKind::CountRemaining, ErrorKind::InvalidState, 1)
        .await;

    let outcome = cycle.run(ImportPayload::fresh()).await;

    assert_eq!(outcome.phase, CyclePhase::Stopped);
    assert_eq!(
        outcome.next_run,
        NextRun::AwaitTrigger(ImportPayload::fresh())
    );
    assert!(!RunGuard::new(store, None).is_held().await.unwrap());
    assert!(!source.executed().await.contains(&StatementKind::FetchBatch));
    assert!(sink.events().await.is_empty());
    assert!(
        source
            .import_log()
            .await
            .iter()
            .any(|message| message.starts_with("stopped at offset none"))
    );

    let outcome = cycle.run(ImportPayload::fresh()).await;
    assert_eq!(outcome.report.committed, 10);
}
