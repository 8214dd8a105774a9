//! One tick of the import.
//!
//! A tick walks through `Guarding → Counting → Fetching → Transforming → Delivering →
//! Committing → Deciding` and ends in one of the terminal phases `Scheduled`, `Stopped` or
//! `Retrying`. It never returns an error: every failure is logged and turned into the next run
//! the host should schedule.

use std::sync::Arc;
use std::time::Duration;

use config::shared::ImportConfig;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ImportError;
use crate::executor::QueryExecutor;
use crate::guard::RunGuard;
use crate::policy::{RetryDirective, backoff_delay, build_error_handling_policy};
use crate::progress::{ImportState, ProgressTracker};
use crate::sink::EventSink;
use crate::store::CheckpointStore;
use crate::transform::Transformation;
use crate::types::{ExportedEvent, ImportPayload};

/// Phases of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Guarding,
    Counting,
    Fetching,
    Transforming,
    Delivering,
    Committing,
    Deciding,
    /// The next run is scheduled, immediately or after the idle delay.
    Scheduled,
    /// The tick ended without work, or gave up on its range.
    Stopped,
    /// The range failed and is retried after a backoff.
    Retrying,
}

/// What the host should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRun {
    /// Run the next tick right away.
    Immediately(ImportPayload),
    /// Run the next tick once `delay` elapsed.
    After {
        delay: Duration,
        payload: ImportPayload,
    },
    /// Wait for the next external trigger.
    AwaitTrigger(ImportPayload),
    /// The historical import is complete, no further tick is needed.
    Finished,
}

impl NextRun {
    /// Returns the payload of the next tick, [`None`] once finished.
    pub fn payload(&self) -> Option<&ImportPayload> {
        match self {
            NextRun::Immediately(payload)
            | NextRun::After { payload, .. }
            | NextRun::AwaitTrigger(payload) => Some(payload),
            NextRun::Finished => None,
        }
    }
}

/// Counters of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: u64,
    pub transform_failures: u64,
    pub delivered: u64,
    pub committed: u64,
    /// Rows that failed to transform and are left out of later fetches.
    pub dropped: u64,
    /// Rows left when the tick started, [`None`] when it did not count.
    pub remaining_rows: Option<u64>,
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub phase: CyclePhase,
    pub next_run: NextRun,
    pub report: CycleReport,
}

/// Runs ticks of one configured import.
#[derive(Debug)]
pub struct ImportCycle<E, C, S> {
    config: Arc<ImportConfig>,
    tracker: ProgressTracker<E, C>,
    guard: RunGuard<C>,
    transformation: Transformation,
    sink: S,
}

impl<E, C, S> ImportCycle<E, C, S>
where
    E: QueryExecutor,
    C: CheckpointStore + Clone,
    S: EventSink,
{
    pub fn new(config: Arc<ImportConfig>, executor: E, store: C, sink: S) -> Self {
        let tracker = ProgressTracker::new(
            &config.tables,
            config.progress,
            config.mechanism,
            executor,
            store.clone(),
        );
        let guard = RunGuard::new(store, config.schedule.guard_ttl());
        let transformation = Transformation::from_config(&config.tables, &config.transformation);

        Self {
            config,
            tracker,
            guard,
            transformation,
            sink,
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn guard(&self) -> &RunGuard<C> {
        &self.guard
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Runs one tick with the payload handed over by the previous one.
    pub async fn run(&self, payload: ImportPayload) -> CycleOutcome {
        let mut report = CycleReport::default();
        let mut phase = CyclePhase::Idle;

        self.enter(&mut phase, CyclePhase::Guarding);
        let guard_token = match payload.guard_token {
            Some(token) => match self.guard.refresh(token).await {
                Ok(true) => token,
                Ok(false) => {
                    warn!(
                        import = %self.config.name,
                        %token,
                        "run guard was taken over by another run, stopping this chain"
                    );
                    return self.finish(
                        &mut phase,
                        CyclePhase::Stopped,
                        NextRun::AwaitTrigger(ImportPayload::fresh()),
                        report,
                    );
                }
                Err(err) => {
                    return self
                        .retry(&mut phase, payload, payload.offset, Some(token), err, report)
                        .await;
                }
            },
            None => match self.guard.acquire().await {
                Ok(Some(token)) => token,
                Ok(None) => {
                    info!(import = %self.config.name, "run guard is held by another run, skipping tick");
                    return self.finish(
                        &mut phase,
                        CyclePhase::Stopped,
                        NextRun::AwaitTrigger(payload),
                        report,
                    );
                }
                Err(err) => {
                    return self
                        .retry(&mut phase, payload, payload.offset, None, err, report)
                        .await;
                }
            },
        };

        self.enter(&mut phase, CyclePhase::Counting);
        let state = match self.tracker.load_state(&payload).await {
            Ok(state) => state,
            Err(err) => {
                return self
                    .retry(&mut phase, payload, payload.offset, Some(guard_token), err, report)
                    .await;
            }
        };
        report.remaining_rows = state.remaining;

        if !state.has_remaining_rows() {
            self.release_guard(guard_token).await;

            if self.tracker.is_historical() {
                info!(import = %self.config.name, "historical import complete");
                self.tracker.log_message("historical import complete").await;
                return self.finish(&mut phase, CyclePhase::Stopped, NextRun::Finished, report);
            }

            debug!(import = %self.config.name, "no rows to import");
            let next_run = NextRun::After {
                delay: self.config.schedule.idle_delay(),
                payload: ImportPayload::fresh(),
            };
            return self.finish(&mut phase, CyclePhase::Stopped, next_run, report);
        }

        self.enter(&mut phase, CyclePhase::Fetching);
        let limit = self.tracker.fetch_limit(&state, self.config.batch.size);
        let rows = match self.tracker.fetch_batch(&state, limit).await {
            Ok(rows) => rows,
            Err(err) => {
                return self
                    .retry(&mut phase, payload, state.offset, Some(guard_token), err, report)
                    .await;
            }
        };
        report.fetched = rows.len() as u64;

        self.enter(&mut phase, CyclePhase::Transforming);
        let mut events = Vec::with_capacity(rows.len());
        let mut dropped_ids = Vec::new();
        for row in &rows {
            match self.transformation.apply(row) {
                Ok(event) => events.push(event),
                Err(err) => {
                    report.transform_failures += 1;
                    self.report_dropped_row(&err).await;
                    // Rows without an identifier are never fetched by the anti-join.
                    if let Some(id) = self.transformation.identifier(row) {
                        dropped_ids.push(id);
                    }
                }
            }
        }

        self.enter(&mut phase, CyclePhase::Delivering);
        for ExportedEvent {
            name, properties, ..
        } in &events
        {
            self.sink.capture(name, properties).await;
            report.delivered += 1;
        }

        self.enter(&mut phase, CyclePhase::Committing);
        let event_ids: Vec<String> = events.into_iter().map(|event| event.id).collect();
        let delivered = event_ids.len() as u64;
        if let Err(err) = self.tracker.record_exported(event_ids).await {
            error!(
                import = %self.config.name,
                delivered,
                error = %err,
                "delivered events could not be recorded, the range will be fetched again"
            );
            return self
                .retry(&mut phase, payload, state.offset, Some(guard_token), err, report)
                .await;
        }
        report.committed = delivered;

        report.dropped = match self.tracker.record_dropped(&state, dropped_ids).await {
            Ok(dropped) => dropped,
            Err(err) => {
                return self
                    .retry(&mut phase, payload, state.offset, Some(guard_token), err, report)
                    .await;
            }
        };

        self.enter(&mut phase, CyclePhase::Deciding);
        let next_offset = self.tracker.next_offset(&state, report.fetched);
        let consumed = report.committed.saturating_add(report.dropped);
        if let Err(err) = self
            .tracker
            .persist_progress(&state, next_offset, consumed)
            .await
        {
            return self
                .retry(&mut phase, payload, next_offset, Some(guard_token), err, report)
                .await;
        }

        self.decide(&mut phase, &state, guard_token, next_offset, report)
            .await
    }

    async fn decide(
        &self,
        phase: &mut CyclePhase,
        state: &ImportState,
        guard_token: Uuid,
        next_offset: Option<u64>,
        report: CycleReport,
    ) -> CycleOutcome {
        let drained = report.fetched < u64::from(self.config.batch.size);
        if drained || report.committed.saturating_add(report.dropped) == 0 {
            self.release_guard(guard_token).await;

            let next_run = NextRun::After {
                delay: self.config.schedule.idle_delay(),
                payload: ImportPayload::fresh(),
            };
            return self.finish(phase, CyclePhase::Scheduled, next_run, report);
        }

        debug!(
            import = %self.config.name,
            remaining = ?state.remaining.map(|remaining| remaining.saturating_sub(report.fetched)),
            "batch full, continuing immediately"
        );
        let next_run = NextRun::Immediately(ImportPayload::continue_at(next_offset, guard_token));
        self.finish(phase, CyclePhase::Scheduled, next_run, report)
    }

    /// Handles a failed range.
    ///
    /// Errors that retrying cannot fix stop the chain right away. Every other error backs off,
    /// until the retry cap is reached and the range is abandoned. Row level directives are
    /// treated as timed ones here since the failure concerns the whole range.
    async fn retry(
        &self,
        phase: &mut CyclePhase,
        payload: ImportPayload,
        offset: Option<u64>,
        guard_token: Option<Uuid>,
        err: ImportError,
        report: CycleReport,
    ) -> CycleOutcome {
        let retries = payload.retries_performed_so_far;
        let max_retries = self.config.retry.max_retries;
        let policy = build_error_handling_policy(&err);

        if policy.retry_directive() == RetryDirective::NoRetry {
            error!(
                import = %self.config.name,
                offset = ?offset,
                error = %err,
                solution = policy.solution().unwrap_or_default(),
                "range failed with an error retrying cannot fix, stopping"
            );
            self.tracker
                .log_message(&format!(
                    "stopped at offset {}: {}",
                    format_offset(offset),
                    err.description()
                ))
                .await;

            if let Some(token) = guard_token {
                self.release_guard(token).await;
            }

            return self.finish(
                phase,
                CyclePhase::Stopped,
                NextRun::AwaitTrigger(ImportPayload::fresh()),
                report,
            );
        }

        if retries >= max_retries {
            error!(
                import = %self.config.name,
                retries,
                offset = ?offset,
                error = %err,
                solution = policy.solution().unwrap_or_default(),
                "range failed too many times, abandoning it"
            );
            self.tracker
                .log_message(&format!(
                    "abandoned range at offset {} after {retries} retries: {}",
                    format_offset(offset),
                    err.description()
                ))
                .await;

            if let Err(skip_err) = self
                .tracker
                .skip_range(offset, self.config.batch.size)
                .await
            {
                error!(error = %skip_err, "failed to move past the abandoned range");
            }
            if let Some(token) = guard_token {
                self.release_guard(token).await;
            }

            return self.finish(
                phase,
                CyclePhase::Stopped,
                NextRun::AwaitTrigger(ImportPayload::fresh()),
                report,
            );
        }

        let delay = backoff_delay(self.config.retry.base_delay(), retries);
        warn!(
            import = %self.config.name,
            retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            retry_directive = ?policy.retry_directive(),
            error = %err,
            "range failed, retrying after backoff"
        );

        let next_run = NextRun::After {
            delay,
            payload: ImportPayload {
                offset,
                retries_performed_so_far: retries + 1,
                guard_token,
            },
        };
        self.finish(phase, CyclePhase::Retrying, next_run, report)
    }

    async fn report_dropped_row(&self, err: &ImportError) {
        let policy = build_error_handling_policy(err);
        warn!(
            import = %self.config.name,
            error = %err,
            retry_directive = ?policy.retry_directive(),
            solution = policy.solution().unwrap_or_default(),
            "row could not be transformed and is dropped from the batch"
        );

        let detail = err.detail().unwrap_or_else(|| err.description());
        self.tracker
            .log_message(&format!("dropped row: {detail}"))
            .await;
    }

    async fn release_guard(&self, token: Uuid) {
        if let Err(err) = self.guard.release(token).await {
            error!(error = %err, "failed to release the run guard");
        }
    }

    fn enter(&self, phase: &mut CyclePhase, next: CyclePhase) {
        debug!(import = %self.config.name, from = ?phase, to = ?next, "import cycle phase");
        *phase = next;
    }

    fn finish(
        &self,
        phase: &mut CyclePhase,
        terminal: CyclePhase,
        next_run: NextRun,
        report: CycleReport,
    ) -> CycleOutcome {
        self.enter(phase, terminal);
        info!(
            import = %self.config.name,
            phase = ?terminal,
            next_run = ?next_run,
            fetched = report.fetched,
            transform_failures = report.transform_failures,
            delivered = report.delivered,
            committed = report.committed,
            dropped = report.dropped,
            remaining_rows = ?report.remaining_rows,
            "import tick finished"
        );

        CycleOutcome {
            phase: terminal,
            next_run,
            report,
        }
    }
}

fn format_offset(offset: Option<u64>) -> String {
    offset
        .map(|offset| offset.to_string())
        .unwrap_or_else(|| "none".to_owned())
}
