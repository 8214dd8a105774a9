//! Hosting of import ticks.
//!
//! [`ImportScheduler::run`] keeps ticking inside the process until shutdown, sleeping whenever a
//! tick asks to be run later. [`ImportScheduler::run_due_tick`] serves external schedulers such
//! as cron: every invocation runs the chain of ticks that is due and persists when the next one
//! should happen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::concurrency::shutdown::{ShutdownRx, shutdown_requested};
use crate::cycle::{ImportCycle, NextRun};
use crate::error::ImportResult;
use crate::executor::QueryExecutor;
use crate::sink::EventSink;
use crate::store::{CheckpointStore, NEXT_RUN_KEY, load_checkpoint, store_checkpoint};
use crate::types::ImportPayload;

/// Run persisted by [`ImportScheduler::run_due_tick`] for the next invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRun {
    pub payload: ImportPayload,
    /// Earliest time the run may start.
    pub not_before: DateTime<Utc>,
    /// Set once a historical import is complete.
    #[serde(default)]
    pub finished: bool,
}

/// Result of [`ImportScheduler::run_due_tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueTick {
    /// The next run is not due yet.
    NotDue { not_before: DateTime<Utc> },
    /// Ticks ran and the next run was persisted.
    Ran { ticks: u32, next: ScheduledRun },
    /// The historical import is complete.
    Finished,
}

/// Drives an [`ImportCycle`].
#[derive(Debug)]
pub struct ImportScheduler<E, C, S> {
    cycle: ImportCycle<E, C, S>,
    store: C,
}

impl<E, C, S> ImportScheduler<E, C, S>
where
    E: QueryExecutor,
    C: CheckpointStore + Clone,
    S: EventSink,
{
    pub fn new(cycle: ImportCycle<E, C, S>, store: C) -> Self {
        Self { cycle, store }
    }

    pub fn cycle(&self) -> &ImportCycle<E, C, S> {
        &self.cycle
    }

    /// Runs ticks until shutdown is requested or a historical import completes.
    ///
    /// Every wait is interrupted by shutdown. On exit the run guard is released if this chain
    /// holds it and the sink is shut down.
    pub async fn run(&self, mut shutdown_rx: ShutdownRx) -> ImportResult<()> {
        let schedule = &self.cycle.config().schedule;
        info!(
            import = %self.cycle.config().name,
            sink = S::name(),
            startup_delay_ms = schedule.startup_delay_ms,
            "starting import scheduler"
        );

        let mut payload = ImportPayload::fresh();
        if wait_or_shutdown(schedule.startup_delay(), &mut shutdown_rx).await {
            return self.teardown(payload).await;
        }

        loop {
            let outcome = self.cycle.run(payload).await;

            let delay = match outcome.next_run {
                NextRun::Immediately(next) => {
                    payload = next;
                    Duration::ZERO
                }
                NextRun::After { delay, payload: next } => {
                    payload = next;
                    delay
                }
                NextRun::AwaitTrigger(next) => {
                    payload = next;
                    schedule.idle_delay()
                }
                NextRun::Finished => {
                    info!(import = %self.cycle.config().name, "import finished, stopping scheduler");
                    return self.teardown(ImportPayload::fresh()).await;
                }
            };

            if wait_or_shutdown(delay, &mut shutdown_rx).await {
                info!(import = %self.cycle.config().name, "shutdown requested, stopping scheduler");
                return self.teardown(payload).await;
            }
        }
    }

    /// Runs the ticks that are due now and persists the next run.
    ///
    /// Ticks asking for an immediate continuation run within the same invocation, until a tick
    /// asks to be run later or shutdown is requested.
    pub async fn run_due_tick(&self, shutdown_rx: ShutdownRx) -> ImportResult<DueTick> {
        let scheduled = load_checkpoint::<_, ScheduledRun>(&self.store, NEXT_RUN_KEY).await?;

        let mut payload = match scheduled {
            Some(scheduled) if scheduled.finished => {
                info!(import = %self.cycle.config().name, "historical import already complete");
                return Ok(DueTick::Finished);
            }
            Some(scheduled) if scheduled.not_before > Utc::now() => {
                info!(
                    import = %self.cycle.config().name,
                    not_before = %scheduled.not_before,
                    "next run is not due yet"
                );
                return Ok(DueTick::NotDue {
                    not_before: scheduled.not_before,
                });
            }
            Some(scheduled) => scheduled.payload,
            None => ImportPayload::fresh(),
        };

        let mut ticks = 0;
        let next = loop {
            let outcome = self.cycle.run(payload).await;
            ticks += 1;

            match outcome.next_run {
                NextRun::Immediately(next) => {
                    if shutdown_rx.has_changed().unwrap_or(false) {
                        break ScheduledRun::due_now(next);
                    }
                    payload = next;
                }
                NextRun::After { delay, payload } => break ScheduledRun::due_after(payload, delay),
                NextRun::AwaitTrigger(payload) => break ScheduledRun::due_now(payload),
                NextRun::Finished => {
                    let finished = ScheduledRun {
                        payload: ImportPayload::fresh(),
                        not_before: Utc::now(),
                        finished: true,
                    };
                    store_checkpoint(&self.store, NEXT_RUN_KEY, &finished).await?;
                    self.cycle.sink().shutdown().await?;

                    return Ok(DueTick::Finished);
                }
            }
        };

        store_checkpoint(&self.store, NEXT_RUN_KEY, &next).await?;
        self.cycle.sink().shutdown().await?;
        info!(
            import = %self.cycle.config().name,
            ticks,
            not_before = %next.not_before,
            "persisted next run"
        );

        Ok(DueTick::Ran { ticks, next })
    }

    async fn teardown(&self, payload: ImportPayload) -> ImportResult<()> {
        if let Some(token) = payload.guard_token {
            if let Err(err) = self.cycle.guard().release(token).await {
                error!(error = %err, "failed to release the run guard on shutdown");
            }
        }

        self.cycle.sink().shutdown().await
    }
}

impl ScheduledRun {
    fn due_now(payload: ImportPayload) -> Self {
        Self {
            payload,
            not_before: Utc::now(),
            finished: false,
        }
    }

    fn due_after(payload: ImportPayload, delay: Duration) -> Self {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let not_before = Utc::now()
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            payload,
            not_before,
            finished: false,
        }
    }
}

/// Sleeps for `delay`. Returns `true` when shutdown was requested first.
async fn wait_or_shutdown(delay: Duration, shutdown_rx: &mut ShutdownRx) -> bool {
    if shutdown_rx.has_changed().unwrap_or(false) {
        return true;
    }

    tokio::select! {
        biased;
        _ = shutdown_requested(shutdown_rx) => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
