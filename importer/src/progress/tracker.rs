use std::collections::BTreeSet;

use config::shared::{ImportMechanism, ProgressStrategy, TablesConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, ImportResult};
use crate::executor::{QueryExecutor, Statement};
use crate::import_error;
use crate::progress::ProgressQueries;
use crate::store::{
    CURSOR_KEY, CheckpointStore, DROPPED_KEY, SNAPSHOT_KEY, load_checkpoint, store_checkpoint,
};
use crate::types::{Cell, ImportPayload, RowSet};

/// Ceiling captured on the first run of a historical import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotState {
    /// Number of rows to import in total.
    pub ceiling: u64,
    /// Rows consumed so far: committed and dropped rows under the anti-join strategy, the cursor
    /// under the offset strategy.
    pub exported: u64,
}

impl SnapshotState {
    pub fn remaining(&self) -> u64 {
        self.ceiling.saturating_sub(self.exported)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Progress of the import as seen by one tick.
///
/// Rebuilt on every tick from the payload, the checkpoint store and a fresh count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportState {
    /// Rows left to import, [`None`] when the tick skipped counting.
    pub remaining: Option<u64>,
    /// Cursor into the ordered source table, only set by the offset strategy.
    pub offset: Option<u64>,
    pub retries_performed_so_far: u32,
    /// Snapshot of a historical import.
    pub snapshot: Option<SnapshotState>,
    /// Identifiers of rows that failed to transform, excluded from the anti-join fetches.
    pub dropped: Vec<String>,
}

impl ImportState {
    pub fn has_remaining_rows(&self) -> bool {
        self.remaining != Some(0)
    }
}

/// Counts, fetches and records progress through the source table.
#[derive(Debug, Clone)]
pub struct ProgressTracker<E, C> {
    strategy: ProgressStrategy,
    mechanism: ImportMechanism,
    queries: ProgressQueries,
    executor: E,
    store: C,
}

impl<E, C> ProgressTracker<E, C>
where
    E: QueryExecutor,
    C: CheckpointStore,
{
    pub fn new(
        tables: &TablesConfig,
        strategy: ProgressStrategy,
        mechanism: ImportMechanism,
        executor: E,
        store: C,
    ) -> Self {
        Self {
            strategy,
            mechanism,
            queries: ProgressQueries::new(tables),
            executor,
            store,
        }
    }

    pub fn strategy(&self) -> ProgressStrategy {
        self.strategy
    }

    pub fn is_historical(&self) -> bool {
        self.mechanism == ImportMechanism::HistoricalOnly
    }

    /// Builds the [`ImportState`] of a tick.
    ///
    /// The anti-join strategy counts on every tick. The offset strategy counts only on fresh
    /// ticks, continuation ticks take their position from the payload.
    pub async fn load_state(&self, payload: &ImportPayload) -> ImportResult<ImportState> {
        let retries_performed_so_far = payload.retries_performed_so_far;

        match self.strategy {
            ProgressStrategy::AntiJoin => {
                let dropped = self.dropped().await?;
                let count = self.count(self.queries.count_remaining(&dropped)).await?;
                let snapshot = if self.is_historical() {
                    Some(self.snapshot_or_capture(count).await?)
                } else {
                    None
                };
                let remaining = match snapshot {
                    Some(snapshot) => count.min(snapshot.remaining()),
                    None => count,
                };

                Ok(ImportState {
                    remaining: Some(remaining),
                    offset: None,
                    retries_performed_so_far,
                    snapshot,
                    dropped,
                })
            }
            ProgressStrategy::Offset => {
                let Some(offset) = payload.offset else {
                    let offset = self.cursor().await?;
                    let total = self.count(self.queries.count_total()).await?;
                    let snapshot = if self.is_historical() {
                        Some(self.snapshot_or_capture(total).await?)
                    } else {
                        None
                    };
                    let remaining = match snapshot {
                        Some(snapshot) => snapshot.ceiling.min(total).saturating_sub(offset),
                        None => total.saturating_sub(offset),
                    };

                    return Ok(ImportState {
                        remaining: Some(remaining),
                        offset: Some(offset),
                        retries_performed_so_far,
                        snapshot,
                        dropped: vec![],
                    });
                };

                let snapshot = if self.is_historical() {
                    load_checkpoint::<_, SnapshotState>(&self.store, SNAPSHOT_KEY).await?
                } else {
                    None
                };

                Ok(ImportState {
                    remaining: snapshot.map(|snapshot| snapshot.ceiling.saturating_sub(offset)),
                    offset: Some(offset),
                    retries_performed_so_far,
                    snapshot,
                    dropped: vec![],
                })
            }
        }
    }

    /// Number of rows the next fetch asks for.
    ///
    /// Historical imports never fetch past their snapshot ceiling.
    pub fn fetch_limit(&self, state: &ImportState, batch_size: u32) -> u64 {
        let batch_size = u64::from(batch_size);
        match state.snapshot {
            Some(_) => batch_size.min(state.remaining.unwrap_or(batch_size)),
            None => batch_size,
        }
    }

    /// Fetches the next batch of at most `limit` rows.
    pub async fn fetch_batch(&self, state: &ImportState, limit: u64) -> ImportResult<RowSet> {
        let statement = match state.offset {
            Some(offset) if self.strategy == ProgressStrategy::Offset => {
                self.queries.fetch_page(offset, limit)
            }
            _ => self.queries.fetch_batch(&state.dropped, limit),
        };

        self.executor.execute(&statement).await
    }

    /// Appends one export log entry per delivered identifier.
    pub async fn record_exported(&self, event_ids: Vec<String>) -> ImportResult<()> {
        if event_ids.is_empty() {
            return Ok(());
        }

        let count = event_ids.len();
        let statement = self.queries.record_exported(event_ids);
        self.executor.execute(&statement).await.map_err(|err| {
            import_error!(
                ErrorKind::CommitFailed,
                "Failed to record exported rows",
                format!("{count} delivered rows are not in the export log: {err}"),
                source: err
            )
        })?;

        debug!(count, "recorded exported rows");

        Ok(())
    }

    /// Records the identifiers of rows dropped by the transformation and returns how many rows
    /// the batch consumed without exporting them.
    ///
    /// The anti-join strategy persists the identifiers so the rows are never fetched again. The
    /// offset strategy moves past them with the cursor and persists nothing.
    pub async fn record_dropped(
        &self,
        state: &ImportState,
        dropped_ids: Vec<String>,
    ) -> ImportResult<u64> {
        if dropped_ids.is_empty() {
            return Ok(0);
        }

        if self.strategy == ProgressStrategy::Offset {
            return Ok(dropped_ids.len() as u64);
        }

        let mut dropped: BTreeSet<String> = state.dropped.iter().cloned().collect();
        let before = dropped.len();
        dropped.extend(dropped_ids);
        let added = (dropped.len() - before) as u64;
        if added == 0 {
            return Ok(0);
        }

        store_checkpoint(&self.store, DROPPED_KEY, &dropped).await?;
        debug!(added, total = dropped.len(), "recorded dropped rows");

        Ok(added)
    }

    /// Returns the offset following a batch of `consumed` rows, [`None`] under the anti-join
    /// strategy which has no position.
    pub fn next_offset(&self, state: &ImportState, consumed: u64) -> Option<u64> {
        match self.strategy {
            ProgressStrategy::AntiJoin => None,
            ProgressStrategy::Offset => {
                Some(state.offset.unwrap_or_default().saturating_add(consumed))
            }
        }
    }

    /// Persists the progress of a committed batch.
    ///
    /// Moves the cursor to `next_offset` under the offset strategy and counts `consumed` rows
    /// against the snapshot of a historical anti-join import.
    pub async fn persist_progress(
        &self,
        state: &ImportState,
        next_offset: Option<u64>,
        consumed: u64,
    ) -> ImportResult<()> {
        match (self.strategy, next_offset) {
            (ProgressStrategy::Offset, Some(offset)) => self.move_cursor(state.snapshot, offset).await,
            (ProgressStrategy::Offset, None) => Ok(()),
            (ProgressStrategy::AntiJoin, _) => {
                if let Some(mut snapshot) = state.snapshot {
                    snapshot.exported = snapshot.exported.saturating_add(consumed);
                    store_checkpoint(&self.store, SNAPSHOT_KEY, &snapshot).await?;
                }

                Ok(())
            }
        }
    }

    /// Gives up on the range starting at `offset` and returns the offset of the next tick.
    ///
    /// The offset strategy moves the persisted cursor past `batch_size` rows, starting from the
    /// stored cursor when the tick never learned its offset. The anti-join strategy cannot skip
    /// rows, they are fetched again by the next chain.
    pub async fn skip_range(
        &self,
        offset: Option<u64>,
        batch_size: u32,
    ) -> ImportResult<Option<u64>> {
        if self.strategy == ProgressStrategy::AntiJoin {
            return Ok(None);
        }

        let offset = match offset {
            Some(offset) => offset,
            None => self.cursor().await?,
        };
        let offset = offset.saturating_add(u64::from(batch_size));

        let snapshot = if self.is_historical() {
            load_checkpoint::<_, SnapshotState>(&self.store, SNAPSHOT_KEY).await?
        } else {
            None
        };
        self.move_cursor(snapshot, offset).await?;

        Ok(Some(offset))
    }

    /// Writes `message` to the import log. Failures are logged and otherwise ignored.
    pub async fn log_message(&self, message: &str) {
        let Some(statement) = self.queries.log_message(message) else {
            return;
        };

        if let Err(err) = self.executor.execute(&statement).await {
            warn!(error = %err, message, "failed to write to the import log");
        }
    }

    async fn count(&self, statement: Statement) -> ImportResult<u64> {
        let rows = self.executor.execute(&statement).await?;

        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(|cell| match cell {
                Cell::I64(count) => u64::try_from(*count).ok(),
                Cell::Numeric(count) => count.to_string().parse().ok(),
                _ => None,
            })
            .ok_or_else(|| {
                import_error!(
                    ErrorKind::InvalidState,
                    "Count query returned no usable count",
                    format!("{} returned {rows:?}", statement.kind)
                )
            })?;

        Ok(count)
    }

    async fn dropped(&self) -> ImportResult<Vec<String>> {
        Ok(load_checkpoint::<_, Vec<String>>(&self.store, DROPPED_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn cursor(&self) -> ImportResult<u64> {
        Ok(load_checkpoint::<_, u64>(&self.store, CURSOR_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn move_cursor(&self, snapshot: Option<SnapshotState>, offset: u64) -> ImportResult<()> {
        store_checkpoint(&self.store, CURSOR_KEY, &offset).await?;

        if let Some(mut snapshot) = snapshot {
            snapshot.exported = offset;
            store_checkpoint(&self.store, SNAPSHOT_KEY, &snapshot).await?;
        }

        Ok(())
    }

    async fn snapshot_or_capture(&self, count: u64) -> ImportResult<SnapshotState> {
        if let Some(snapshot) = load_checkpoint(&self.store, SNAPSHOT_KEY).await? {
            return Ok(snapshot);
        }

        let snapshot = SnapshotState {
            ceiling: count,
            exported: 0,
        };
        store_checkpoint(&self.store, SNAPSHOT_KEY, &snapshot).await?;
        info!(ceiling = count, "captured historical import snapshot");

        Ok(snapshot)
    }
}
