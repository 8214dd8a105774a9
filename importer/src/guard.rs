use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ImportResult;
use crate::store::{CheckpointStore, RUN_GUARD_KEY, load_checkpoint, store_checkpoint};

/// Persisted state of the [`RunGuard`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunGuardState {
    pub held: bool,
    #[serde(default)]
    pub acquired_at: Option<DateTime<Utc>>,
    /// Token of the chain holding the guard.
    #[serde(default)]
    pub owner: Option<Uuid>,
}

impl RunGuardState {
    fn is_owned_by(&self, token: Uuid) -> bool {
        self.held && self.owner == Some(token)
    }
}

/// Flag in the checkpoint store preventing two chains of ticks from importing concurrently.
///
/// The guard is best effort: reading and writing the flag are two separate store calls. A process
/// that dies while holding the guard leaves it held, which is why a guard older than the
/// configured TTL can be taken over. Every acquisition hands out a fresh token and only the
/// holder of the current token can refresh or release the guard, so a chain whose guard was
/// taken over cannot release it from under the new holder.
#[derive(Debug, Clone)]
pub struct RunGuard<C> {
    store: C,
    ttl: Option<Duration>,
}

impl<C> RunGuard<C>
where
    C: CheckpointStore,
{
    pub fn new(store: C, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    /// Takes the guard and returns its token, or [`None`] when it is already held.
    pub async fn acquire(&self) -> ImportResult<Option<Uuid>> {
        let state = self.state().await?;
        if state.held {
            if !self.is_stale(&state) {
                return Ok(None);
            }

            warn!(
                acquired_at = ?state.acquired_at,
                previous_owner = ?state.owner,
                ttl = ?self.ttl,
                "run guard held past its ttl, taking it over"
            );
        }

        let token = Uuid::new_v4();
        self.hold(token).await?;
        debug!(%token, "run guard acquired");

        Ok(Some(token))
    }

    /// Renews the acquisition time of the guard held with `token`.
    ///
    /// Returns `false` without writing anything when the guard is no longer held with `token`.
    pub async fn refresh(&self, token: Uuid) -> ImportResult<bool> {
        let state = self.state().await?;
        if !state.is_owned_by(token) {
            return Ok(false);
        }

        self.hold(token).await?;

        Ok(true)
    }

    /// Releases the guard held with `token`.
    ///
    /// Does nothing when the guard is not held, or held with another token.
    pub async fn release(&self, token: Uuid) -> ImportResult<()> {
        let state = self.state().await?;
        if !state.is_owned_by(token) {
            if state.held {
                debug!(%token, owner = ?state.owner, "run guard held by another chain, not releasing");
            }
            return Ok(());
        }

        store_checkpoint(&self.store, RUN_GUARD_KEY, &RunGuardState::default()).await?;
        debug!(%token, "run guard released");

        Ok(())
    }

    /// Returns whether the guard is held and not yet stale.
    pub async fn is_held(&self) -> ImportResult<bool> {
        let state = self.state().await?;
        Ok(state.held && !self.is_stale(&state))
    }

    /// Returns the persisted guard state.
    pub async fn state(&self) -> ImportResult<RunGuardState> {
        Ok(load_checkpoint(&self.store, RUN_GUARD_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn hold(&self, token: Uuid) -> ImportResult<()> {
        let state = RunGuardState {
            held: true,
            acquired_at: Some(Utc::now()),
            owner: Some(token),
        };
        store_checkpoint(&self.store, RUN_GUARD_KEY, &state).await
    }

    fn is_stale(&self, state: &RunGuardState) -> bool {
        let (Some(ttl), Some(acquired_at)) = (self.ttl, state.acquired_at) else {
            return false;
        };

        let age = Utc::now().signed_duration_since(acquired_at);
        age.to_std().map(|age| age > ttl).unwrap_or(false)
    }
}
