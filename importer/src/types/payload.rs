use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input of one tick, carried from the tick that scheduled it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportPayload {
    /// Position in the ordered source table. Only used by the offset strategy, [`None`] on
    /// fresh ticks which start from the persisted cursor.
    #[serde(default)]
    pub offset: Option<u64>,
    /// Consecutive failed attempts at the current range.
    #[serde(default)]
    pub retries_performed_so_far: u32,
    /// Token of the run guard held by the chain, [`None`] on ticks starting a new chain.
    #[serde(default)]
    pub guard_token: Option<Uuid>,
}

impl ImportPayload {
    /// Payload of a tick that starts a new chain.
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Payload of the next tick of the chain holding `guard_token`, with the retry counter reset.
    pub fn continue_at(offset: Option<u64>, guard_token: Uuid) -> Self {
        Self {
            offset,
            retries_performed_so_far: 0,
            guard_token: Some(guard_token),
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.guard_token.is_none()
    }

    pub fn is_continuation(&self) -> bool {
        self.guard_token.is_some()
    }
}
