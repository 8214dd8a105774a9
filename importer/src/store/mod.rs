//! Persisted checkpoints: the run guard, the offset cursor, the historical snapshot, the dropped
//! rows and the next scheduled run.

mod base;
pub mod memory;
pub mod postgres;

pub use base::*;
