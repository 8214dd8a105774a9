//! Tracking which source rows are still to be imported.
//!
//! Two strategies are supported. The anti-join strategy treats every source row without an
//! export log entry as remaining, so a re-fetched range never yields an already exported row. The
//! offset strategy keeps a numeric cursor into the ordered table and is meant for sources where
//! the anti-join is too expensive.

mod queries;
mod tracker;

pub use queries::*;
pub use tracker::*;
