//! Incremental batch import of a Postgres table into an event sink.
//!
//! A scheduled [`cycle::ImportCycle`] counts the rows that are still pending, fetches one ordered
//! batch through a [`executor::QueryExecutor`], turns each row into an event with a
//! [`transform::Transformation`], delivers the events to an [`sink::EventSink`] and records the
//! delivered identifiers in an export log. Progress survives restarts through a
//! [`store::CheckpointStore`], and a [`guard::RunGuard`] keeps two chains of ticks from importing
//! the same table at once.

pub mod concurrency;
pub mod cycle;
pub mod error;
pub mod executor;
pub mod guard;
mod macros;
pub mod policy;
pub mod progress;
pub mod scheduler;
pub mod sink;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transform;
pub mod types;
