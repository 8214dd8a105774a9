//! Postgres helpers shared by the importer crates.
//!
//! Connection pools, identifier quoting, the checkpoint table and its migrations.

pub mod checkpoints;
pub mod identifiers;
pub mod migrations;
pub mod pool;
#[cfg(feature = "test-utils")]
pub mod test_utils;
