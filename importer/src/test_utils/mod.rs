//! Helpers for testing imports, in memory or against a throwaway Postgres database.

#[cfg(feature = "test-utils")]
pub mod database;
pub mod fixtures;
pub mod source;
pub mod store;
