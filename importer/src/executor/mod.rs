//! Running SQL statements against the source database.

mod base;
pub mod postgres;

pub use base::*;
