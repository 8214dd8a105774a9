//! Mapping of source rows to events.

mod base;

pub use base::*;
