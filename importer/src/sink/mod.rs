//! Targets receiving exported events.

mod base;
pub mod http;
pub mod memory;

pub use base::*;
