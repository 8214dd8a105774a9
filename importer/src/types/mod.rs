//! Values flowing through an import: source rows, their cells and the events built from them.

mod cell;
mod event;
mod payload;
mod row;

pub use cell::*;
pub use event::*;
pub use payload::*;
pub use row::*;
