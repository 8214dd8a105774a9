mod base;
mod connection;
mod import;
mod importer;
mod sink;
mod state_store;

pub use base::*;
pub use connection::*;
pub use import::*;
pub use importer::*;
pub use sink::*;
pub use state_store::*;
