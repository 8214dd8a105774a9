//! Configuration for the table importer.
//!
//! Holds the shared configuration types, their validation rules and the hierarchical loader used
//! by the binaries.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config};
pub use secret::SerializableSecretString;
