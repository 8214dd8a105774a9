//! Logging setup shared by the importer binary and the test suites.

pub mod tracing;
