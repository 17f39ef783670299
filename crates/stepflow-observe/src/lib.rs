//! Observability setup shared by stepflow binaries.

pub mod tracing_setup;
