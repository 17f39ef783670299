//! Infrastructure layer for stepflow.
//!
//! Implements the ports defined in `stepflow-core`: SQLite storage for
//! definitions and execution snapshots, a reqwest-backed HTTP client, an HTTP
//! agent gateway, a logging notifier, and the `config.toml` loader.

pub mod agent;
pub mod config;
pub mod http;
pub mod notify;
pub mod sqlite;
