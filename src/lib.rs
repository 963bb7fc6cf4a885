//! Budget-aware background scan scheduler
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod scan;
pub mod search_client;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use scan::{ScanManager, SqliteScanStore, TaskExecutor};
pub use server::{make_app, run_server, RequestsLoggingLevel};
