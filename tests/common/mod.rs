//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestClient, TestServer};
//!
//! #[tokio::test]
//! async fn test_health() {
//!     let server = TestServer::spawn(100).await;
//!     let client = TestClient::new(server.base_url.clone());
//!     assert!(client.health().await.status().is_success());
//! }
//! ```

#![allow(dead_code)]

mod client;
mod constants;
mod fixtures;
mod server;

pub use client::TestClient;
pub use constants::*;
pub use fixtures::{berlin_only_request, FailingStore, Scheduler, StoreFault, StubSearch};
pub use server::TestServer;
