//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own in-memory scheduler.

use super::constants::*;
use super::fixtures::Scheduler;
use scan_scheduler::server::{make_app, metrics, RequestsLoggingLevel, ServerConfig};
use std::time::Duration;
use tokio::net::TcpListener;

/// Test server instance backed by a fresh `Scheduler`
///
/// When dropped, the server gracefully shuts down.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Scheduler behind the routes, for direct inspection in tests
    pub scheduler: Scheduler,

    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if port binding fails or the server doesn't become ready
    /// within timeout.
    pub async fn spawn(shared_daily_limit: i64) -> Self {
        metrics::init_metrics();
        let scheduler = Scheduler::new(shared_daily_limit);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
        };
        let app = make_app(
            config,
            scheduler.manager.clone(),
            scheduler.executor.clone(),
        );

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            scheduler,
            _shutdown_tx: Some(shutdown_tx),
        };
        server.wait_for_ready().await;
        server
    }

    /// Polls /health until the server answers
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
