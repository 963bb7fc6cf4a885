//! External job search collaborator.
//!
//! The scheduler only sees the [`JobSearch`] trait; [`HttpJobSearchClient`]
//! is the JSON-over-HTTP adapter used in production.

mod client;
mod models;
mod signals;

pub use client::HttpJobSearchClient;
pub use models::{JobResult, SearchError, SearchRequest};
pub use signals::{DistinctCompanySignals, SignalSink};

use async_trait::async_trait;

#[async_trait]
pub trait JobSearch: Send + Sync {
    /// Run one search with the given API key (None when the API needs none).
    async fn search(
        &self,
        request: &SearchRequest,
        api_key: Option<&str>,
    ) -> Result<Vec<JobResult>, SearchError>;
}
