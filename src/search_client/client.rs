//! HTTP client for the external job search API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use super::models::{JobResult, SearchError, SearchRequest, SearchResponse};
use super::JobSearch;

/// Header carrying the API key.
const API_KEY_HEADER: &str = "X-Api-Key";

pub struct HttpJobSearchClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobSearchClient {
    /// Create a new search client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the search API (e.g., "https://jobs.example.com/api")
    /// * `timeout_sec` - Request timeout in seconds
    pub fn new(base_url: String, timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl JobSearch for HttpJobSearchClient {
    async fn search(
        &self,
        request: &SearchRequest,
        api_key: Option<&str>,
    ) -> Result<Vec<JobResult>, SearchError> {
        let url = format!("{}/search", self.base_url);
        let days = request.posted_within_days.to_string();
        let mut builder = self.client.get(&url).query(&[
            ("query", request.keywords.as_str()),
            ("location", request.location.as_str()),
            ("posted_within_days", days.as_str()),
        ]);
        if let Some(key) = api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SearchError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SearchError::RateLimited);
        }
        if status.is_server_error() {
            return Err(SearchError::Network(format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(SearchError::InvalidResponse(format!("status {}", status)));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;
        Ok(body.data)
    }
}
