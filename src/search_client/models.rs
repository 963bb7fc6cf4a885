use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One (keywords, location) query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchRequest {
    pub keywords: String,
    pub location: String,
    /// Only postings newer than this many days
    pub posted_within_days: u32,
}

/// A job posting returned by the search API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub id: String,
    pub title: String,
    pub company: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Unix timestamp
    #[serde(default)]
    pub posted_at: Option<i64>,
}

/// Response envelope of the search API.
#[derive(Debug, Deserialize)]
pub(super) struct SearchResponse {
    #[serde(default)]
    pub data: Vec<JobResult>,
}

#[derive(Debug, Error)]
pub enum SearchError {
    /// The API refused the call because of its own rate limiting
    #[error("Search API rate limited the request")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
