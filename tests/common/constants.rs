//! Shared constants for integration and end-to-end tests

// ============================================================================
// Clock
// ============================================================================

/// 2026-03-01T12:00:00Z
pub const NOW: i64 = 1_772_366_400;

/// Budget day of `NOW`
pub const TODAY: &str = "2026-03-01";

/// Default retry delay, in seconds
pub const RETRY_BACKOFF_SECS: i64 = 900;

// ============================================================================
// Scheduler
// ============================================================================

pub const API_NAME: &str = "jobs_search";

pub const OWNER_ID: &str = "owner-1";

/// Jobs returned by the stub search for every successful call
pub const JOBS_PER_CALL: i64 = 2;

/// Keyword prefix the stub search answers with a network error
pub const FAILING_KEYWORD_PREFIX: &str = "fail";

/// Keyword prefix the stub search answers with rate limiting
pub const THROTTLED_KEYWORD_PREFIX: &str = "throttle";

// ============================================================================
// Server
// ============================================================================

pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

pub const REQUEST_TIMEOUT_SECS: u64 = 10;
