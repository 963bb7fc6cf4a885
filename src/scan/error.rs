use thiserror::Error;

use super::models::ScanStatus;

/// Errors surfaced by the scan scheduler.
#[derive(Debug, Error)]
pub enum ScanError {
    /// No credential has budget left today. Work is deferred, not failed.
    #[error("Daily budget exhausted for {api_name}")]
    BudgetExhausted { api_name: String },

    #[error("Task {task_id} failed, will retry: {message}")]
    TaskTransientFailure { task_id: String, message: String },

    #[error("Task {task_id} failed permanently: {message}")]
    TaskPermanentFailure { task_id: String, message: String },

    /// The budget ledger could not be read or written. Admission fails open.
    #[error("Budget ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("Failed to enqueue tasks for batch {batch_id}: {message}")]
    EnqueueFailure { batch_id: String, message: String },

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("A scan is already running for profile {profile_id} ({status:?})")]
    ScanInProgress {
        profile_id: String,
        status: ScanStatus,
    },

    #[error("Invalid scan state: expected {expected:?}, got {actual:?}")]
    InvalidState {
        expected: ScanStatus,
        actual: ScanStatus,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type ScanResult<T> = Result<T, ScanError>;
