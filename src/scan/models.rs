//! Data models for the scan scheduler.
//!
//! Profiles, batches, tasks, progress counters and the budget/credential
//! records the executor works with.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a profile's background scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Idle,
    Scanning,
    Expanding,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Idle => "idle",
            ScanStatus::Scanning => "scanning",
            ScanStatus::Expanding => "expanding",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(ScanStatus::Idle),
            "scanning" => Some(ScanStatus::Scanning),
            "expanding" => Some(ScanStatus::Expanding),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            _ => None,
        }
    }

    /// Edges of the profile state machine. A running scan (`scanning` or
    /// `expanding`) cannot be restarted.
    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        use ScanStatus::*;
        match (self, next) {
            (Idle | Completed | Failed, Scanning) => true,
            (Scanning, Expanding) => true,
            (Scanning | Expanding, Failed) => true,
            (Expanding, Completed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Active,
    Completed,
    Failed,
    Superseded,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Active => "active",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Superseded => "superseded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(BatchStatus::Active),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            "superseded" => Some(BatchStatus::Superseded),
            _ => None,
        }
    }
}

/// Which expansion rule produced a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    RoleVariation,
    ExpandedLocation,
    IndustrySearch,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::RoleVariation => "role_variation",
            TaskType::ExpandedLocation => "expanded_location",
            TaskType::IndustrySearch => "industry_search",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "role_variation" => Some(TaskType::RoleVariation),
            "expanded_location" => Some(TaskType::ExpandedLocation),
            "industry_search" => Some(TaskType::IndustrySearch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed, // terminal
    Failed,    // terminal
    Skipped,   // terminal, batch was superseded
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "skipped" => Some(TaskStatus::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

/// Claim priority. Higher values are claimed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    Expansion = 0,
    UserCriteria = 1,
}

impl TaskPriority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(TaskPriority::Expansion),
            1 => Some(TaskPriority::UserCriteria),
            _ => None,
        }
    }
}

/// Cumulative progress of a profile's current batch, denormalized on the profile row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub jobs_found: i64,
    pub companies_found: i64,
    pub signals_generated: i64,
    pub tasks_pending: i64,
    pub tasks_completed: i64,
    pub last_updated: Option<i64>,
}

/// Incremental update to a [`ScanProgress`].
///
/// Counts are added to the current totals. `tasks_completed` also moves the
/// same number of units out of `tasks_pending`. Timestamps replace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressDelta {
    pub jobs_found: Option<i64>,
    pub companies_found: Option<i64>,
    pub signals_generated: Option<i64>,
    pub tasks_completed: Option<i64>,
    pub last_updated: Option<i64>,
}

impl ProgressDelta {
    /// Delta for one task reaching a terminal state with nothing found.
    pub fn task_finished(now: i64) -> Self {
        Self {
            tasks_completed: Some(1),
            last_updated: Some(now),
            ..Default::default()
        }
    }

    pub fn with_results(mut self, jobs: i64, companies: i64, signals: i64) -> Self {
        self.jobs_found = Some(jobs);
        self.companies_found = Some(companies);
        self.signals_generated = Some(signals);
        self
    }
}

impl ScanProgress {
    /// Progress at the start of an expansion run with `task_count` tasks.
    /// Totals from the synchronous first pass are kept.
    pub fn start_expansion(&self, task_count: i64, now: i64) -> Self {
        Self {
            tasks_pending: task_count,
            tasks_completed: 0,
            last_updated: Some(now),
            ..self.clone()
        }
    }

    pub fn merge(&mut self, delta: &ProgressDelta) {
        self.jobs_found += delta.jobs_found.unwrap_or(0);
        self.companies_found += delta.companies_found.unwrap_or(0);
        self.signals_generated += delta.signals_generated.unwrap_or(0);
        if let Some(done) = delta.tasks_completed {
            let moved = done.min(self.tasks_pending).max(0);
            self.tasks_pending -= moved;
            self.tasks_completed += moved;
        }
        if delta.last_updated.is_some() {
            self.last_updated = delta.last_updated;
        }
    }
}

/// A user-defined search target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub industries: Vec<String>,
    pub roles: Vec<String>,
    pub locations: Vec<String>,
    pub scan_status: ScanStatus,
    /// Current batch, None until the first scan is triggered
    pub scan_batch_id: Option<String>,
    pub scan_progress: ScanProgress,
    /// Stamped when an expansion run completes
    pub last_synced_at: Option<i64>,
    pub scan_error: Option<String>,
    pub created_at: i64,
}

impl Profile {
    pub fn new(
        id: String,
        owner_id: String,
        name: String,
        industries: Vec<String>,
        roles: Vec<String>,
        locations: Vec<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            owner_id,
            name,
            industries,
            roles,
            locations,
            scan_status: ScanStatus::Idle,
            scan_batch_id: None,
            scan_progress: ScanProgress::default(),
            last_synced_at: None,
            scan_error: None,
            created_at,
        }
    }
}

/// One expansion run. Batches are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanBatch {
    pub id: String,
    pub profile_id: String,
    pub status: BatchStatus,
    pub total_tasks: i64,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// A task to be inserted by [`enqueue`](super::store::ScanStore::enqueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScanTask {
    pub task_type: TaskType,
    pub keywords: String,
    pub location: String,
    pub priority: TaskPriority,
}

impl NewScanTask {
    pub fn new(
        task_type: TaskType,
        keywords: impl Into<String>,
        location: impl Into<String>,
        priority: TaskPriority,
    ) -> Self {
        Self {
            task_type,
            keywords: keywords.into(),
            location: location.into(),
            priority,
        }
    }
}

/// One (keywords, location) unit of deferred search work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTask {
    pub id: String,
    pub batch_id: String,
    pub profile_id: String,
    pub task_type: TaskType,
    pub keywords: String,
    pub location: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    /// Not claimable before this Unix timestamp
    pub scheduled_for: i64,
    pub jobs_found: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// Stale processing tasks recovered by `reclaim_stale`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimedTasks {
    /// Back to pending, keeping the attempt they used
    pub requeued: usize,
    /// Attempts exhausted, now terminal
    pub failed: usize,
}

/// What `mark_failed` did with a processing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFailureOutcome {
    /// Back to pending, claimable again at `scheduled_for`
    Retrying { scheduled_for: i64 },
    /// Attempts exhausted, terminal
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub jobs_found: i64,
}

/// Owner-scoped API credential. `encrypted_key` is base64 RSA-OAEP ciphertext.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub id: String,
    pub owner_id: String,
    pub api_name: String,
    pub encrypted_key: String,
    pub daily_limit: i64,
    pub is_active: bool,
    pub is_unlimited: bool,
    pub created_at: i64,
}

impl StoredCredential {
    /// Limit as seen by the budget ledger, None when unlimited.
    pub fn effective_limit(&self) -> Option<i64> {
        if self.is_unlimited {
            None
        } else {
            Some(self.daily_limit)
        }
    }
}

/// A credential chosen by the key pool, ready to be used.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialInfo {
    /// None for the shared default credential
    pub credential_id: Option<String>,
    /// Decrypted API key. None when the shared default has no key configured.
    pub api_key: Option<String>,
    pub daily_limit: Option<i64>,
}

impl CredentialInfo {
    pub fn is_shared_default(&self) -> bool {
        self.credential_id.is_none()
    }
}

impl std::fmt::Debug for CredentialInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialInfo")
            .field("credential_id", &self.credential_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("daily_limit", &self.daily_limit)
            .finish()
    }
}

/// Result of a budget admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub remaining: i64,
    pub used: i64,
}

/// Summary of one executor cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
    pub released: usize,
    /// Stale processing tasks recovered at the start of the cycle
    pub reclaimed: usize,
    /// Expanding profiles completed by the start-of-cycle sweep
    pub finalized: usize,
    /// The cycle stopped early: no budget, no key, or upstream rate limiting
    pub stopped_early: bool,
}
