//! Scheduler wiring and collaborators shared by the tests
//!
//! `Scheduler::build` assembles the same graph `main` does, with an
//! in-memory store, a manual clock, and a scripted search collaborator.

use super::constants::*;
use anyhow::{bail, Result};
use async_trait::async_trait;
use scan_scheduler::config::ScanSchedulerSettings;
use scan_scheduler::scan::expansion::EXPANSION_LOCATIONS;
use scan_scheduler::scan::{
    BatchStats, BeginBatchOutcome, BudgetLedger, ExpansionRequest, KeyPool, ManualTimeProvider,
    NewScanTask, PlaintextCredentialCipher, Profile, ProgressAggregator, ProgressDelta,
    ReclaimedTasks, ScanBatch, ScanManager, ScanStore, ScanTask, SharedCredential,
    SqliteScanStore, StoredCredential, TaskExecutor, TaskFailureOutcome,
};
use scan_scheduler::search_client::{
    DistinctCompanySignals, JobResult, JobSearch, SearchError, SearchRequest,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Search collaborator
// ============================================================================

/// Answers by keyword: `fail*` is a network error, `throttle*` is rate
/// limited, anything else returns `JOBS_PER_CALL` jobs at two companies.
#[derive(Default)]
pub struct StubSearch {
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl StubSearch {
    /// (keywords, api key) of every call made, in order
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobSearch for StubSearch {
    async fn search(
        &self,
        request: &SearchRequest,
        api_key: Option<&str>,
    ) -> Result<Vec<JobResult>, SearchError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.keywords.clone(), api_key.map(str::to_string)));

        if request.keywords.starts_with(FAILING_KEYWORD_PREFIX) {
            return Err(SearchError::Network("connection reset".to_string()));
        }
        if request.keywords.starts_with(THROTTLED_KEYWORD_PREFIX) {
            return Err(SearchError::RateLimited);
        }
        Ok((0..JOBS_PER_CALL)
            .map(|i| JobResult {
                id: format!("{}-{}-{}", request.keywords, request.location, i),
                title: request.keywords.clone(),
                company: format!("Company {}", i),
                location: Some(request.location.clone()),
                url: None,
                posted_at: None,
            })
            .collect())
    }
}

// ============================================================================
// Scheduler graph
// ============================================================================

pub struct Scheduler {
    pub store: Arc<dyn ScanStore>,
    pub clock: Arc<ManualTimeProvider>,
    pub search: Arc<StubSearch>,
    pub key_pool: Arc<KeyPool>,
    pub executor: Arc<TaskExecutor>,
    pub manager: Arc<ScanManager>,
}

impl Scheduler {
    pub fn new(shared_daily_limit: i64) -> Self {
        let store = Arc::new(SqliteScanStore::in_memory().expect("Failed to open scan store"));
        Self::build(store, shared_daily_limit)
    }

    pub fn build(store: Arc<dyn ScanStore>, shared_daily_limit: i64) -> Self {
        let settings = ScanSchedulerSettings {
            default_daily_limit: shared_daily_limit,
            ..Default::default()
        };
        let clock = Arc::new(ManualTimeProvider::new(NOW));
        let ledger = Arc::new(BudgetLedger::new(store.clone(), clock.clone()));
        let key_pool = Arc::new(KeyPool::new(
            store.clone(),
            ledger,
            Arc::new(PlaintextCredentialCipher),
            SharedCredential {
                api_key: Some("shared-key".to_string()),
                daily_limit: Some(settings.default_daily_limit),
            },
        ));
        let search = Arc::new(StubSearch::default());
        let aggregator = Arc::new(ProgressAggregator::new(store.clone(), clock.clone()));
        let executor = Arc::new(TaskExecutor::new(
            store.clone(),
            key_pool.clone(),
            search.clone(),
            Arc::new(DistinctCompanySignals),
            aggregator.clone(),
            clock.clone(),
            &settings,
        ));
        let manager = Arc::new(ScanManager::new(
            store.clone(),
            aggregator,
            key_pool.clone(),
            clock.clone(),
            &settings,
        ));

        Self {
            store,
            clock,
            search,
            key_pool,
            executor,
            manager,
        }
    }
}

/// Expansion request that plans exactly one role-variation task per role,
/// all in Berlin.
pub fn berlin_only_request(roles: &[&str]) -> ExpansionRequest {
    ExpansionRequest {
        roles: roles.iter().map(|r| r.to_string()).collect(),
        user_locations: vec!["Berlin".to_string()],
        searched_locations: EXPANSION_LOCATIONS.iter().map(|l| l.to_string()).collect(),
        ..Default::default()
    }
}

// ============================================================================
// Store with injected failures
// ============================================================================

/// Which store operation refuses to work.
pub enum StoreFault {
    /// Bulk task insert always fails
    Enqueue,
    /// Completing an expanding profile always fails
    Finalize,
    /// The next task completion fails, later ones succeed
    CompletionOnce,
}

/// Delegates to a real in-memory store, failing the operation named by
/// its fault with a storage error.
pub struct FailingStore {
    inner: SqliteScanStore,
    fault: StoreFault,
    tripped: AtomicBool,
}

impl FailingStore {
    pub fn new(fault: StoreFault) -> Self {
        Self {
            inner: SqliteScanStore::in_memory().expect("Failed to open scan store"),
            fault,
            tripped: AtomicBool::new(false),
        }
    }
}

impl ScanStore for FailingStore {
    fn insert_profile(&self, profile: &Profile) -> Result<()> {
        self.inner.insert_profile(profile)
    }

    fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        self.inner.get_profile(id)
    }

    fn begin_batch(&self, profile_id: &str, batch_id: &str, now: i64) -> Result<BeginBatchOutcome> {
        self.inner.begin_batch(profile_id, batch_id, now)
    }

    fn enqueue_expansion(
        &self,
        profile_id: &str,
        batch_id: &str,
        tasks: &[NewScanTask],
        max_attempts: i32,
        now: i64,
    ) -> Result<Option<Vec<String>>> {
        if matches!(self.fault, StoreFault::Enqueue) {
            bail!("disk I/O error");
        }
        self.inner
            .enqueue_expansion(profile_id, batch_id, tasks, max_attempts, now)
    }

    fn expanding_profiles(&self) -> Result<Vec<(String, String)>> {
        self.inner.expanding_profiles()
    }

    fn complete_if_done(&self, profile_id: &str, batch_id: &str, now: i64) -> Result<bool> {
        if matches!(self.fault, StoreFault::Finalize) {
            bail!("disk I/O error");
        }
        self.inner.complete_if_done(profile_id, batch_id, now)
    }

    fn mark_profile_failed(
        &self,
        profile_id: &str,
        batch_id: &str,
        error: &str,
        now: i64,
    ) -> Result<bool> {
        self.inner.mark_profile_failed(profile_id, batch_id, error, now)
    }

    fn get_batch(&self, batch_id: &str) -> Result<Option<ScanBatch>> {
        self.inner.get_batch(batch_id)
    }

    fn batch_stats(&self, batch_id: &str) -> Result<BatchStats> {
        self.inner.batch_stats(batch_id)
    }

    fn count_open_tasks(&self, batch_id: &str) -> Result<i64> {
        self.inner.count_open_tasks(batch_id)
    }

    fn get_task(&self, task_id: &str) -> Result<Option<ScanTask>> {
        self.inner.get_task(task_id)
    }

    fn claim_next(&self, limit: usize, remaining_budget: i64, now: i64) -> Result<Vec<ScanTask>> {
        self.inner.claim_next(limit, remaining_budget, now)
    }

    fn mark_processing(&self, task_id: &str, now: i64) -> Result<Option<ScanTask>> {
        self.inner.mark_processing(task_id, now)
    }

    fn mark_completed(
        &self,
        task_id: &str,
        jobs_found: i64,
        delta: &ProgressDelta,
        now: i64,
    ) -> Result<bool> {
        if matches!(self.fault, StoreFault::CompletionOnce)
            && !self.tripped.swap(true, Ordering::SeqCst)
        {
            bail!("disk I/O error");
        }
        self.inner.mark_completed(task_id, jobs_found, delta, now)
    }

    fn mark_failed(
        &self,
        task_id: &str,
        error_message: &str,
        retry_at: i64,
        now: i64,
    ) -> Result<Option<TaskFailureOutcome>> {
        self.inner.mark_failed(task_id, error_message, retry_at, now)
    }

    fn release(&self, task_id: &str) -> Result<bool> {
        self.inner.release(task_id)
    }

    fn mark_skipped(&self, task_id: &str, now: i64) -> Result<bool> {
        self.inner.mark_skipped(task_id, now)
    }

    fn reclaim_stale(&self, started_before: i64, now: i64) -> Result<ReclaimedTasks> {
        self.inner.reclaim_stale(started_before, now)
    }

    fn try_consume_budget(
        &self,
        api_name: &str,
        credential_key: &str,
        budget_date: &str,
        limit: Option<i64>,
        now: i64,
    ) -> Result<Option<i64>> {
        self.inner
            .try_consume_budget(api_name, credential_key, budget_date, limit, now)
    }

    fn budget_used(&self, api_name: &str, credential_key: &str, budget_date: &str) -> Result<i64> {
        self.inner.budget_used(api_name, credential_key, budget_date)
    }

    fn insert_credential(&self, credential: &StoredCredential) -> Result<()> {
        self.inner.insert_credential(credential)
    }

    fn active_credentials_for_owner(
        &self,
        owner_id: &str,
        api_name: &str,
    ) -> Result<Vec<StoredCredential>> {
        self.inner.active_credentials_for_owner(owner_id, api_name)
    }

    fn active_credentials(&self, api_name: &str) -> Result<Vec<StoredCredential>> {
        self.inner.active_credentials(api_name)
    }
}
