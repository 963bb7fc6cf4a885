//! Operations exposed to the surrounding application.

use super::aggregator::ProgressAggregator;
use super::error::{ScanError, ScanResult};
use super::expansion::{plan_tasks, ExpansionRequest};
use super::key_pool::KeyPool;
use super::models::{BatchStats, Profile, ScanStatus, StoredCredential};
use super::retry_policy::RetryPolicy;
use super::store::{BeginBatchOutcome, ScanStore};
use super::time::TimeProvider;
use crate::config::ScanSchedulerSettings;
use crate::server::metrics;
use std::sync::Arc;
use tracing::{error, info};

/// Fields of a new profile.
#[derive(Debug, Clone, Default)]
pub struct NewProfile {
    pub owner_id: String,
    pub name: String,
    pub industries: Vec<String>,
    pub roles: Vec<String>,
    pub locations: Vec<String>,
}

/// Fields of a new owner credential. `encrypted_key` is already encrypted.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub owner_id: String,
    pub encrypted_key: String,
    pub daily_limit: i64,
    pub is_unlimited: bool,
}

pub struct ScanManager {
    store: Arc<dyn ScanStore>,
    aggregator: Arc<ProgressAggregator>,
    key_pool: Arc<KeyPool>,
    clock: Arc<dyn TimeProvider>,
    api_name: String,
    max_tasks_per_batch: usize,
    retry_policy: RetryPolicy,
}

impl ScanManager {
    pub fn new(
        store: Arc<dyn ScanStore>,
        aggregator: Arc<ProgressAggregator>,
        key_pool: Arc<KeyPool>,
        clock: Arc<dyn TimeProvider>,
        settings: &ScanSchedulerSettings,
    ) -> Self {
        Self {
            store,
            aggregator,
            key_pool,
            clock,
            api_name: settings.api_name.clone(),
            max_tasks_per_batch: settings.max_tasks_per_batch,
            retry_policy: RetryPolicy::new(settings),
        }
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    pub fn create_profile(&self, new: NewProfile) -> ScanResult<Profile> {
        let profile = Profile::new(
            uuid::Uuid::new_v4().to_string(),
            new.owner_id,
            new.name,
            new.industries,
            new.roles,
            new.locations,
            self.clock.now(),
        );
        self.store.insert_profile(&profile)?;
        info!("Created profile {} for owner {}", profile.id, profile.owner_id);
        Ok(profile)
    }

    pub fn get_profile(&self, profile_id: &str) -> ScanResult<Profile> {
        self.store
            .get_profile(profile_id)?
            .ok_or_else(|| ScanError::ProfileNotFound(profile_id.to_string()))
    }

    // =========================================================================
    // Scan lifecycle
    // =========================================================================

    /// Start a new scan: opens a batch (superseding the previous one) and
    /// moves the profile to `scanning`. Rejected while a scan is running.
    pub fn begin_scan(&self, profile_id: &str) -> ScanResult<String> {
        let batch_id = uuid::Uuid::new_v4().to_string();
        match self
            .store
            .begin_batch(profile_id, &batch_id, self.clock.now())?
        {
            BeginBatchOutcome::Started => {
                info!("Profile {} scanning with batch {}", profile_id, batch_id);
                metrics::record_profile_transition(ScanStatus::Scanning.as_str());
                Ok(batch_id)
            }
            BeginBatchOutcome::ProfileNotFound => {
                Err(ScanError::ProfileNotFound(profile_id.to_string()))
            }
            BeginBatchOutcome::AlreadyRunning(status) => Err(ScanError::ScanInProgress {
                profile_id: profile_id.to_string(),
                status,
            }),
        }
    }

    /// Plan and enqueue the background tasks of `batch_id`, moving the
    /// profile to `expanding` in the same store transaction. Returns the
    /// number of tasks enqueued.
    ///
    /// With nothing to search the profile completes immediately. If the
    /// tasks cannot be stored the profile moves to `failed`.
    pub fn start_expansion(
        &self,
        profile_id: &str,
        batch_id: &str,
        request: &ExpansionRequest,
    ) -> ScanResult<usize> {
        let profile = self.get_profile(profile_id)?;
        if profile.scan_batch_id.as_deref() != Some(batch_id) {
            return Err(ScanError::BatchNotFound(batch_id.to_string()));
        }
        if !profile.scan_status.can_transition_to(ScanStatus::Expanding) {
            return Err(ScanError::InvalidState {
                expected: ScanStatus::Scanning,
                actual: profile.scan_status,
            });
        }

        let tasks = plan_tasks(request, self.max_tasks_per_batch);
        let now = self.clock.now();

        let enqueued = match self.store.enqueue_expansion(
            profile_id,
            batch_id,
            &tasks,
            self.retry_policy.max_attempts,
            now,
        ) {
            Ok(enqueued) => enqueued,
            Err(e) => {
                error!("Failed to enqueue tasks for batch {}: {:#}", batch_id, e);
                let message = format!("Enqueue failed: {}", e);
                match self
                    .store
                    .mark_profile_failed(profile_id, batch_id, &message, now)
                {
                    Ok(true) => metrics::record_profile_transition(ScanStatus::Failed.as_str()),
                    Ok(false) => {}
                    Err(mark_err) => error!(
                        "Could not mark profile {} failed: {:#}",
                        profile_id, mark_err
                    ),
                }
                return Err(ScanError::EnqueueFailure {
                    batch_id: batch_id.to_string(),
                    message: e.to_string(),
                });
            }
        };
        let Some(task_ids) = enqueued else {
            let actual = self.get_profile(profile_id)?.scan_status;
            return Err(ScanError::InvalidState {
                expected: ScanStatus::Scanning,
                actual,
            });
        };
        metrics::record_profile_transition(ScanStatus::Expanding.as_str());

        if task_ids.is_empty() {
            info!("Profile {} has nothing to expand", profile_id);
            self.aggregator.finalize_if_done(profile_id, batch_id)?;
            return Ok(0);
        }

        metrics::record_tasks_enqueued(task_ids.len());
        info!(
            "Profile {} expanding: {} tasks enqueued for batch {}",
            profile_id,
            task_ids.len(),
            batch_id
        );
        Ok(task_ids.len())
    }

    pub fn get_batch_stats(&self, profile_id: &str, batch_id: &str) -> ScanResult<BatchStats> {
        match self.store.get_batch(batch_id)? {
            Some(batch) if batch.profile_id == profile_id => Ok(self.store.batch_stats(batch_id)?),
            _ => Err(ScanError::BatchNotFound(batch_id.to_string())),
        }
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    /// Store an owner credential. Returns its id and the owner's resulting
    /// number of profile slots.
    pub fn register_credential(&self, new: NewCredential) -> ScanResult<(String, usize)> {
        let credential = StoredCredential {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: new.owner_id,
            api_name: self.api_name.clone(),
            encrypted_key: new.encrypted_key,
            daily_limit: new.daily_limit,
            is_active: true,
            is_unlimited: new.is_unlimited,
            created_at: self.clock.now(),
        };
        self.store.insert_credential(&credential)?;
        let slots = self
            .key_pool
            .allowed_profile_slots(&credential.owner_id, &self.api_name)?;
        info!(
            "Registered credential {} for owner {} ({} profile slots)",
            credential.id, credential.owner_id, slots
        );
        Ok((credential.id, slots))
    }

    /// Calls left today across the whole pool.
    pub fn budget_remaining(&self) -> ScanResult<i64> {
        Ok(self.key_pool.pool_remaining(&self.api_name)?)
    }

    pub fn api_name(&self) -> &str {
        &self.api_name
    }
}
