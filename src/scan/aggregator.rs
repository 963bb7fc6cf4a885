//! Merges task outcomes into profile progress and drives the
//! `expanding -> completed` transition.

use super::error::{ScanError, ScanResult};
use super::models::{ProgressDelta, ScanStatus, ScanTask, TaskFailureOutcome};
use super::store::ScanStore;
use super::time::TimeProvider;
use crate::server::metrics;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct ProgressAggregator {
    store: Arc<dyn ScanStore>,
    clock: Arc<dyn TimeProvider>,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn ScanStore>, clock: Arc<dyn TimeProvider>) -> Self {
        Self { store, clock }
    }

    /// Complete a processing task and merge `delta` into the progress of the
    /// profile whose current batch is the task's. Both happen in one store
    /// transaction; outcomes of superseded batches are dropped. Finalizes the
    /// batch when this was its last open task.
    ///
    /// Returns false if the task was no longer processing.
    pub fn apply_task_outcome(
        &self,
        task: &ScanTask,
        jobs_found: i64,
        delta: &ProgressDelta,
    ) -> ScanResult<bool> {
        let now = self.clock.now();
        if !self.store.mark_completed(&task.id, jobs_found, delta, now)? {
            warn!("Task {} was no longer processing on completion", task.id);
            return Ok(false);
        }
        self.finalize_after(task);
        Ok(true)
    }

    /// Record a failed attempt. The task is retried at `retry_at` or, with
    /// no attempts left, fails terminally and counts as done in the
    /// profile's progress.
    pub fn apply_task_failure(
        &self,
        task: &ScanTask,
        error_message: &str,
        retry_at: i64,
    ) -> ScanResult<Option<TaskFailureOutcome>> {
        let now = self.clock.now();
        let outcome = self
            .store
            .mark_failed(&task.id, error_message, retry_at, now)?;
        if outcome == Some(TaskFailureOutcome::Failed) {
            self.finalize_after(task);
        }
        Ok(outcome)
    }

    /// A finalize failure has already failed the profile, so it does not
    /// abort the caller.
    fn finalize_after(&self, task: &ScanTask) {
        if let Err(e) = self.finalize_if_done(&task.profile_id, &task.batch_id) {
            debug!("Finalize after task {} failed: {}", task.id, e);
        }
    }

    /// Complete the profile once its current batch has no open tasks.
    ///
    /// Idempotent: only the call that performs the transition returns true.
    /// A storage failure moves the profile to `failed`.
    pub fn finalize_if_done(&self, profile_id: &str, batch_id: &str) -> ScanResult<bool> {
        let now = self.clock.now();
        match self.store.complete_if_done(profile_id, batch_id, now) {
            Ok(true) => {
                info!(
                    "Profile {} completed expansion batch {}",
                    profile_id, batch_id
                );
                metrics::record_profile_transition(ScanStatus::Completed.as_str());
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                error!(
                    "Failed to finalize batch {} of profile {}: {:#}",
                    batch_id, profile_id, e
                );
                let message = format!("Finalize failed: {}", e);
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
                Err(ScanError::Storage(e))
            }
        }
    }

    /// Finalize every `expanding` profile whose current batch has no open
    /// tasks left. Picks up batches whose last outcome was recorded but
    /// never finalized. Returns the number of profiles completed.
    pub fn finalize_stranded(&self) -> ScanResult<usize> {
        let mut finalized = 0;
        for (profile_id, batch_id) in self.store.expanding_profiles()? {
            if self.store.count_open_tasks(&batch_id)? > 0 {
                continue;
            }
            match self.finalize_if_done(&profile_id, &batch_id) {
                Ok(true) => finalized += 1,
                Ok(false) => {}
                Err(e) => debug!("Sweep could not finalize profile {}: {}", profile_id, e),
            }
        }
        if finalized > 0 {
            info!("Finalized {} stranded expanding profiles", finalized);
        }
        Ok(finalized)
    }
}
