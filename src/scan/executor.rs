//! Drains claimable scan tasks within the available budget.

use super::aggregator::ProgressAggregator;
use super::error::{ScanError, ScanResult};
use super::key_pool::KeyPool;
use super::models::{CycleReport, ProgressDelta, ScanStatus, ScanTask, TaskFailureOutcome};
use super::retry_policy::RetryPolicy;
use super::store::ScanStore;
use super::time::TimeProvider;
use crate::config::ScanSchedulerSettings;
use crate::search_client::{DistinctCompanySignals, JobSearch, SearchError, SearchRequest, SignalSink};
use crate::server::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to one claimed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskRun {
    Completed,
    Retrying { rate_limited: bool },
    Failed { rate_limited: bool },
    Skipped,
    /// No key or no budget; the task goes back to pending untouched
    Deferred,
}

impl TaskRun {
    fn stops_cycle(&self) -> bool {
        matches!(
            self,
            TaskRun::Deferred
                | TaskRun::Retrying { rate_limited: true }
                | TaskRun::Failed { rate_limited: true }
        )
    }
}

/// Runs executor cycles. Holds no state between cycles, so overlapping
/// invocations only compete through the store's atomic claims.
pub struct TaskExecutor {
    store: Arc<dyn ScanStore>,
    key_pool: Arc<KeyPool>,
    searcher: Arc<dyn JobSearch>,
    signals: Arc<dyn SignalSink>,
    aggregator: Arc<ProgressAggregator>,
    retry_policy: RetryPolicy,
    clock: Arc<dyn TimeProvider>,
    api_name: String,
    claim_batch_size: usize,
    posted_within_days: u32,
    stale_in_progress_threshold_secs: i64,
}

impl TaskExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ScanStore>,
        key_pool: Arc<KeyPool>,
        searcher: Arc<dyn JobSearch>,
        signals: Arc<dyn SignalSink>,
        aggregator: Arc<ProgressAggregator>,
        clock: Arc<dyn TimeProvider>,
        settings: &ScanSchedulerSettings,
    ) -> Self {
        Self {
            store,
            key_pool,
            searcher,
            signals,
            aggregator,
            retry_policy: RetryPolicy::new(settings),
            clock,
            api_name: settings.api_name.clone(),
            claim_batch_size: settings.claim_batch_size,
            posted_within_days: settings.posted_within_days,
            stale_in_progress_threshold_secs: settings.stale_in_progress_threshold_secs as i64,
        }
    }

    /// Claim a small batch of due tasks (capped by the pool's remaining
    /// budget) and run them one by one.
    ///
    /// Before claiming, tasks stuck in `processing` past the stale threshold
    /// are recovered and expanding profiles with nothing left open are
    /// finalized.
    ///
    /// The cycle stops early when no credential has budget, or when the
    /// search API reports rate limiting. Tasks not yet run are released.
    pub async fn run_cycle(&self) -> ScanResult<CycleReport> {
        let started = Instant::now();
        let result = self.run_cycle_inner().await;
        let label = match &result {
            Ok(report) if report.stopped_early => "stopped_early",
            Ok(_) => "ok",
            Err(_) => "error",
        };
        metrics::record_executor_cycle(label, started.elapsed());
        result
    }

    /// Periodic trigger loop - call from a spawned task.
    ///
    /// Runs one cycle per tick until `shutdown` is cancelled. A cycle in
    /// flight is finished before the loop exits.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        info!("Scan ticker starting (interval={}s)", interval.as_secs());

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }
            if let Err(e) = self.run_cycle().await {
                error!("Scan cycle failed: {}", e);
            }
        }

        info!("Scan ticker stopped");
    }

    async fn run_cycle_inner(&self) -> ScanResult<CycleReport> {
        let mut report = CycleReport::default();

        let now = self.clock.now();
        let reclaimed = self
            .store
            .reclaim_stale(now - self.stale_in_progress_threshold_secs, now)?;
        if reclaimed.requeued + reclaimed.failed > 0 {
            warn!(
                "Recovered stale processing tasks: {} requeued, {} failed",
                reclaimed.requeued, reclaimed.failed
            );
            metrics::record_task_outcomes("reclaimed", reclaimed.requeued);
            metrics::record_task_outcomes("failed", reclaimed.failed);
        }
        report.reclaimed = reclaimed.requeued + reclaimed.failed;
        report.finalized = self.aggregator.finalize_stranded()?;

        let remaining = self.key_pool.pool_remaining(&self.api_name)?;
        if remaining <= 0 {
            debug!(
                "{}, skipping cycle",
                ScanError::BudgetExhausted {
                    api_name: self.api_name.clone()
                }
            );
            report.stopped_early = true;
            return Ok(report);
        }

        let claimed = self
            .store
            .claim_next(self.claim_batch_size, remaining, self.clock.now())?;
        report.claimed = claimed.len();
        if claimed.is_empty() {
            return Ok(report);
        }
        debug!("Claimed {} scan tasks", claimed.len());

        let mut tasks = claimed.into_iter();
        while let Some(task) = tasks.next() {
            let run = match self.execute_task(&task).await {
                Ok(run) => run,
                Err(e) => {
                    error!("Executor cycle aborted on task {}: {}", task.id, e);
                    self.release_all(std::iter::once(task).chain(tasks), &mut report);
                    return Err(e);
                }
            };

            match run {
                TaskRun::Completed => report.completed += 1,
                TaskRun::Retrying { .. } => report.retried += 1,
                TaskRun::Failed { .. } => report.failed += 1,
                TaskRun::Skipped => report.skipped += 1,
                TaskRun::Deferred => {
                    self.release_all(std::iter::once(task), &mut report);
                }
            }

            if run.stops_cycle() {
                report.stopped_early = true;
                self.release_all(tasks, &mut report);
                break;
            }
        }

        info!(
            "Scan cycle: claimed {}, completed {}, retried {}, failed {}, skipped {}, released {}, reclaimed {}",
            report.claimed,
            report.completed,
            report.retried,
            report.failed,
            report.skipped,
            report.released,
            report.reclaimed
        );
        Ok(report)
    }

    async fn execute_task(&self, task: &ScanTask) -> ScanResult<TaskRun> {
        let profile = self.store.get_profile(&task.profile_id)?;
        let profile = match profile {
            Some(p)
                if p.scan_batch_id.as_deref() == Some(task.batch_id.as_str())
                    && p.scan_status == ScanStatus::Expanding =>
            {
                p
            }
            _ => {
                debug!(
                    "Task {} belongs to batch {} that is no longer expanding, skipping",
                    task.id, task.batch_id
                );
                self.store.mark_skipped(&task.id, self.clock.now())?;
                metrics::record_task_outcome("skipped");
                return Ok(TaskRun::Skipped);
            }
        };

        let Some(key) = self
            .key_pool
            .next_available_key(&profile.owner_id, &self.api_name)?
        else {
            info!(
                "{}, deferring task {}",
                ScanError::BudgetExhausted {
                    api_name: self.api_name.clone()
                },
                task.id
            );
            return Ok(TaskRun::Deferred);
        };

        let decision = self.key_pool.ledger().try_consume(
            &self.api_name,
            key.credential_id.as_deref(),
            key.daily_limit,
        );
        if !decision.allowed {
            info!(
                "Budget denied for credential {:?}, deferring task {}",
                key.credential_id, task.id
            );
            return Ok(TaskRun::Deferred);
        }

        let request = SearchRequest {
            keywords: task.keywords.clone(),
            location: task.location.clone(),
            posted_within_days: self.posted_within_days,
        };
        let call_started = Instant::now();
        let result = self.searcher.search(&request, key.api_key.as_deref()).await;
        metrics::record_search_call(call_started.elapsed());

        match result {
            Ok(results) => {
                let jobs = results.len() as i64;
                let delta = ProgressDelta::task_finished(self.clock.now()).with_results(
                    jobs,
                    DistinctCompanySignals::distinct_companies(&results),
                    self.signals.signals_for(&task.profile_id, &results),
                );
                if self.aggregator.apply_task_outcome(task, jobs, &delta)? {
                    metrics::record_task_outcome("completed");
                }
                debug!(
                    "Task {} ({} in {}) found {} jobs",
                    task.id, task.keywords, task.location, jobs
                );
                Ok(TaskRun::Completed)
            }
            Err(e) => self.handle_failure(task, e),
        }
    }

    fn handle_failure(&self, task: &ScanTask, e: SearchError) -> ScanResult<TaskRun> {
        let now = self.clock.now();
        let rate_limited = matches!(e, SearchError::RateLimited);
        let message = e.to_string();

        let outcome = self.aggregator.apply_task_failure(
            task,
            &message,
            self.retry_policy.next_attempt_at(now),
        )?;

        match outcome {
            Some(TaskFailureOutcome::Retrying { scheduled_for }) => {
                warn!(
                    "{} (attempt {}/{}, next at {})",
                    ScanError::TaskTransientFailure {
                        task_id: task.id.clone(),
                        message
                    },
                    task.attempts,
                    task.max_attempts,
                    scheduled_for
                );
                metrics::record_task_outcome("retrying");
                Ok(TaskRun::Retrying { rate_limited })
            }
            Some(TaskFailureOutcome::Failed) => {
                warn!(
                    "{}",
                    ScanError::TaskPermanentFailure {
                        task_id: task.id.clone(),
                        message
                    }
                );
                metrics::record_task_outcome("failed");
                Ok(TaskRun::Failed { rate_limited })
            }
            None => {
                warn!("Task {} was no longer processing on failure", task.id);
                Ok(TaskRun::Retrying { rate_limited })
            }
        }
    }

    fn release_all(&self, tasks: impl IntoIterator<Item = ScanTask>, report: &mut CycleReport) {
        for task in tasks {
            match self.store.release(&task.id) {
                Ok(true) => {
                    report.released += 1;
                    metrics::record_task_outcome("released");
                }
                Ok(false) => {}
                Err(e) => error!("Failed to release task {}: {:#}", task.id, e),
            }
        }
    }
}
