//! Scan storage and persistence.
//!
//! SQLite-backed storage for profiles, batches, tasks, the daily budget ledger
//! and API credentials. Every state transition is a single conditional
//! statement (or a short transaction) keyed on the prior state, so concurrent
//! executor cycles never double-claim a task or overspend a budget.

use super::models::*;
use super::schema::SCAN_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::{open_in_memory_db, open_versioned_db};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Outcome of trying to open a new batch for a profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginBatchOutcome {
    Started,
    ProfileNotFound,
    AlreadyRunning(ScanStatus),
}

/// Storage operations for the scan scheduler.
///
/// All methods that stamp times take `now` explicitly (Unix seconds).
pub trait ScanStore: Send + Sync {
    // === Profiles ===

    fn insert_profile(&self, profile: &Profile) -> Result<()>;

    fn get_profile(&self, id: &str) -> Result<Option<Profile>>;

    /// Open a new batch and move the profile to `scanning`. Any active batch
    /// of the profile is marked superseded. Rejected while a scan is running.
    fn begin_batch(&self, profile_id: &str, batch_id: &str, now: i64)
        -> Result<BeginBatchOutcome>;

    /// `scanning -> expanding` for the profile's current batch plus the bulk
    /// insert of its tasks, in one transaction. Each task starts pending with
    /// zero attempts, claimable at `now`, and progress starts with one
    /// pending unit per task. Returns None (and inserts nothing) if the
    /// profile is not scanning on `batch_id`.
    fn enqueue_expansion(
        &self,
        profile_id: &str,
        batch_id: &str,
        tasks: &[NewScanTask],
        max_attempts: i32,
        now: i64,
    ) -> Result<Option<Vec<String>>>;

    /// Profile id and current batch id of every `expanding` profile.
    fn expanding_profiles(&self) -> Result<Vec<(String, String)>>;

    /// If the batch has no pending or processing tasks, `expanding ->
    /// completed` and close the batch. Returns true only for the call that
    /// performed the transition.
    fn complete_if_done(&self, profile_id: &str, batch_id: &str, now: i64) -> Result<bool>;

    /// Move the profile to `failed` if `batch_id` is still its running batch.
    fn mark_profile_failed(
        &self,
        profile_id: &str,
        batch_id: &str,
        error: &str,
        now: i64,
    ) -> Result<bool>;

    // === Batches ===

    fn get_batch(&self, batch_id: &str) -> Result<Option<ScanBatch>>;

    fn batch_stats(&self, batch_id: &str) -> Result<BatchStats>;

    /// Tasks of the batch still pending or processing.
    fn count_open_tasks(&self, batch_id: &str) -> Result<i64>;

    // === Task queue ===

    fn get_task(&self, task_id: &str) -> Result<Option<ScanTask>>;

    /// Claim up to `min(limit, remaining_budget)` due pending tasks, ordered
    /// by priority (highest first) then age. Only tasks whose pending ->
    /// processing transition succeeded are returned.
    fn claim_next(&self, limit: usize, remaining_budget: i64, now: i64) -> Result<Vec<ScanTask>>;

    /// `pending -> processing`, incrementing attempts. Returns the claimed
    /// task, or None if it was not pending.
    fn mark_processing(&self, task_id: &str, now: i64) -> Result<Option<ScanTask>>;

    /// `processing -> completed`. In the same transaction `delta` is merged
    /// into the progress of the profile whose current batch is the task's;
    /// outcomes of superseded batches are dropped. False if the task was not
    /// processing.
    fn mark_completed(
        &self,
        task_id: &str,
        jobs_found: i64,
        delta: &ProgressDelta,
        now: i64,
    ) -> Result<bool>;

    /// Terminal `failed` once attempts are used up, otherwise back to
    /// pending at `retry_at`. A terminal failure moves one unit of the
    /// profile's progress to completed in the same transaction. None if the
    /// task was not processing.
    fn mark_failed(
        &self,
        task_id: &str,
        error_message: &str,
        retry_at: i64,
        now: i64,
    ) -> Result<Option<TaskFailureOutcome>>;

    /// `processing -> pending` without consuming an attempt.
    fn release(&self, task_id: &str) -> Result<bool>;

    /// `processing -> skipped` for tasks whose batch was superseded.
    fn mark_skipped(&self, task_id: &str, now: i64) -> Result<bool>;

    /// Recover tasks stuck in `processing` since before `started_before`.
    /// They go back to pending and keep the attempt they used; those with no
    /// attempts left fail terminally, counted in their profile's progress.
    fn reclaim_stale(&self, started_before: i64, now: i64) -> Result<ReclaimedTasks>;

    // === Budget ledger ===

    /// Atomically count one call against (api, credential, day) if the
    /// count is below `limit` (`None` = unlimited). Returns the new count,
    /// or None when the limit is reached.
    fn try_consume_budget(
        &self,
        api_name: &str,
        credential_key: &str,
        budget_date: &str,
        limit: Option<i64>,
        now: i64,
    ) -> Result<Option<i64>>;

    fn budget_used(&self, api_name: &str, credential_key: &str, budget_date: &str)
        -> Result<i64>;

    // === Credentials ===

    fn insert_credential(&self, credential: &StoredCredential) -> Result<()>;

    /// Active credentials of an owner, oldest first.
    fn active_credentials_for_owner(
        &self,
        owner_id: &str,
        api_name: &str,
    ) -> Result<Vec<StoredCredential>>;

    /// Active credentials of every owner.
    fn active_credentials(&self, api_name: &str) -> Result<Vec<StoredCredential>>;
}

/// SQLite implementation of [`ScanStore`].
pub struct SqliteScanStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteScanStore {
    /// Open or create the scan database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path, SCAN_VERSIONED_SCHEMAS, "scan")?;
        Ok(SqliteScanStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory_db(SCAN_VERSIONED_SCHEMAS)?;
        Ok(SqliteScanStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_profile(row: &rusqlite::Row) -> rusqlite::Result<Profile> {
        let list = |col: &str| -> rusqlite::Result<Vec<String>> {
            Ok(serde_json::from_str(&row.get::<_, String>(col)?).unwrap_or_default())
        };
        Ok(Profile {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            name: row.get("name")?,
            industries: list("industries")?,
            roles: list("roles")?,
            locations: list("locations")?,
            scan_status: ScanStatus::from_str(&row.get::<_, String>("scan_status")?)
                .unwrap_or(ScanStatus::Idle),
            scan_batch_id: row.get("scan_batch_id")?,
            scan_progress: Self::row_to_progress(row)?,
            last_synced_at: row.get("last_synced_at")?,
            scan_error: row.get("scan_error")?,
            created_at: row.get("created_at")?,
        })
    }

    fn row_to_progress(row: &rusqlite::Row) -> rusqlite::Result<ScanProgress> {
        Ok(ScanProgress {
            jobs_found: row.get("progress_jobs_found")?,
            companies_found: row.get("progress_companies_found")?,
            signals_generated: row.get("progress_signals_generated")?,
            tasks_pending: row.get("progress_tasks_pending")?,
            tasks_completed: row.get("progress_tasks_completed")?,
            last_updated: row.get("progress_last_updated")?,
        })
    }

    fn row_to_batch(row: &rusqlite::Row) -> rusqlite::Result<ScanBatch> {
        Ok(ScanBatch {
            id: row.get("id")?,
            profile_id: row.get("profile_id")?,
            status: BatchStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(BatchStatus::Active),
            total_tasks: row.get("total_tasks")?,
            created_at: row.get("created_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<ScanTask> {
        Ok(ScanTask {
            id: row.get("id")?,
            batch_id: row.get("batch_id")?,
            profile_id: row.get("profile_id")?,
            task_type: TaskType::from_str(&row.get::<_, String>("task_type")?)
                .unwrap_or(TaskType::RoleVariation),
            keywords: row.get("keywords")?,
            location: row.get("location")?,
            priority: TaskPriority::from_i32(row.get("priority")?)
                .unwrap_or(TaskPriority::Expansion),
            status: TaskStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(TaskStatus::Pending),
            attempts: row.get("attempts")?,
            max_attempts: row.get("max_attempts")?,
            scheduled_for: row.get("scheduled_for")?,
            jobs_found: row.get("jobs_found")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn row_to_credential(row: &rusqlite::Row) -> rusqlite::Result<StoredCredential> {
        Ok(StoredCredential {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            api_name: row.get("api_name")?,
            encrypted_key: row.get("encrypted_key")?,
            daily_limit: row.get("daily_limit")?,
            is_active: row.get::<_, i32>("is_active")? != 0,
            is_unlimited: row.get::<_, i32>("is_unlimited")? != 0,
            created_at: row.get("created_at")?,
        })
    }

    fn write_progress(conn: &Connection, profile_id: &str, progress: &ScanProgress) -> Result<()> {
        conn.execute(
            r#"UPDATE profiles SET
                progress_jobs_found = ?2,
                progress_companies_found = ?3,
                progress_signals_generated = ?4,
                progress_tasks_pending = ?5,
                progress_tasks_completed = ?6,
                progress_last_updated = ?7
            WHERE id = ?1"#,
            params![
                profile_id,
                progress.jobs_found,
                progress.companies_found,
                progress.signals_generated,
                progress.tasks_pending,
                progress.tasks_completed,
                progress.last_updated,
            ],
        )?;
        Ok(())
    }

    /// Merge `delta` into the progress of the profile whose current batch is
    /// `batch_id`. False (and nothing written) for superseded batches.
    fn merge_progress(conn: &Connection, batch_id: &str, delta: &ProgressDelta) -> Result<bool> {
        let current = conn
            .query_row(
                "SELECT id, progress_jobs_found, progress_companies_found, progress_signals_generated, \
                 progress_tasks_pending, progress_tasks_completed, progress_last_updated \
                 FROM profiles WHERE scan_batch_id = ?1",
                params![batch_id],
                |row| Ok((row.get::<_, String>("id")?, Self::row_to_progress(row)?)),
            )
            .optional()?;
        let Some((profile_id, mut progress)) = current else {
            return Ok(false);
        };

        progress.merge(delta);
        Self::write_progress(conn, &profile_id, &progress)?;
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn execute_sql(&self, sql: &str) -> Result<()> {
        self.conn.lock().unwrap().execute_batch(sql)?;
        Ok(())
    }
}

impl ScanStore for SqliteScanStore {
    // === Profiles ===

    fn insert_profile(&self, profile: &Profile) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO profiles (
                id, owner_id, name, industries, roles, locations, scan_status,
                scan_batch_id, last_synced_at, scan_error, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                profile.id,
                profile.owner_id,
                profile.name,
                serde_json::to_string(&profile.industries)?,
                serde_json::to_string(&profile.roles)?,
                serde_json::to_string(&profile.locations)?,
                profile.scan_status.as_str(),
                profile.scan_batch_id,
                profile.last_synced_at,
                profile.scan_error,
                profile.created_at,
            ],
        )
        .with_context(|| format!("Failed to insert profile {}", profile.id))?;
        Self::write_progress(&conn, &profile.id, &profile.scan_progress)?;
        Ok(())
    }

    fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        let conn = self.conn.lock().unwrap();
        let profile = conn
            .query_row(
                "SELECT * FROM profiles WHERE id = ?1",
                params![id],
                Self::row_to_profile,
            )
            .optional()?;
        Ok(profile)
    }

    fn begin_batch(
        &self,
        profile_id: &str,
        batch_id: &str,
        now: i64,
    ) -> Result<BeginBatchOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let status: Option<String> = tx
            .query_row(
                "SELECT scan_status FROM profiles WHERE id = ?1",
                params![profile_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(status) = status else {
            return Ok(BeginBatchOutcome::ProfileNotFound);
        };
        let status = ScanStatus::from_str(&status).unwrap_or(ScanStatus::Idle);
        if !status.can_transition_to(ScanStatus::Scanning) {
            return Ok(BeginBatchOutcome::AlreadyRunning(status));
        }

        tx.execute(
            "UPDATE scan_batches SET status = 'superseded' WHERE profile_id = ?1 AND status = 'active'",
            params![profile_id],
        )?;
        tx.execute(
            "INSERT INTO scan_batches (id, profile_id, status, total_tasks, created_at) VALUES (?1, ?2, 'active', 0, ?3)",
            params![batch_id, profile_id, now],
        )?;
        tx.execute(
            r#"UPDATE profiles SET
                scan_status = 'scanning',
                scan_batch_id = ?2,
                scan_error = NULL,
                progress_jobs_found = 0,
                progress_companies_found = 0,
                progress_signals_generated = 0,
                progress_tasks_pending = 0,
                progress_tasks_completed = 0,
                progress_last_updated = ?3
            WHERE id = ?1 AND scan_status NOT IN ('scanning', 'expanding')"#,
            params![profile_id, batch_id, now],
        )?;
        tx.commit()?;

        Ok(BeginBatchOutcome::Started)
    }

    fn enqueue_expansion(
        &self,
        profile_id: &str,
        batch_id: &str,
        tasks: &[NewScanTask],
        max_attempts: i32,
        now: i64,
    ) -> Result<Option<Vec<String>>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let progress = tx
            .query_row(
                "SELECT * FROM profiles WHERE id = ?1 AND scan_batch_id = ?2 AND scan_status = 'scanning'",
                params![profile_id, batch_id],
                Self::row_to_progress,
            )
            .optional()?;
        let Some(progress) = progress else {
            return Ok(None);
        };

        let task_count = tasks.len() as i64;
        tx.execute(
            "UPDATE profiles SET scan_status = 'expanding' WHERE id = ?1",
            params![profile_id],
        )?;
        Self::write_progress(&tx, profile_id, &progress.start_expansion(task_count, now))?;
        tx.execute(
            "UPDATE scan_batches SET total_tasks = ?2 WHERE id = ?1",
            params![batch_id, task_count],
        )?;

        let mut ids = Vec::with_capacity(tasks.len());
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO scan_tasks (
                    id, batch_id, profile_id, task_type, keywords, location, priority,
                    status, attempts, max_attempts, scheduled_for, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', 0, ?8, ?9, ?9)"#,
            )?;
            for task in tasks {
                let id = uuid::Uuid::new_v4().to_string();
                stmt.execute(params![
                    id,
                    batch_id,
                    profile_id,
                    task.task_type.as_str(),
                    task.keywords,
                    task.location,
                    task.priority.as_i32(),
                    max_attempts,
                    now,
                ])
                .with_context(|| format!("Failed to insert task for batch {}", batch_id))?;
                ids.push(id);
            }
        }
        tx.commit()?;

        Ok(Some(ids))
    }

    fn expanding_profiles(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT id, scan_batch_id FROM profiles
            WHERE scan_status = 'expanding' AND scan_batch_id IS NOT NULL
            ORDER BY created_at ASC"#,
        )?;
        let profiles = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        Ok(profiles)
    }

    fn complete_if_done(&self, profile_id: &str, batch_id: &str, now: i64) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let open: i64 = tx.query_row(
            "SELECT COUNT(*) FROM scan_tasks WHERE batch_id = ?1 AND status IN ('pending', 'processing')",
            params![batch_id],
            |row| row.get(0),
        )?;
        if open > 0 {
            return Ok(false);
        }

        let changed = tx.execute(
            r#"UPDATE profiles SET scan_status = 'completed', last_synced_at = ?3
            WHERE id = ?1 AND scan_batch_id = ?2 AND scan_status = 'expanding'"#,
            params![profile_id, batch_id, now],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE scan_batches SET status = 'completed', completed_at = ?2 WHERE id = ?1 AND status = 'active'",
            params![batch_id, now],
        )?;
        tx.commit()?;

        Ok(true)
    }

    fn mark_profile_failed(
        &self,
        profile_id: &str,
        batch_id: &str,
        error: &str,
        now: i64,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let changed = tx.execute(
            r#"UPDATE profiles SET scan_status = 'failed', scan_error = ?3, progress_last_updated = ?4
            WHERE id = ?1 AND scan_batch_id = ?2 AND scan_status IN ('scanning', 'expanding')"#,
            params![profile_id, batch_id, error, now],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE scan_batches SET status = 'failed', completed_at = ?2 WHERE id = ?1 AND status = 'active'",
            params![batch_id, now],
        )?;
        tx.commit()?;

        Ok(true)
    }

    // === Batches ===

    fn get_batch(&self, batch_id: &str) -> Result<Option<ScanBatch>> {
        let conn = self.conn.lock().unwrap();
        let batch = conn
            .query_row(
                "SELECT * FROM scan_batches WHERE id = ?1",
                params![batch_id],
                Self::row_to_batch,
            )
            .optional()?;
        Ok(batch)
    }

    fn batch_stats(&self, batch_id: &str) -> Result<BatchStats> {
        let conn = self.conn.lock().unwrap();
        let stats = conn.query_row(
            r#"SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'skipped' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN jobs_found ELSE 0 END), 0)
            FROM scan_tasks WHERE batch_id = ?1"#,
            params![batch_id],
            |row| {
                Ok(BatchStats {
                    total: row.get(0)?,
                    pending: row.get(1)?,
                    processing: row.get(2)?,
                    completed: row.get(3)?,
                    failed: row.get(4)?,
                    skipped: row.get(5)?,
                    jobs_found: row.get(6)?,
                })
            },
        )?;
        Ok(stats)
    }

    fn count_open_tasks(&self, batch_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM scan_tasks WHERE batch_id = ?1 AND status IN ('pending', 'processing')",
            params![batch_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // === Task queue ===

    fn get_task(&self, task_id: &str) -> Result<Option<ScanTask>> {
        let conn = self.conn.lock().unwrap();
        let task = conn
            .query_row(
                "SELECT * FROM scan_tasks WHERE id = ?1",
                params![task_id],
                Self::row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    fn claim_next(&self, limit: usize, remaining_budget: i64, now: i64) -> Result<Vec<ScanTask>> {
        let take = (limit as i64).min(remaining_budget);
        if take <= 0 {
            return Ok(Vec::new());
        }

        let candidates: Vec<String> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                r#"SELECT id FROM scan_tasks
                WHERE status = 'pending' AND scheduled_for <= ?1
                ORDER BY priority DESC, created_at ASC, rowid ASC
                LIMIT ?2"#,
            )?;
            let ids = stmt
                .query_map(params![now, take], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            ids
        };

        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Some(task) = self.mark_processing(&id, now)? {
                claimed.push(task);
            }
        }
        Ok(claimed)
    }

    fn mark_processing(&self, task_id: &str, now: i64) -> Result<Option<ScanTask>> {
        let conn = self.conn.lock().unwrap();
        let task = conn
            .query_row(
                r#"UPDATE scan_tasks
                SET status = 'processing', started_at = ?2, attempts = attempts + 1
                WHERE id = ?1 AND status = 'pending' AND attempts < max_attempts
                RETURNING *"#,
                params![task_id, now],
                Self::row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    fn mark_completed(
        &self,
        task_id: &str,
        jobs_found: i64,
        delta: &ProgressDelta,
        now: i64,
    ) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let batch_id: Option<String> = tx
            .query_row(
                r#"UPDATE scan_tasks
                SET status = 'completed', jobs_found = ?2, completed_at = ?3, error_message = NULL
                WHERE id = ?1 AND status = 'processing'
                RETURNING batch_id"#,
                params![task_id, jobs_found, now],
                |row| row.get(0),
            )
            .optional()?;
        let Some(batch_id) = batch_id else {
            return Ok(false);
        };

        Self::merge_progress(&tx, &batch_id, delta)?;
        tx.commit()?;

        Ok(true)
    }

    fn mark_failed(
        &self,
        task_id: &str,
        error_message: &str,
        retry_at: i64,
        now: i64,
    ) -> Result<Option<TaskFailureOutcome>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let row: Option<(String, i64, String)> = tx
            .query_row(
                r#"UPDATE scan_tasks SET
                    status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                    scheduled_for = CASE WHEN attempts >= max_attempts THEN scheduled_for ELSE ?3 END,
                    completed_at = CASE WHEN attempts >= max_attempts THEN ?4 ELSE NULL END,
                    error_message = ?2
                WHERE id = ?1 AND status = 'processing'
                RETURNING status, scheduled_for, batch_id"#,
                params![task_id, error_message, retry_at, now],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((status, scheduled_for, batch_id)) = row else {
            return Ok(None);
        };

        let terminal = TaskStatus::from_str(&status).is_some_and(|s| s.is_terminal());
        if terminal {
            Self::merge_progress(&tx, &batch_id, &ProgressDelta::task_finished(now))?;
        }
        tx.commit()?;

        Ok(Some(if terminal {
            TaskFailureOutcome::Failed
        } else {
            TaskFailureOutcome::Retrying { scheduled_for }
        }))
    }

    fn release(&self, task_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"UPDATE scan_tasks
            SET status = 'pending', attempts = MAX(attempts - 1, 0), started_at = NULL
            WHERE id = ?1 AND status = 'processing'"#,
            params![task_id],
        )?;
        Ok(changed > 0)
    }

    fn mark_skipped(&self, task_id: &str, now: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE scan_tasks SET status = 'skipped', completed_at = ?2 WHERE id = ?1 AND status = 'processing'",
            params![task_id, now],
        )?;
        Ok(changed > 0)
    }

    fn reclaim_stale(&self, started_before: i64, now: i64) -> Result<ReclaimedTasks> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let exhausted: Vec<String> = {
            let mut stmt = tx.prepare(
                r#"UPDATE scan_tasks
                SET status = 'failed', completed_at = ?2,
                    error_message = 'abandoned while processing'
                WHERE status = 'processing' AND started_at < ?1 AND attempts >= max_attempts
                RETURNING batch_id"#,
            )?;
            let batch_ids = stmt
                .query_map(params![started_before, now], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            batch_ids
        };
        for batch_id in &exhausted {
            Self::merge_progress(&tx, batch_id, &ProgressDelta::task_finished(now))?;
        }

        let requeued = tx.execute(
            r#"UPDATE scan_tasks
            SET status = 'pending', started_at = NULL, scheduled_for = ?2
            WHERE status = 'processing' AND started_at < ?1"#,
            params![started_before, now],
        )?;
        tx.commit()?;

        Ok(ReclaimedTasks {
            requeued,
            failed: exhausted.len(),
        })
    }

    // === Budget ledger ===

    fn try_consume_budget(
        &self,
        api_name: &str,
        credential_key: &str,
        budget_date: &str,
        limit: Option<i64>,
        now: i64,
    ) -> Result<Option<i64>> {
        let limit = limit.unwrap_or(i64::MAX);
        if limit <= 0 {
            return Ok(None);
        }

        let conn = self.conn.lock().unwrap();
        let calls_made = conn
            .query_row(
                r#"INSERT INTO rate_budgets (api_name, credential_id, budget_date, calls_made, last_call_at)
                VALUES (?1, ?2, ?3, 1, ?4)
                ON CONFLICT(api_name, credential_id, budget_date) DO UPDATE SET
                    calls_made = calls_made + 1,
                    last_call_at = excluded.last_call_at
                WHERE rate_budgets.calls_made < ?5
                RETURNING calls_made"#,
                params![api_name, credential_key, budget_date, now, limit],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(calls_made)
    }

    fn budget_used(
        &self,
        api_name: &str,
        credential_key: &str,
        budget_date: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let used = conn
            .query_row(
                "SELECT calls_made FROM rate_budgets WHERE api_name = ?1 AND credential_id = ?2 AND budget_date = ?3",
                params![api_name, credential_key, budget_date],
                |row| row.get(0),
            )
            .optional()?;
        Ok(used.unwrap_or(0))
    }

    // === Credentials ===

    fn insert_credential(&self, credential: &StoredCredential) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO api_credentials (
                id, owner_id, api_name, encrypted_key, daily_limit, is_active, is_unlimited, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                credential.id,
                credential.owner_id,
                credential.api_name,
                credential.encrypted_key,
                credential.daily_limit,
                credential.is_active as i32,
                credential.is_unlimited as i32,
                credential.created_at,
            ],
        )
        .with_context(|| format!("Failed to insert credential {}", credential.id))?;
        Ok(())
    }

    fn active_credentials_for_owner(
        &self,
        owner_id: &str,
        api_name: &str,
    ) -> Result<Vec<StoredCredential>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM api_credentials
            WHERE owner_id = ?1 AND api_name = ?2 AND is_active = 1
            ORDER BY created_at ASC, id ASC"#,
        )?;
        let credentials = stmt
            .query_map(params![owner_id, api_name], Self::row_to_credential)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(credentials)
    }

    fn active_credentials(&self, api_name: &str) -> Result<Vec<StoredCredential>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM api_credentials
            WHERE api_name = ?1 AND is_active = 1
            ORDER BY created_at ASC, id ASC"#,
        )?;
        let credentials = stmt
            .query_map(params![api_name], Self::row_to_credential)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(credentials)
    }
}
