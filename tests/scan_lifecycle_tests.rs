//! Scan lifecycle tests
//!
//! Drive the scheduler the way the application does (manager for user
//! actions, executor cycles for background work) against a real SQLite store
//! and a manual clock.

mod common;

use common::*;
use scan_scheduler::scan::{
    NewCredential, NewProfile, ScanError, ScanStatus, TaskStatus, TimeProvider,
};
use std::collections::HashMap;
use std::sync::Arc;

fn create_profile(scheduler: &Scheduler) -> String {
    scheduler
        .manager
        .create_profile(NewProfile {
            owner_id: OWNER_ID.to_string(),
            name: "Platform hiring".to_string(),
            roles: vec!["Platform Engineer".to_string()],
            locations: vec!["Berlin".to_string()],
            ..Default::default()
        })
        .unwrap()
        .id
}

/// Runs executor cycles until one claims nothing.
async fn drain(scheduler: &Scheduler) {
    for _ in 0..100 {
        let report = scheduler.executor.run_cycle().await.unwrap();
        if report.claimed == 0 {
            return;
        }
    }
    panic!("Queue did not drain");
}

#[tokio::test]
async fn test_scan_round_trip() {
    let scheduler = Scheduler::new(100);
    let profile_id = create_profile(&scheduler);

    let batch_id = scheduler.manager.begin_scan(&profile_id).unwrap();
    let count = scheduler
        .manager
        .start_expansion(&profile_id, &batch_id, &berlin_only_request(&["rust", "go", "java"]))
        .unwrap();
    assert_eq!(count, 3);

    let profile = scheduler.manager.get_profile(&profile_id).unwrap();
    assert_eq!(profile.scan_status, ScanStatus::Expanding);
    assert_eq!(profile.scan_progress.tasks_pending, 3);

    drain(&scheduler).await;

    let profile = scheduler.manager.get_profile(&profile_id).unwrap();
    assert_eq!(profile.scan_status, ScanStatus::Completed);
    assert_eq!(profile.last_synced_at, Some(NOW));
    assert_eq!(profile.scan_progress.tasks_pending, 0);
    assert_eq!(profile.scan_progress.tasks_completed, 3);
    assert_eq!(profile.scan_progress.jobs_found, 3 * JOBS_PER_CALL);
    assert_eq!(profile.scan_progress.companies_found, 6);
    assert_eq!(profile.scan_progress.signals_generated, 6);

    let stats = scheduler.manager.get_batch_stats(&profile_id, &batch_id).unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.jobs_found, 3 * JOBS_PER_CALL);

    assert_eq!(scheduler.store.budget_used(API_NAME, "", TODAY).unwrap(), 3);
    assert!(scheduler
        .search
        .calls()
        .iter()
        .all(|(_, key)| key.as_deref() == Some("shared-key")));
}

#[tokio::test]
async fn test_task_retried_until_attempts_exhausted() {
    let scheduler = Scheduler::new(100);
    let profile_id = create_profile(&scheduler);
    let batch_id = scheduler.manager.begin_scan(&profile_id).unwrap();
    scheduler
        .manager
        .start_expansion(&profile_id, &batch_id, &berlin_only_request(&["fail-always"]))
        .unwrap();

    let first_retry = NOW + RETRY_BACKOFF_SECS;
    let second_retry = first_retry + RETRY_BACKOFF_SECS;

    // First failure: back to pending 15 minutes out
    let report = scheduler.executor.run_cycle().await.unwrap();
    assert_eq!(report.retried, 1);
    // Peek the task id with a claim that is released untouched
    let task_id = {
        let claimed = scheduler.store.claim_next(1, 1, first_retry).unwrap();
        scheduler.store.release(&claimed[0].id).unwrap();
        claimed[0].id.clone()
    };
    let task = scheduler.store.get_task(&task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.attempts, 1);
    assert_eq!(task.scheduled_for, first_retry);

    // Not due before the backoff elapses
    scheduler.clock.set(first_retry - 1);
    assert_eq!(scheduler.executor.run_cycle().await.unwrap().claimed, 0);

    // Second failure
    scheduler.clock.set(first_retry);
    assert_eq!(scheduler.executor.run_cycle().await.unwrap().retried, 1);
    let task = scheduler.store.get_task(&task_id).unwrap().unwrap();
    assert_eq!(task.attempts, 2);
    assert_eq!(task.scheduled_for, second_retry);

    // Third failure is terminal and schedules nothing further
    scheduler.clock.set(second_retry);
    assert_eq!(scheduler.executor.run_cycle().await.unwrap().failed, 1);
    let task = scheduler.store.get_task(&task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, 3);
    assert_eq!(task.scheduled_for, second_retry);
    assert!(task.error_message.is_some());

    scheduler.clock.advance_secs(24 * 3600);
    assert_eq!(scheduler.executor.run_cycle().await.unwrap().claimed, 0);
    assert_eq!(scheduler.search.calls().len(), 3);

    // Every task is terminal, so the profile completes
    let profile = scheduler.manager.get_profile(&profile_id).unwrap();
    assert_eq!(profile.scan_status, ScanStatus::Completed);
    assert_eq!(profile.scan_progress.jobs_found, 0);
}

#[tokio::test]
async fn test_partial_failure_completes_with_successful_jobs_only() {
    let scheduler = Scheduler::new(100);
    let profile_id = create_profile(&scheduler);
    let batch_id = scheduler.manager.begin_scan(&profile_id).unwrap();

    let roles = [
        "r1", "r2", "r3", "r4", "r5", "r6", "r7", "fail-1", "fail-2", "fail-3",
    ];
    let count = scheduler
        .manager
        .start_expansion(&profile_id, &batch_id, &berlin_only_request(&roles))
        .unwrap();
    assert_eq!(count, 10);

    for _ in 0..3 {
        drain(&scheduler).await;
        scheduler.clock.advance_secs(RETRY_BACKOFF_SECS);
    }
    drain(&scheduler).await;

    let stats = scheduler.manager.get_batch_stats(&profile_id, &batch_id).unwrap();
    assert_eq!(stats.completed, 7);
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.pending, 0);

    let profile = scheduler.manager.get_profile(&profile_id).unwrap();
    assert_eq!(profile.scan_status, ScanStatus::Completed);
    assert_eq!(profile.scan_progress.tasks_pending, 0);
    assert_eq!(profile.scan_progress.tasks_completed, 10);
    assert_eq!(profile.scan_progress.jobs_found, 7 * JOBS_PER_CALL);

    // 7 successes plus 3 attempts for each failing task
    assert_eq!(scheduler.store.budget_used(API_NAME, "", TODAY).unwrap(), 16);
}

#[tokio::test]
async fn test_second_expansion_leaves_batch_untouched() {
    let scheduler = Scheduler::new(100);
    let profile_id = create_profile(&scheduler);
    let batch_id = scheduler.manager.begin_scan(&profile_id).unwrap();
    let request = berlin_only_request(&["rust", "go"]);

    scheduler
        .manager
        .start_expansion(&profile_id, &batch_id, &request)
        .unwrap();
    let before = scheduler.manager.get_batch_stats(&profile_id, &batch_id).unwrap();

    let second = scheduler
        .manager
        .start_expansion(&profile_id, &batch_id, &request);
    assert!(matches!(
        second,
        Err(ScanError::InvalidState {
            expected: ScanStatus::Scanning,
            actual: ScanStatus::Expanding,
        })
    ));
    assert!(matches!(
        scheduler.manager.begin_scan(&profile_id),
        Err(ScanError::ScanInProgress { .. })
    ));

    let after = scheduler.manager.get_batch_stats(&profile_id, &batch_id).unwrap();
    assert_eq!(before, after);
    let profile = scheduler.manager.get_profile(&profile_id).unwrap();
    assert_eq!(profile.scan_batch_id.as_deref(), Some(batch_id.as_str()));
    assert_eq!(profile.scan_progress.tasks_pending, 2);
}

#[tokio::test]
async fn test_owner_keys_exhaust_before_shared_default() {
    let scheduler = Scheduler::new(100);
    for key in ["owner-key-a", "owner-key-b"] {
        scheduler
            .manager
            .register_credential(NewCredential {
                owner_id: OWNER_ID.to_string(),
                encrypted_key: key.to_string(),
                daily_limit: 100,
                is_unlimited: false,
            })
            .unwrap();
    }

    let ledger = scheduler.key_pool.ledger().clone();
    let mut order: Vec<Option<String>> = Vec::new();
    while let Some(key) = scheduler
        .key_pool
        .next_available_key(OWNER_ID, API_NAME)
        .unwrap()
    {
        let decision = ledger.try_consume(API_NAME, key.credential_id.as_deref(), key.daily_limit);
        assert!(decision.allowed);
        order.push(key.api_key);
        assert!(order.len() <= 300, "pool handed out more than its budget");
    }

    assert_eq!(order.len(), 300);
    let mut per_key: HashMap<Option<String>, usize> = HashMap::new();
    for key in &order {
        *per_key.entry(key.clone()).or_default() += 1;
    }
    assert_eq!(per_key[&Some("owner-key-a".to_string())], 100);
    assert_eq!(per_key[&Some("owner-key-b".to_string())], 100);
    assert_eq!(per_key[&Some("shared-key".to_string())], 100);

    // The shared default is used only once both owned keys are spent
    assert!(order[..200]
        .iter()
        .all(|k| k.as_deref() != Some("shared-key")));
    assert!(order[200..]
        .iter()
        .all(|k| k.as_deref() == Some("shared-key")));
    assert_eq!(scheduler.manager.budget_remaining().unwrap(), 0);
}

#[tokio::test]
async fn test_exhausted_budget_defers_work_to_next_day() {
    let scheduler = Scheduler::new(2);
    let profile_id = create_profile(&scheduler);
    let batch_id = scheduler.manager.begin_scan(&profile_id).unwrap();
    scheduler
        .manager
        .start_expansion(&profile_id, &batch_id, &berlin_only_request(&["a", "b", "c", "d"]))
        .unwrap();

    let report = scheduler.executor.run_cycle().await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.completed, 2);

    let report = scheduler.executor.run_cycle().await.unwrap();
    assert_eq!(report.claimed, 0);
    assert!(report.stopped_early);

    let stats = scheduler.manager.get_batch_stats(&profile_id, &batch_id).unwrap();
    assert_eq!(stats.pending, 2);
    assert_eq!(
        scheduler.manager.get_profile(&profile_id).unwrap().scan_status,
        ScanStatus::Expanding
    );

    // Next UTC day the ledger starts fresh
    scheduler.clock.advance_secs(24 * 3600);
    assert_eq!(scheduler.clock.now(), NOW + 24 * 3600);
    drain(&scheduler).await;

    let profile = scheduler.manager.get_profile(&profile_id).unwrap();
    assert_eq!(profile.scan_status, ScanStatus::Completed);
    assert_eq!(profile.scan_progress.tasks_completed, 4);
}

#[tokio::test]
async fn test_rescan_supersedes_previous_batch() {
    let scheduler = Scheduler::new(100);
    let profile_id = create_profile(&scheduler);

    let first = scheduler.manager.begin_scan(&profile_id).unwrap();
    scheduler
        .manager
        .start_expansion(&profile_id, &first, &berlin_only_request(&["a", "b"]))
        .unwrap();
    drain(&scheduler).await;
    assert_eq!(
        scheduler.manager.get_profile(&profile_id).unwrap().scan_status,
        ScanStatus::Completed
    );

    let second = scheduler.manager.begin_scan(&profile_id).unwrap();
    assert_ne!(first, second);

    let profile = scheduler.manager.get_profile(&profile_id).unwrap();
    assert_eq!(profile.scan_status, ScanStatus::Scanning);
    assert_eq!(profile.scan_progress.jobs_found, 0);
    assert_eq!(profile.scan_progress.tasks_completed, 0);

    // Old batch stats stay readable
    let old = scheduler.manager.get_batch_stats(&profile_id, &first).unwrap();
    assert_eq!(old.completed, 2);
}

#[tokio::test]
async fn test_enqueue_failure_fails_profile() {
    let scheduler = Scheduler::build(Arc::new(FailingStore::new(StoreFault::Enqueue)), 100);
    let profile_id = create_profile(&scheduler);
    let batch_id = scheduler.manager.begin_scan(&profile_id).unwrap();

    let result = scheduler
        .manager
        .start_expansion(&profile_id, &batch_id, &berlin_only_request(&["rust"]));
    assert!(matches!(result, Err(ScanError::EnqueueFailure { .. })));

    let profile = scheduler.manager.get_profile(&profile_id).unwrap();
    assert_eq!(profile.scan_status, ScanStatus::Failed);
    assert!(profile
        .scan_error
        .as_deref()
        .is_some_and(|e| e.contains("disk I/O error")));

    // A failed profile accepts a fresh scan
    assert!(scheduler.manager.begin_scan(&profile_id).is_ok());
}

#[tokio::test]
async fn test_finalize_failure_fails_profile() {
    let scheduler = Scheduler::build(Arc::new(FailingStore::new(StoreFault::Finalize)), 100);
    let profile_id = create_profile(&scheduler);
    let batch_id = scheduler.manager.begin_scan(&profile_id).unwrap();
    scheduler
        .manager
        .start_expansion(&profile_id, &batch_id, &berlin_only_request(&["rust"]))
        .unwrap();

    // The cycle itself survives; the profile carries the error
    let report = scheduler.executor.run_cycle().await.unwrap();
    assert_eq!(report.completed, 1);

    let profile = scheduler.manager.get_profile(&profile_id).unwrap();
    assert_eq!(profile.scan_status, ScanStatus::Failed);
    let scan_error = profile.scan_error.unwrap_or_default();
    assert!(scan_error.contains("Finalize failed"));
    assert!(scan_error.contains("disk I/O error"));

    let stats = scheduler.manager.get_batch_stats(&profile_id, &batch_id).unwrap();
    assert_eq!(stats.completed, 1);

    // Nothing left for the sweep to revive
    let report = scheduler.executor.run_cycle().await.unwrap();
    assert_eq!(report.finalized, 0);
    assert_eq!(
        scheduler.manager.get_profile(&profile_id).unwrap().scan_status,
        ScanStatus::Failed
    );
}

#[tokio::test]
async fn test_lost_completion_is_rerun() {
    let scheduler = Scheduler::build(Arc::new(FailingStore::new(StoreFault::CompletionOnce)), 100);
    let profile_id = create_profile(&scheduler);
    let batch_id = scheduler.manager.begin_scan(&profile_id).unwrap();
    scheduler
        .manager
        .start_expansion(&profile_id, &batch_id, &berlin_only_request(&["rust", "go"]))
        .unwrap();

    // Completion and progress roll back together, every claimed task is released
    assert!(scheduler.executor.run_cycle().await.is_err());
    let profile = scheduler.manager.get_profile(&profile_id).unwrap();
    assert_eq!(profile.scan_status, ScanStatus::Expanding);
    assert_eq!(profile.scan_progress.jobs_found, 0);
    assert_eq!(profile.scan_progress.tasks_pending, 2);

    drain(&scheduler).await;

    let profile = scheduler.manager.get_profile(&profile_id).unwrap();
    assert_eq!(profile.scan_status, ScanStatus::Completed);
    assert_eq!(profile.scan_progress.tasks_completed, 2);
    assert_eq!(profile.scan_progress.jobs_found, 2 * JOBS_PER_CALL);

    let stats = scheduler.manager.get_batch_stats(&profile_id, &batch_id).unwrap();
    assert_eq!(stats.completed, 2);
    // The lost call was paid for and made again
    assert_eq!(scheduler.store.budget_used(API_NAME, "", TODAY).unwrap(), 3);
}

#[tokio::test]
async fn test_rate_limited_search_stops_cycle() {
    let scheduler = Scheduler::new(100);
    let profile_id = create_profile(&scheduler);
    let batch_id = scheduler.manager.begin_scan(&profile_id).unwrap();
    scheduler
        .manager
        .start_expansion(
            &profile_id,
            &batch_id,
            &berlin_only_request(&["throttle-me", "rust", "go"]),
        )
        .unwrap();

    let report = scheduler.executor.run_cycle().await.unwrap();
    assert!(report.stopped_early);
    assert_eq!(report.retried, 1);
    assert_eq!(report.released, 2);
    assert_eq!(scheduler.search.calls().len(), 1);

    let stats = scheduler.manager.get_batch_stats(&profile_id, &batch_id).unwrap();
    assert_eq!(stats.pending, 3);
    assert_eq!(stats.processing, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cycles_run_each_task_once() {
    let scheduler = Scheduler::new(100);
    let profile_id = create_profile(&scheduler);
    let batch_id = scheduler.manager.begin_scan(&profile_id).unwrap();

    let roles: Vec<String> = (0..12).map(|i| format!("role-{}", i)).collect();
    let role_refs: Vec<&str> = roles.iter().map(String::as_str).collect();
    scheduler
        .manager
        .start_expansion(&profile_id, &batch_id, &berlin_only_request(&role_refs))
        .unwrap();

    // Overlapping cycles may lose claim races, so run rounds until done
    for _ in 0..10 {
        let handles = (0..4).map(|_| {
            let executor = scheduler.executor.clone();
            tokio::spawn(async move { executor.run_cycle().await.unwrap() })
        });
        for report in futures::future::join_all(handles).await {
            report.unwrap();
        }
        if scheduler.manager.get_profile(&profile_id).unwrap().scan_status
            == ScanStatus::Completed
        {
            break;
        }
    }

    let mut keywords: Vec<String> = scheduler
        .search
        .calls()
        .into_iter()
        .map(|(keywords, _)| keywords)
        .collect();
    keywords.sort();
    keywords.dedup();
    assert_eq!(keywords.len(), 12);
    assert_eq!(scheduler.search.calls().len(), 12);

    let profile = scheduler.manager.get_profile(&profile_id).unwrap();
    assert_eq!(profile.scan_status, ScanStatus::Completed);
    assert_eq!(profile.scan_progress.tasks_completed, 12);
    assert_eq!(scheduler.store.budget_used(API_NAME, "", TODAY).unwrap(), 12);
}
