//! Fixed slot pool: FIFO overflow, admission errors, release policies.

use std::sync::Arc;
use std::time::Duration;

use shadow_pool::audit::PoolEventKind;
use shadow_pool::config::SolverConfig;
use shadow_pool::mode::{ExecutionMode, ReleasePolicy};
use shadow_pool::models::result::CompletionStatus;
use shadow_pool::models::slot::SlotStatus;
use shadow_pool::models::snapshot::Assignment;
use shadow_pool::orchestrator::fixed_pool::{SlotPool, SlotPoolOptions};
use shadow_pool::orchestrator::{ArtifactTarget, Pool, PoolServices, WorkspaceLayout};
use shadow_pool::AppError;

use super::test_helpers::{
    echo_solver, id, recording_audit, runner_launch, settings, shell_launch, staggered_solver,
    task, RecordingAudit,
};

const SETTLE: Duration = Duration::from_secs(20);

fn options(slot_count: usize, queue_capacity: usize, policy: ReleasePolicy) -> SlotPoolOptions {
    SlotPoolOptions {
        slot_count,
        queue_capacity,
        completed_capacity: 16,
        release_policy: policy,
        harvest_interval: Duration::from_millis(50),
    }
}

fn runner_pool(
    root: &std::path::Path,
    delay: &str,
    options: SlotPoolOptions,
) -> (Arc<SlotPool>, Arc<RecordingAudit>) {
    solver_pool(root, echo_solver("done", delay), options)
}

fn solver_pool(
    root: &std::path::Path,
    solver: SolverConfig,
    options: SlotPoolOptions,
) -> (Arc<SlotPool>, Arc<RecordingAudit>) {
    let (recorder, audit) = recording_audit();
    let settings = settings(
        root,
        WorkspaceLayout::PerSlot,
        ExecutionMode::Batch,
        runner_launch(),
        solver,
        Duration::from_secs(20),
    );
    let services = PoolServices {
        audit: Some(audit),
        ..PoolServices::default()
    };
    (Arc::new(SlotPool::new(settings, options, services)), recorder)
}

fn sleeper_pool(root: &std::path::Path, options: SlotPoolOptions) -> Arc<SlotPool> {
    let settings = settings(
        root,
        WorkspaceLayout::PerSlot,
        ExecutionMode::Batch,
        shell_launch("sleep 30"),
        echo_solver("unused", "0"),
        Duration::from_secs(30),
    );
    Arc::new(SlotPool::new(settings, options, PoolServices::default()))
}

/// Run harvester passes until `count` results are recorded.
async fn harvest_until(pool: &SlotPool, count: usize) -> bool {
    let deadline = tokio::time::Instant::now() + SETTLE;
    while tokio::time::Instant::now() < deadline {
        pool.harvest().await;
        if pool.completed_results().await.len() >= count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn overflow_tasks_run_in_submission_order() {
    let root = tempfile::tempdir().expect("tempdir");
    let (pool, audit) = solver_pool(
        root.path(),
        staggered_solver(3),
        options(2, 0, ReleasePolicy::Reuse),
    );

    assert_eq!(pool.assign_task(task("t1", 5)).await.expect("t1"), Assignment::started(0));
    assert_eq!(pool.assign_task(task("t2-slow", 5)).await.expect("t2"), Assignment::started(1));
    assert_eq!(pool.assign_task(task("t3", 5)).await.expect("t3"), Assignment::queued());
    assert_eq!(pool.assign_task(task("t4", 5)).await.expect("t4"), Assignment::queued());

    let status = pool.status().await;
    assert_eq!(status.queue_size, 2);
    assert_eq!(status.active_count, 2);
    assert_eq!(status.capacity, 2);

    assert!(harvest_until(&pool, 4).await, "not every task finished");

    assert_eq!(
        audit.task_ids(PoolEventKind::TaskAssigned),
        vec!["t1", "t2-slow", "t3", "t4"]
    );
    assert_eq!(audit.task_ids(PoolEventKind::TaskQueued), vec!["t3", "t4"]);
    let results = pool.completed_results().await;
    assert!(results
        .iter()
        .all(|r| r.status == CompletionStatus::Completed));
    let finished: Vec<(String, usize)> = results
        .iter()
        .map(|r| (r.task.id.to_string(), r.slot_index))
        .collect();
    assert_eq!(
        finished,
        vec![
            ("t1".to_owned(), 0),
            ("t3".to_owned(), 0),
            ("t4".to_owned(), 0),
            ("t2-slow".to_owned(), 1),
        ]
    );
    assert!(pool.queued_tasks().await.is_empty());
}

#[tokio::test]
async fn one_harvest_records_results_in_finish_order() {
    let root = tempfile::tempdir().expect("tempdir");
    let (pool, _audit) = solver_pool(
        root.path(),
        staggered_solver(1),
        options(2, 0, ReleasePolicy::Reuse),
    );

    pool.assign_task(task("slow", 5)).await.expect("slow");
    pool.assign_task(task("fast", 5)).await.expect("fast");

    let deadline = tokio::time::Instant::now() + SETTLE;
    loop {
        let status = pool.status().await;
        if status.slots.iter().all(|s| s.status == SlotStatus::Done) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "tasks never finished");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    pool.harvest().await;
    let results = pool.completed_results().await;
    let order: Vec<String> = results.iter().map(|r| r.task.id.to_string()).collect();
    assert_eq!(order, vec!["fast", "slow"]);
    assert!(results[0].finished_at <= results[1].finished_at);
}

#[tokio::test]
async fn kill_all_stops_a_reserved_slot_before_its_child_starts() {
    let root = tempfile::tempdir().expect("tempdir");
    let pool = sleeper_pool(root.path(), options(1, 0, ReleasePolicy::Reuse));
    let slot = Arc::clone(pool.slot(0).expect("slot 0"));

    let reservation = slot
        .try_reserve(task("early", 5), ReleasePolicy::Reuse)
        .expect("idle slot");
    assert_eq!(pool.kill_all().await, 0);
    assert_eq!(slot.status(), SlotStatus::Failed);

    slot.launch(reservation).await;
    assert_eq!(slot.status(), SlotStatus::Failed);
    assert!(!slot.is_running());

    pool.harvest().await;
    let results = pool.completed_results().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].result, "killed");
}

#[tokio::test]
async fn new_task_never_overtakes_the_queue() {
    let root = tempfile::tempdir().expect("tempdir");
    let (pool, _audit) = runner_pool(root.path(), "0.2", options(1, 0, ReleasePolicy::Reuse));

    pool.assign_task(task("head", 5)).await.expect("head");
    assert_eq!(pool.assign_task(task("waiting", 5)).await.expect("w"), Assignment::queued());
    assert!(harvest_until(&pool, 1).await);
    let deadline = tokio::time::Instant::now() + SETTLE;
    while !pool.queued_tasks().await.is_empty() && tokio::time::Instant::now() < deadline {
        pool.harvest().await;
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    // The queued task must have been dispatched before anything newer.
    assert_eq!(pool.assign_task(task("late", 5)).await.expect("late"), Assignment::queued());
    let queued: Vec<String> = pool
        .queued_tasks()
        .await
        .into_iter()
        .map(|t| t.id.to_string())
        .collect();
    assert_eq!(queued, vec!["late"]);
    pool.shutdown().await;
}

#[tokio::test]
async fn duplicate_task_is_already_active() {
    let root = tempfile::tempdir().expect("tempdir");
    let pool = sleeper_pool(root.path(), options(1, 0, ReleasePolicy::Reuse));

    pool.assign_task(task("dup", 5)).await.expect("first");
    let running = pool.assign_task(task("dup", 5)).await.expect_err("running");
    assert!(matches!(running, AppError::AlreadyActive(_)));

    pool.assign_task(task("queued", 5)).await.expect("queued");
    let queued = pool.assign_task(task("queued", 5)).await.expect_err("queued");
    assert!(matches!(queued, AppError::AlreadyActive(_)));
    pool.shutdown().await;
}

#[tokio::test]
async fn bounded_queue_reports_full() {
    let root = tempfile::tempdir().expect("tempdir");
    let pool = sleeper_pool(root.path(), options(1, 1, ReleasePolicy::Reuse));

    pool.assign_task(task("a", 5)).await.expect("a");
    pool.assign_task(task("b", 5)).await.expect("b");
    let err = pool.assign_task(task("c", 5)).await.expect_err("full");
    assert!(matches!(err, AppError::QueueFull(_)));
    pool.shutdown().await;
}

#[tokio::test]
async fn invalid_task_is_rejected_before_admission() {
    let root = tempfile::tempdir().expect("tempdir");
    let pool = sleeper_pool(root.path(), options(1, 0, ReleasePolicy::Reuse));
    let mut bad = task("bad", 5);
    bad.priority = 0;
    let err = pool.assign_task(bad).await.expect_err("invalid");
    assert!(matches!(err, AppError::InvalidState(_)));
    assert_eq!(pool.status().await.active_count, 0);
}

#[tokio::test]
async fn retain_policy_holds_slot_until_reset() {
    let root = tempfile::tempdir().expect("tempdir");
    let (pool, audit) = runner_pool(root.path(), "0", options(1, 0, ReleasePolicy::Retain));

    pool.assign_task(task("keep", 5)).await.expect("keep");
    pool.assign_task(task("next", 5)).await.expect("next");
    assert!(harvest_until(&pool, 1).await);

    pool.harvest().await;
    assert_eq!(pool.slot(0).expect("slot").status(), SlotStatus::Done);
    assert_eq!(pool.queued_tasks().await.len(), 1);

    pool.reset_slot(0).await.expect("reset");
    pool.harvest().await;
    assert!(pool.queued_tasks().await.is_empty());
    assert_eq!(audit.task_ids(PoolEventKind::SlotReset), vec!["keep"]);
    assert!(harvest_until(&pool, 2).await);
}

#[tokio::test]
async fn reset_records_unharvested_result() {
    let root = tempfile::tempdir().expect("tempdir");
    let pool = sleeper_pool(root.path(), options(1, 0, ReleasePolicy::Reuse));

    pool.assign_task(task("cut", 5)).await.expect("assign");
    pool.reset_slot(0).await.expect("reset");

    let results = pool.completed_results().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].result, "killed");
    assert_eq!(pool.slot(0).expect("slot").status(), SlotStatus::Idle);

    let err = pool.reset_slot(7).await.expect_err("unknown slot");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn kill_all_drops_queue_and_fails_running() {
    let root = tempfile::tempdir().expect("tempdir");
    let pool = sleeper_pool(root.path(), options(2, 0, ReleasePolicy::Reuse));

    for name in ["k1", "k2", "k3", "k4", "k5"] {
        pool.assign_task(task(name, 5)).await.expect("assign");
    }
    assert_eq!(pool.kill_all().await, 3);

    let status = pool.status().await;
    assert_eq!(status.queue_size, 0);
    assert_eq!(status.active_count, 0);
    assert!(status.slots.iter().all(|s| s.status == SlotStatus::Failed));

    pool.harvest().await;
    assert_eq!(pool.completed_results().await.len(), 2);
}

#[tokio::test]
async fn slots_get_distinct_workspaces() {
    let root = tempfile::tempdir().expect("tempdir");
    let pool = sleeper_pool(root.path(), options(2, 0, ReleasePolicy::Reuse));

    pool.assign_task(task("w1", 5)).await.expect("w1");
    pool.assign_task(task("w2", 5)).await.expect("w2");

    let first = pool.slot(0).expect("slot").workspace().expect("ws");
    let second = pool.slot(1).expect("slot").workspace().expect("ws");
    assert_ne!(first, second);
    assert!(first.ends_with("slot-0-w1"));
    assert!(second.ends_with("slot-1-w2"));
    pool.shutdown().await;
}

#[tokio::test]
async fn cleanup_removes_finished_workspaces_only() {
    let root = tempfile::tempdir().expect("tempdir");
    let (pool, _audit) = runner_pool(root.path(), "0", options(1, 0, ReleasePolicy::Reuse));

    pool.assign_task(task("tidy", 5)).await.expect("assign");
    assert!(harvest_until(&pool, 1).await);

    let body = pool
        .read_task_artifact(&id("tidy"), "solution.md")
        .await
        .expect("artifact");
    assert!(body.contains("done"));

    assert_eq!(pool.cleanup_workspace(&id("tidy")).await.expect("cleanup"), 1);
    assert!(!root.path().join("slot-0-tidy").exists());
    let err = pool.cleanup_workspace(&id("tidy")).await.expect_err("gone");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn cleanup_refuses_running_task() {
    let root = tempfile::tempdir().expect("tempdir");
    let pool = sleeper_pool(root.path(), options(1, 0, ReleasePolicy::Reuse));

    pool.assign_task(task("busy", 5)).await.expect("assign");
    let err = pool.cleanup_workspace(&id("busy")).await.expect_err("running");
    assert!(matches!(err, AppError::InvalidState(_)));
    pool.shutdown().await;
}

#[tokio::test]
async fn facade_rejects_dynamic_only_operations() {
    let root = tempfile::tempdir().expect("tempdir");
    let pool = Pool::Fixed(sleeper_pool(root.path(), options(1, 0, ReleasePolicy::Reuse)));

    let approve = pool.approve(&id("x")).await.expect_err("fixed");
    assert!(matches!(approve, AppError::InvalidState(_)));
    let reject = pool.reject(&id("x")).await.expect_err("fixed");
    assert!(matches!(reject, AppError::InvalidState(_)));

    let unknown = pool
        .list_artifacts(&ArtifactTarget::Slot(0))
        .await
        .expect_err("idle slot");
    assert!(matches!(unknown, AppError::NotFound(_)));
}

#[tokio::test]
async fn background_harvester_drains_queue() {
    let root = tempfile::tempdir().expect("tempdir");
    let (pool, _audit) = runner_pool(root.path(), "0", options(1, 0, ReleasePolicy::Reuse));
    let handle = pool.spawn_harvester();

    for name in ["h1", "h2", "h3"] {
        pool.assign_task(task(name, 5)).await.expect("assign");
    }
    let deadline = tokio::time::Instant::now() + SETTLE;
    while pool.completed_results().await.len() < 3 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(pool.completed_results().await.len(), 3);

    pool.shutdown().await;
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("harvester stops")
        .expect("join");
}
