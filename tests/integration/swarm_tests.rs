//! Dynamic swarm: store polling, capacity, write-back, approve and reject.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shadow_pool::audit::PoolEventKind;
use shadow_pool::mode::{ExecutionMode, PoolMode};
use shadow_pool::models::task::TaskStatus;
use shadow_pool::orchestrator::swarm::{Swarm, SwarmOptions};
use shadow_pool::orchestrator::{ArtifactTarget, Pool, PoolServices, WorkspaceLayout};
use shadow_pool::store::{MemoryTaskStore, TaskStore};
use shadow_pool::AppError;

use super::test_helpers::{
    echo_solver, id, recording_audit, runner_launch, settings, shell_launch, task, RecordingAudit,
};

const SETTLE: Duration = Duration::from_secs(20);

fn options(root: &Path, max_parallel: usize, min_priority: u8) -> SwarmOptions {
    SwarmOptions {
        max_parallel,
        min_priority,
        poll_interval: Duration::from_millis(50),
        monitor_interval: Duration::from_millis(50),
        completed_capacity: 16,
        approved_root: root.join("approved"),
    }
}

struct Fixture {
    _root: tempfile::TempDir,
    root: std::path::PathBuf,
    store: Arc<MemoryTaskStore>,
    swarm: Arc<Swarm>,
    audit: Arc<RecordingAudit>,
}

fn fixture(launch_script: Option<&str>, max_parallel: usize, min_priority: u8) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("work");
    std::fs::create_dir_all(&root).expect("root");
    let launch = launch_script.map_or_else(runner_launch, shell_launch);
    let settings = settings(
        &root,
        WorkspaceLayout::PerTask,
        ExecutionMode::Batch,
        launch,
        echo_solver("swarm answer", "0"),
        Duration::from_secs(20),
    );
    let store = Arc::new(MemoryTaskStore::new());
    let (audit, logger) = recording_audit();
    let services = PoolServices {
        audit: Some(logger),
        ..PoolServices::default()
    };
    let dyn_store: Arc<dyn TaskStore> = store.clone();
    let swarm = Arc::new(Swarm::new(
        settings,
        dyn_store,
        options(dir.path(), max_parallel, min_priority),
        services,
    ));
    Fixture {
        root: dir.path().to_path_buf(),
        _root: dir,
        store,
        swarm,
        audit,
    }
}

async fn monitor_until(swarm: &Swarm, count: usize) -> bool {
    let deadline = tokio::time::Instant::now() + SETTLE;
    while tokio::time::Instant::now() < deadline {
        swarm.monitor().await;
        if swarm.completed_results().await.len() >= count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn poll_respects_capacity_and_priority_floor() {
    let fx = fixture(Some("sleep 30"), 2, 5);
    fx.store.insert(task("low", 2)).await.expect("insert");
    fx.store.insert(task("mid", 5)).await.expect("insert");
    fx.store.insert(task("high", 9)).await.expect("insert");
    fx.store.insert(task("higher", 10)).await.expect("insert");

    assert_eq!(fx.swarm.poll().await, 2);
    let status = fx.swarm.status().await;
    assert_eq!(status.mode, PoolMode::Dynamic);
    assert_eq!(status.capacity, 2);
    assert_eq!(status.active_count, 2);
    let running: Vec<String> = status
        .slots
        .iter()
        .filter_map(|s| s.task_id.as_ref().map(ToString::to_string))
        .collect();
    assert_eq!(running, vec!["higher", "high"]);

    assert_eq!(fx.store.status_of(&id("higher")).await, Some(TaskStatus::Active));
    assert_eq!(fx.store.status_of(&id("low")).await, Some(TaskStatus::Pending));
    assert_eq!(fx.swarm.poll().await, 0, "no capacity left");
    fx.swarm.shutdown().await;
}

#[tokio::test]
async fn direct_assignment_checks_duplicates_and_capacity() {
    let fx = fixture(Some("sleep 30"), 1, 1);

    let first = fx.swarm.assign_task(task("solo", 5)).await.expect("assign");
    assert_eq!(first.slot_index, Some(0));

    let dup = fx.swarm.assign_task(task("solo", 5)).await.expect_err("dup");
    assert!(matches!(dup, AppError::AlreadyActive(_)));
    let full = fx.swarm.assign_task(task("other", 5)).await.expect_err("full");
    assert!(matches!(full, AppError::SlotUnavailable(_)));
    fx.swarm.shutdown().await;
}

#[tokio::test]
async fn monitor_writes_outcome_back_to_store() {
    let fx = fixture(None, 2, 1);
    fx.store.insert(task("ok", 6)).await.expect("insert");

    assert_eq!(fx.swarm.poll().await, 1);
    assert!(monitor_until(&fx.swarm, 1).await);

    let stored = fx.store.get(&id("ok")).await.expect("stored");
    assert_eq!(stored.status, TaskStatus::Completed);
    assert!(stored
        .workspace_path
        .as_deref()
        .is_some_and(|p| p.ends_with("task-ok")));
    assert!(stored.artifacts.iter().any(|a| a == "solution.md"));

    assert_eq!(fx.swarm.status().await.slots.len(), 0, "capacity freed");
    assert_eq!(fx.audit.task_ids(PoolEventKind::TaskCompleted), vec!["ok"]);

    let body = fx
        .swarm
        .read_task_artifact(&id("ok"), "solution.md")
        .await
        .expect("artifact");
    assert!(body.contains("swarm answer"));
}

#[tokio::test]
async fn crashed_execution_is_written_back_as_failed() {
    let fx = fixture(Some("exit 1"), 1, 1);
    fx.store.insert(task("boom", 5)).await.expect("insert");

    fx.swarm.poll().await;
    assert!(monitor_until(&fx.swarm, 1).await);
    assert_eq!(fx.store.status_of(&id("boom")).await, Some(TaskStatus::Failed));
}

#[tokio::test]
async fn approve_copies_workspace() {
    let fx = fixture(None, 1, 1);
    fx.store.insert(task("good", 5)).await.expect("insert");
    fx.swarm.poll().await;
    assert!(monitor_until(&fx.swarm, 1).await);

    let destination = fx.swarm.approve(&id("good")).await.expect("approve");
    assert_eq!(destination, fx.root.join("approved").join("task-good"));
    let copied = std::fs::read_to_string(destination.join("solution.md")).expect("copied");
    assert!(copied.contains("swarm answer"));
    assert_eq!(fx.store.status_of(&id("good")).await, Some(TaskStatus::Approved));
    assert_eq!(fx.audit.task_ids(PoolEventKind::TaskApproved), vec!["good"]);

    // Approving again replaces the earlier copy.
    fx.swarm.approve(&id("good")).await.expect("re-approve");
}

#[tokio::test]
async fn approve_refuses_running_or_missing_workspace() {
    let fx = fixture(Some("sleep 30"), 1, 1);
    fx.swarm.assign_task(task("live", 5)).await.expect("assign");

    let running = fx.swarm.approve(&id("live")).await.expect_err("running");
    assert!(matches!(running, AppError::InvalidState(_)));
    let missing = fx.swarm.approve(&id("ghost")).await.expect_err("missing");
    assert!(matches!(missing, AppError::NotFound(_)));
    fx.swarm.shutdown().await;
}

#[tokio::test]
async fn approve_after_cleanup_is_not_found() {
    let fx = fixture(None, 1, 1);
    fx.swarm.assign_task(task("gone", 5)).await.expect("assign");
    assert!(monitor_until(&fx.swarm, 1).await);

    assert_eq!(fx.swarm.cleanup_workspace(&id("gone")).await.expect("cleanup"), 1);
    let err = fx.swarm.approve(&id("gone")).await.expect_err("deleted");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn reject_kills_live_execution() {
    let fx = fixture(Some("sleep 30"), 1, 1);
    fx.store.insert(task("nope", 5)).await.expect("insert");
    fx.swarm.poll().await;
    assert_eq!(fx.swarm.status().await.active_count, 1);

    fx.swarm.reject(&id("nope")).await.expect("reject");
    assert_eq!(fx.store.status_of(&id("nope")).await, Some(TaskStatus::Rejected));
    assert!(fx.swarm.status().await.slots.is_empty());
    assert_eq!(fx.swarm.monitor().await, 0, "rejected result is discarded");
    assert_eq!(fx.audit.task_ids(PoolEventKind::TaskRejected), vec!["nope"]);
}

#[tokio::test]
async fn reject_unknown_task_is_not_found() {
    let fx = fixture(Some("sleep 30"), 1, 1);
    let err = fx.swarm.reject(&id("nobody")).await.expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn reset_by_ordinal_records_failure() {
    let fx = fixture(Some("sleep 30"), 2, 1);
    fx.store.insert(task("cut", 5)).await.expect("insert");
    fx.swarm.poll().await;

    fx.swarm.reset_slot(0).await.expect("reset");
    assert_eq!(fx.store.status_of(&id("cut")).await, Some(TaskStatus::Failed));
    assert_eq!(fx.swarm.completed_results().await.len(), 1);
    let err = fx.swarm.reset_slot(0).await.expect_err("gone");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn ordinals_keep_increasing() {
    let fx = fixture(None, 1, 1);
    fx.swarm.assign_task(task("o1", 5)).await.expect("o1");
    assert!(monitor_until(&fx.swarm, 1).await);
    let second = fx.swarm.assign_task(task("o2", 5)).await.expect("o2");
    assert_eq!(second.slot_index, Some(1));
    assert!(monitor_until(&fx.swarm, 2).await);
}

#[tokio::test]
async fn pool_facade_drives_swarm_loops() {
    let fx = fixture(None, 2, 1);
    let pool = Pool::Dynamic(Arc::clone(&fx.swarm));
    assert_eq!(pool.mode(), PoolMode::Dynamic);
    let handles = pool.start();

    fx.store.insert(task("auto", 5)).await.expect("insert");
    let deadline = tokio::time::Instant::now() + SETTLE;
    while fx.store.status_of(&id("auto")).await != Some(TaskStatus::Completed)
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(fx.store.status_of(&id("auto")).await, Some(TaskStatus::Completed));

    let listed = pool
        .list_artifacts(&ArtifactTarget::Task(id("auto")))
        .await
        .expect("list");
    assert!(listed.iter().any(|a| a == "solution.md"));

    pool.shutdown().await;
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop stops")
            .expect("join");
    }
}
