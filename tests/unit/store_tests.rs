use std::path::Path;

use shadow_pool::models::task::{Task, TaskCategory, TaskId, TaskStatus};
use shadow_pool::store::{MemoryTaskStore, SqliteTaskStore, TaskStore};
use shadow_pool::AppError;

fn task(id: &str, priority: u8) -> Task {
    Task::new(
        TaskId::parse(id).expect("id"),
        format!("task {id}"),
        TaskCategory::Code,
        priority,
    )
    .expect("task")
}

fn ids(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(|t| t.id.as_str()).collect()
}

#[tokio::test]
async fn sqlite_pending_tasks_are_filtered_and_ordered() {
    let store = SqliteTaskStore::in_memory().await.expect("store");
    for (id, priority) in [("low", 3), ("mid-a", 6), ("high", 9), ("mid-b", 6)] {
        store.insert(&task(id, priority)).await.expect("insert");
    }

    let pending = store.pending_tasks(5).await.expect("pending");
    assert_eq!(ids(&pending), vec!["high", "mid-a", "mid-b"]);
}

#[tokio::test]
async fn sqlite_status_updates_remove_tasks_from_pending() {
    let store = SqliteTaskStore::in_memory().await.expect("store");
    store.insert(&task("t1", 7)).await.expect("insert");
    let id = TaskId::parse("t1").expect("id");

    store
        .update_status(&id, TaskStatus::Active)
        .await
        .expect("update");
    assert!(store.pending_tasks(1).await.expect("pending").is_empty());

    let stored = store.get(&id).await.expect("get").expect("present");
    assert_eq!(stored.status, TaskStatus::Active);
}

#[tokio::test]
async fn sqlite_unknown_task_update_is_not_found() {
    let store = SqliteTaskStore::in_memory().await.expect("store");
    let err = store
        .update_status(&TaskId::parse("ghost").expect("id"), TaskStatus::Failed)
        .await
        .expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn sqlite_records_workspace_and_artifacts() {
    let store = SqliteTaskStore::in_memory().await.expect("store");
    store.insert(&task("t1", 7)).await.expect("insert");
    let id = TaskId::parse("t1").expect("id");

    store
        .record_workspace(&id, Path::new("/ws/task-t1"), &["solution.md".to_owned()])
        .await
        .expect("record");

    let stored = store.get(&id).await.expect("get").expect("present");
    assert_eq!(stored.workspace_path.as_deref(), Some("/ws/task-t1"));
    assert_eq!(stored.artifacts, vec!["solution.md".to_owned()]);
}

#[tokio::test]
async fn sqlite_file_store_persists_across_reopen() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("shadow.db");
    {
        let store = SqliteTaskStore::open(&path).await.expect("open");
        store.insert(&task("kept", 8)).await.expect("insert");
    }
    let reopened = SqliteTaskStore::open(&path).await.expect("reopen");
    let pending = reopened.pending_tasks(5).await.expect("pending");
    assert_eq!(ids(&pending), vec!["kept"]);
}

#[tokio::test]
async fn memory_store_matches_sqlite_ordering() {
    let store = MemoryTaskStore::new();
    for (id, priority) in [("low", 3), ("mid-a", 6), ("high", 9), ("mid-b", 6)] {
        store.insert(task(id, priority)).await.expect("insert");
    }
    let pending = store.pending_tasks(5).await.expect("pending");
    assert_eq!(pending.len(), 3);
    assert_eq!(pending[0].id.as_str(), "high");
}

#[tokio::test]
async fn memory_store_rejects_duplicates_and_tracks_status() {
    let store = MemoryTaskStore::new();
    store.insert(task("t1", 5)).await.expect("insert");
    assert!(matches!(
        store.insert(task("t1", 5)).await,
        Err(AppError::AlreadyActive(_))
    ));

    let id = TaskId::parse("t1").expect("id");
    store
        .update_status(&id, TaskStatus::Approved)
        .await
        .expect("update");
    assert_eq!(store.status_of(&id).await, Some(TaskStatus::Approved));
}
