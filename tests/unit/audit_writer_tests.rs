use std::fs;
use std::sync::Arc;

use chrono::Utc;
use shadow_pool::audit::{AuditLogger, JsonlAuditWriter, PoolEvent, PoolEventKind};
use shadow_pool::models::task::TaskId;

#[test]
fn new_creates_directory_if_missing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log_dir = temp.path().join("nested").join("logs");

    let writer = JsonlAuditWriter::new(log_dir.clone()).expect("writer");
    writer
        .log_event(PoolEvent::new(PoolEventKind::SlotReset).with_slot(2))
        .expect("write");

    assert!(writer.path_for(Utc::now().date_naive()).exists());
}

#[test]
fn events_are_written_as_jsonl() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = JsonlAuditWriter::new(temp.path().to_path_buf()).expect("writer");
    let id = TaskId::parse("t1").expect("id");

    writer
        .log_event(
            PoolEvent::new(PoolEventKind::TaskAssigned)
                .with_task(&id)
                .with_slot(0),
        )
        .expect("write");
    writer
        .log_event(
            PoolEvent::new(PoolEventKind::TaskTimedOut)
                .with_task(&id)
                .with_detail("timed out after 2s"),
        )
        .expect("write");

    let raw = fs::read_to_string(writer.path_for(Utc::now().date_naive())).expect("read");
    let events: Vec<serde_json::Value> = raw
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["kind"], "task_assigned");
    assert_eq!(events[0]["slot_index"], 0);
    assert_eq!(events[1]["kind"], "task_timed_out");
    assert_eq!(events[1]["detail"], "timed out after 2s");
}

#[test]
fn concurrent_writes_stay_line_aligned() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = Arc::new(JsonlAuditWriter::new(temp.path().to_path_buf()).expect("writer"));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let writer = Arc::clone(&writer);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    writer
                        .log_event(PoolEvent::new(PoolEventKind::TaskQueued).with_slot(i))
                        .expect("write");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }

    let raw = fs::read_to_string(writer.path_for(Utc::now().date_naive())).expect("read");
    assert_eq!(raw.lines().count(), 80);
    for line in raw.lines() {
        serde_json::from_str::<serde_json::Value>(line).expect("valid json");
    }
}
