use std::fs;

use shadow_pool::handoff::{
    self, StatusDocument, StatusState, LOG_FILE, PROGRAM_FILE, SOLUTION_FILE, STATUS_FILE,
};
use shadow_pool::AppError;

#[tokio::test]
async fn status_document_round_trips_through_workspace() {
    let temp = tempfile::tempdir().expect("tempdir");
    let doc = StatusDocument::new("t1", StatusState::Completed, "all done")
        .with_artifacts(vec!["solution.md".into()]);

    handoff::write_status(temp.path(), &doc).expect("write");
    let read = handoff::read_status(temp.path()).await.expect("present");

    assert_eq!(read, doc);
}

#[tokio::test]
async fn write_status_leaves_no_staging_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    for state in [StatusState::Running, StatusState::Completed] {
        handoff::write_status(temp.path(), &StatusDocument::new("t1", state, ""))
            .expect("write");
    }

    let names: Vec<String> = fs::read_dir(temp.path())
        .expect("read_dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![STATUS_FILE.to_owned()]);
}

#[tokio::test]
async fn missing_or_malformed_status_reads_as_none() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert!(handoff::read_status(temp.path()).await.is_none());

    fs::write(temp.path().join(STATUS_FILE), "{ not json").expect("write");
    assert!(handoff::read_status(temp.path()).await.is_none());
}

#[tokio::test]
async fn clear_status_is_idempotent() {
    let temp = tempfile::tempdir().expect("tempdir");
    handoff::write_status(
        temp.path(),
        &StatusDocument::new("t1", StatusState::Failed, "boom"),
    )
    .expect("write");

    handoff::clear_status(temp.path()).await.expect("first clear");
    handoff::clear_status(temp.path()).await.expect("second clear");
    assert!(!temp.path().join(STATUS_FILE).exists());
}

#[tokio::test]
async fn append_log_stamps_each_line() {
    let temp = tempfile::tempdir().expect("tempdir");
    handoff::append_log(temp.path(), "started").await.expect("log");
    handoff::append_log(temp.path(), "finished").await.expect("log");

    let log = fs::read_to_string(temp.path().join(LOG_FILE)).expect("read");
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with('[') && lines[0].ends_with("] started"));
    assert!(lines[1].ends_with("] finished"));
}

#[tokio::test]
async fn list_artifacts_skips_protocol_files_and_recurses() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    fs::write(root.join(PROGRAM_FILE), "{}").expect("write");
    fs::write(root.join(LOG_FILE), "").expect("write");
    fs::write(root.join(SOLUTION_FILE), "answer").expect("write");
    fs::create_dir_all(root.join("src/bin")).expect("mkdir");
    fs::write(root.join("src/bin/main.rs"), "fn main() {}").expect("write");
    handoff::write_status(root, &StatusDocument::new("t1", StatusState::Running, ""))
        .expect("write");

    let artifacts = handoff::list_artifacts(root).await.expect("list");
    assert_eq!(artifacts, vec!["solution.md".to_owned(), "src/bin/main.rs".to_owned()]);
}

#[tokio::test]
async fn read_artifact_returns_content() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join(SOLUTION_FILE), "# Result\n").expect("write");

    let content = handoff::read_artifact(temp.path(), SOLUTION_FILE)
        .await
        .expect("read");
    assert_eq!(content, "# Result\n");
}

#[tokio::test]
async fn read_artifact_rejects_traversal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let err = handoff::read_artifact(temp.path(), "../../etc/passwd")
        .await
        .expect_err("traversal");
    assert!(matches!(err, AppError::AccessDenied(_)));
}

#[tokio::test]
async fn read_artifact_reports_missing_files_and_directories() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(temp.path().join("dir")).expect("mkdir");

    let missing = handoff::read_artifact(temp.path(), "nope.txt")
        .await
        .expect_err("missing");
    assert!(matches!(missing, AppError::NotFound(_)));

    let dir = handoff::read_artifact(temp.path(), "dir")
        .await
        .expect_err("directory");
    assert!(matches!(dir, AppError::NotFound(_)));
}

#[test]
fn internal_file_names_are_recognised() {
    assert!(handoff::is_internal_file(STATUS_FILE));
    assert!(handoff::is_internal_file("status.json.a1b2.tmp"));
    assert!(handoff::is_internal_file(PROGRAM_FILE));
    assert!(!handoff::is_internal_file(SOLUTION_FILE));
}
