use std::fs;

use shadow_pool::handoff::resolve_within;
use shadow_pool::AppError;

#[test]
fn plain_relative_path_resolves_inside() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(temp.path().join("docs")).expect("mkdir");
    fs::write(temp.path().join("docs/notes.md"), "x").expect("write");

    let resolved = resolve_within(temp.path(), "docs/notes.md").expect("inside");
    let root = temp.path().canonicalize().expect("root");
    assert_eq!(resolved, root.join("docs/notes.md"));
}

#[test]
fn missing_target_is_still_resolved() {
    let temp = tempfile::tempdir().expect("tempdir");
    let resolved = resolve_within(temp.path(), "later/file.txt").expect("inside");
    assert!(resolved.ends_with("later/file.txt"));
}

#[test]
fn inner_parent_segments_are_allowed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let resolved = resolve_within(temp.path(), "a/../b.txt").expect("inside");
    assert!(resolved.ends_with("b.txt"));
}

#[test]
fn escaping_parent_segments_are_denied() {
    let temp = tempfile::tempdir().expect("tempdir");
    let err = resolve_within(temp.path(), "../../etc/passwd").expect_err("escape");
    assert!(matches!(err, AppError::AccessDenied(_)));
}

#[test]
fn absolute_paths_are_denied() {
    let temp = tempfile::tempdir().expect("tempdir");
    let err = resolve_within(temp.path(), "/etc/passwd").expect_err("absolute");
    assert!(matches!(err, AppError::AccessDenied(_)));
}

#[cfg(unix)]
#[test]
fn symlink_escape_is_denied() {
    let outside = tempfile::tempdir().expect("outside");
    fs::write(outside.path().join("secret.txt"), "secret").expect("write");
    let temp = tempfile::tempdir().expect("tempdir");
    std::os::unix::fs::symlink(outside.path().join("secret.txt"), temp.path().join("link"))
        .expect("symlink");

    let err = resolve_within(temp.path(), "link").expect_err("symlink escape");
    assert!(matches!(err, AppError::AccessDenied(_)));
}

#[test]
fn missing_workspace_is_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let err = resolve_within(&temp.path().join("gone"), "a.txt").expect_err("no root");
    assert!(matches!(err, AppError::NotFound(_)));
}
