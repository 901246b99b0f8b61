use std::path::Path;

use chrono::{TimeZone, Utc};
use shadow_pool::config::SolverConfig;
use shadow_pool::handoff::{PROGRAM_FILE, STATUS_FILE};
use shadow_pool::mode::ExecutionMode;
use shadow_pool::models::task::{Task, TaskCategory, TaskId};
use shadow_pool::script::{prompts, TaskProgram, TaskScript};

fn task(category: TaskCategory) -> Task {
    Task::new(
        TaskId::parse("t1").expect("id"),
        "Draft the quarterly update",
        category,
        8,
    )
    .expect("task")
}

#[test]
fn render_embeds_prompts_and_paths() {
    let program = TaskScript::new(task(TaskCategory::Email)).render(Path::new("/ws/slot-0-t1"));

    assert_eq!(program.system_prompt, prompts::system_prompt(TaskCategory::Email));
    assert!(program
        .user_prompt
        .starts_with("Task: Draft the quarterly update\nPriority: 8/10\nCategory: email\n"));
    assert!(program.user_prompt.ends_with("Provide a complete, detailed solution."));
    assert_eq!(program.status_path, Path::new("/ws/slot-0-t1").join(STATUS_FILE));
    assert_eq!(program.execution_mode, ExecutionMode::Streaming);
}

#[test]
fn deadline_appears_in_user_prompt() {
    let deadline = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("date");
    let prompt = prompts::user_prompt(&task(TaskCategory::Schedule).with_deadline(deadline));
    assert!(prompt.contains("Deadline: 2026-03-01T09:00:00+00:00\n"));
}

#[test]
fn other_category_uses_default_prompt() {
    assert_eq!(
        prompts::system_prompt(TaskCategory::Other),
        prompts::DEFAULT_SYSTEM_PROMPT
    );
    assert_ne!(
        prompts::system_prompt(TaskCategory::Code),
        prompts::DEFAULT_SYSTEM_PROMPT
    );
}

#[test]
fn cpu_limit_only_applies_to_batch_programs() {
    let streaming = TaskScript::new(task(TaskCategory::Code))
        .cpu_limit_seconds(90)
        .render(Path::new("/ws"));
    assert_eq!(streaming.cpu_limit_seconds, None);

    let batch = TaskScript::new(task(TaskCategory::Code))
        .execution_mode(ExecutionMode::Batch)
        .cpu_limit_seconds(90)
        .render(Path::new("/ws"));
    assert_eq!(batch.cpu_limit_seconds, Some(90));

    let unlimited = TaskScript::new(task(TaskCategory::Code))
        .execution_mode(ExecutionMode::Batch)
        .cpu_limit_seconds(0)
        .render(Path::new("/ws"));
    assert_eq!(unlimited.cpu_limit_seconds, None);
}

#[tokio::test]
async fn program_file_round_trips() {
    let temp = tempfile::tempdir().expect("tempdir");
    let solver = SolverConfig::Command {
        program: "sh".into(),
        args: vec!["-c".into(), "echo hi".into()],
    };
    let program = TaskScript::new(task(TaskCategory::Research))
        .solver(solver)
        .render(temp.path());

    let path = program.write().await.expect("write");
    assert_eq!(path, temp.path().join(PROGRAM_FILE));
    let loaded = TaskProgram::load(&path).await.expect("load");
    assert_eq!(loaded, program);
}
