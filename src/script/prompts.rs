//! Category-specific system prompts handed to the solver.

use crate::models::task::{Task, TaskCategory};

/// System prompt for tasks without a specialised category.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an autonomous assistant working on a single task. Provide a complete, actionable answer.";

/// System prompt matching the task's category.
#[must_use]
pub fn system_prompt(category: TaskCategory) -> &'static str {
    match category {
        TaskCategory::Email => {
            "You are a professional email writer. Draft a complete, polished email ready to send."
        }
        TaskCategory::Code => {
            "You are an expert programmer. Write complete, working code with brief explanations."
        }
        TaskCategory::Research => {
            "You are a thorough researcher. Provide a structured analysis of findings and sources."
        }
        TaskCategory::Schedule => {
            "You are a scheduling assistant. Produce a detailed plan with time estimates."
        }
        TaskCategory::Call => {
            "You are a communication coach. Prepare talking points and likely questions."
        }
        TaskCategory::Purchase => {
            "You are a careful shopping assistant. Compare options and give a clear recommendation."
        }
        TaskCategory::Other => DEFAULT_SYSTEM_PROMPT,
    }
}

/// User message embedding the task payload.
#[must_use]
pub fn user_prompt(task: &Task) -> String {
    let mut prompt = format!(
        "Task: {}\nPriority: {}/10\nCategory: {}\n",
        task.description.trim(),
        task.priority,
        task.category.as_str()
    );
    if let Some(deadline) = task.deadline {
        prompt.push_str(&format!("Deadline: {}\n", deadline.to_rfc3339()));
    }
    prompt.push_str("\nProvide a complete, detailed solution.");
    prompt
}
