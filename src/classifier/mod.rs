//! Turning free-form input into candidate tasks.
//!
//! Two variants share one output shape: [`ModelClassifier`] asks the chat
//! endpoint, [`KeywordClassifier`] scans for intent phrases. Which one
//! serves requests is decided once, by [`Classifier::select`], from a single
//! reachability probe.

pub mod keyword;
pub mod model;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SolverConfig;
use crate::models::task::{Task, TaskCategory, TaskId};
use crate::Result;

pub use keyword::KeywordClassifier;
pub use model::ModelClassifier;

/// Inputs shorter than this are never tasks.
pub const MIN_INPUT_CHARS: usize = 5;

/// How sure the classifier is that the input is a task.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Explicit commitment ("I need to ...").
    High,
    /// Tentative intent ("maybe I should ...").
    Medium,
    /// Conversation or noise.
    #[default]
    Low,
}

/// What the caller should do with a classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierAction {
    /// Add the task without confirmation.
    AutoAdd,
    /// Ask the operator first.
    Suggest,
    /// Not a task.
    Ignore,
}

/// Result of classifying one input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Classification {
    /// Whether the input describes something to be done.
    pub is_task: bool,
    /// Certainty of `is_task`.
    pub confidence: Confidence,
    /// Extracted task description.
    pub task: String,
    /// Task category.
    pub category: TaskCategory,
    /// Suggested priority, 1 to 10.
    pub urgency: u8,
    /// Deadline as stated, if any.
    pub deadline: Option<String>,
    /// Short conversational reply.
    pub reply: String,
    /// One-sentence rationale.
    pub reasoning: String,
    /// Derived routing decision.
    pub action: ClassifierAction,
}

impl Classification {
    /// Classification for input that is not a task.
    #[must_use]
    pub fn not_a_task(reasoning: impl Into<String>) -> Self {
        Self {
            is_task: false,
            confidence: Confidence::Low,
            task: String::new(),
            category: TaskCategory::Other,
            urgency: 0,
            deadline: None,
            reply: String::new(),
            reasoning: reasoning.into(),
            action: ClassifierAction::Ignore,
        }
    }

    /// Recompute `action` from `is_task` and `confidence`.
    #[must_use]
    pub fn routed(mut self) -> Self {
        self.action = match (self.is_task, self.confidence) {
            (true, Confidence::High) => ClassifierAction::AutoAdd,
            (true, Confidence::Medium) => ClassifierAction::Suggest,
            _ => ClassifierAction::Ignore,
        };
        self
    }

    /// Build a pool task from an actionable classification.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the classification is not a task
    /// or its description is empty.
    pub fn to_task(&self, id: TaskId) -> Result<Task> {
        if !self.is_task {
            return Err(crate::AppError::InvalidState(
                "classification is not a task".into(),
            ));
        }
        Task::new(id, self.task.clone(), self.category, self.urgency.clamp(1, 10))
    }
}

/// Classifier capability, fixed at construction.
#[derive(Debug, Clone)]
pub enum Classifier {
    /// Backed by the chat completions endpoint.
    ModelBacked(ModelClassifier),
    /// Keyword scan only.
    KeywordHeuristic(KeywordClassifier),
}

impl Classifier {
    /// Probe the configured endpoint once and pick the variant.
    ///
    /// Command solvers and unreachable endpoints select the keyword
    /// heuristic.
    pub async fn select(solver: &SolverConfig) -> Self {
        let SolverConfig::Http { .. } = solver else {
            info!("classifier: keyword heuristic (no chat endpoint configured)");
            return Self::KeywordHeuristic(KeywordClassifier);
        };
        match ModelClassifier::from_config(solver) {
            Ok(model) if model.is_available().await => {
                info!("classifier: model backed");
                Self::ModelBacked(model)
            }
            Ok(_) => {
                warn!("classifier: chat endpoint unreachable, using keyword heuristic");
                Self::KeywordHeuristic(KeywordClassifier)
            }
            Err(err) => {
                warn!(%err, "classifier: cannot build model client, using keyword heuristic");
                Self::KeywordHeuristic(KeywordClassifier)
            }
        }
    }

    /// Variant name for logs and status output.
    #[must_use]
    pub fn variant(&self) -> &'static str {
        match self {
            Self::ModelBacked(_) => "model_backed",
            Self::KeywordHeuristic(_) => "keyword_heuristic",
        }
    }

    /// Classify `text`, using up to the last five `context` lines.
    ///
    /// A failed model call degrades to the keyword heuristic for that
    /// input only.
    pub async fn classify(&self, text: &str, context: &[String]) -> Classification {
        if text.trim().chars().count() < MIN_INPUT_CHARS {
            return Classification::not_a_task("input too short");
        }
        match self {
            Self::KeywordHeuristic(keyword) => keyword.classify(text),
            Self::ModelBacked(model) => match model.classify(text, context).await {
                Ok(classification) => classification,
                Err(err) => {
                    warn!(%err, "model classification failed, using keyword heuristic");
                    KeywordClassifier.classify(text)
                }
            },
        }
    }
}
