//! Keyword-based intent detection.

use super::{Classification, ClassifierAction, Confidence};
use crate::models::task::TaskCategory;

const HIGH_SIGNALS: &[&str] = &[
    "need to",
    "have to",
    "must",
    "i'll",
    "going to",
    "make sure",
    "don't forget",
];

const MEDIUM_SIGNALS: &[&str] = &[
    "should",
    "maybe",
    "thinking about",
    "want to",
    "could",
    "might",
];

const URGENT_SIGNALS: &[&str] = &[
    "urgent",
    "asap",
    "immediately",
    "deadline",
    "emergency",
    "right now",
];

/// Category keyword table, checked in order; first hit wins.
const CATEGORY_KEYWORDS: &[(TaskCategory, &[&str])] = &[
    (TaskCategory::Email, &["email", "send", "reply", "inbox"]),
    (
        TaskCategory::Code,
        &["code", "build", "fix", "debug", "program", "website"],
    ),
    (
        TaskCategory::Research,
        &["research", "look up", "find out", "compare"],
    ),
    (
        TaskCategory::Schedule,
        &["meeting", "schedule", "calendar", "appointment"],
    ),
    (TaskCategory::Call, &["call", "phone", "text", "message"]),
    (TaskCategory::Purchase, &["buy", "order", "purchase", "shop"]),
];

/// Stateless phrase scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    /// Classify `text` by intent phrases.
    #[must_use]
    pub fn classify(self, text: &str) -> Classification {
        let lowered = text.to_lowercase();
        let contains_any = |signals: &[&str]| signals.iter().any(|s| lowered.contains(s));

        let high = contains_any(HIGH_SIGNALS);
        let medium = contains_any(MEDIUM_SIGNALS);
        if !high && !medium {
            return Classification::not_a_task("no intent phrase found");
        }
        let urgent = contains_any(URGENT_SIGNALS);

        let category = CATEGORY_KEYWORDS
            .iter()
            .find(|&&(_, words)| contains_any(words))
            .map_or(TaskCategory::Other, |(category, _)| *category);

        let urgency = if urgent {
            8
        } else if high {
            7
        } else {
            5
        };

        let task = text.trim().to_owned();
        Classification {
            is_task: true,
            confidence: if high {
                Confidence::High
            } else {
                Confidence::Medium
            },
            reply: format!("Noted: {task}"),
            task,
            category,
            urgency,
            deadline: None,
            reasoning: "keyword heuristic".into(),
            action: ClassifierAction::Ignore,
        }
        .routed()
    }
}
