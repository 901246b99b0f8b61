//! Chat-endpoint-backed intent detection.

use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use super::{Classification, ClassifierAction, Confidence};
use crate::config::SolverConfig;
use crate::models::task::TaskCategory;
use crate::solver::ChatClient;
use crate::{AppError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_TOKENS: u32 = 500;
const TEMPERATURE: f32 = 0.1;
const CONTEXT_LINES: usize = 5;

const EXTRACTION_PROMPT: &str = r#"You analyze one spoken sentence for a personal assistant.
Decide whether it describes something that needs to be done, how sure you are,
and extract the task.

Rules:
- "I need to ..." or "I have to ..." is a high-confidence task.
- "Maybe I should ..." is a medium-confidence task.
- Small talk and factual questions are not tasks; use confidence "low".

Answer with JSON only:
{
  "is_task": true or false,
  "confidence": "high" | "medium" | "low",
  "task": "task description",
  "reply": "short natural response to the speaker",
  "category": "email|code|research|schedule|call|purchase|other",
  "urgency": 1-10,
  "deadline": "deadline as stated, or null",
  "reasoning": "one sentence"
}"#;

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default)]
    is_task: bool,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    task: Option<String>,
    #[serde(default, alias = "shadow_reply")]
    reply: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    urgency: Option<serde_json::Value>,
    #[serde(default)]
    deadline: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

impl RawClassification {
    fn into_classification(self, text: &str) -> Classification {
        let confidence = match self.confidence.as_deref().map(str::to_ascii_lowercase) {
            Some(ref c) if c == "high" => Confidence::High,
            Some(ref c) if c == "medium" => Confidence::Medium,
            _ => Confidence::Low,
        };
        let urgency = self
            .urgency
            .as_ref()
            .and_then(|value| match value {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .and_then(|u| u8::try_from(u.clamp(1, 10)).ok())
            .unwrap_or(5);

        Classification {
            is_task: self.is_task,
            confidence,
            task: self
                .task
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| text.trim().to_owned()),
            category: TaskCategory::parse_lenient(self.category.as_deref().unwrap_or("other")),
            urgency,
            deadline: self.deadline.filter(|d| !d.is_empty() && d != "null"),
            reply: self.reply.unwrap_or_default(),
            reasoning: self.reasoning.unwrap_or_default(),
            action: ClassifierAction::Ignore,
        }
        .routed()
    }
}

/// Recovers a classification from a free-form model reply.
///
/// Accepts bare JSON, JSON inside Markdown code fences, or the first flat
/// JSON object embedded in prose.
#[derive(Debug, Clone)]
pub struct ReplyParser {
    fence: Regex,
    object: Regex,
}

impl ReplyParser {
    /// Compile the reply patterns.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Solver` if a pattern fails to compile.
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|err| AppError::Solver(format!("bad pattern: {err}")))
        };
        Ok(Self {
            fence: compile(r"```(?:json)?\s*")?,
            object: compile(r"(?s)\{[^{}]*\}")?,
        })
    }

    /// Parse `reply`; `text` is the classified input, used when the reply
    /// omits the task description.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Solver` if no JSON object can be recovered.
    pub fn parse(&self, reply: &str, text: &str) -> Result<Classification> {
        let stripped = self.fence.replace_all(reply, "");
        let stripped = stripped.trim();

        if let Ok(raw) = serde_json::from_str::<RawClassification>(stripped) {
            return Ok(raw.into_classification(text));
        }
        self.object
            .find(stripped)
            .and_then(|m| serde_json::from_str::<RawClassification>(m.as_str()).ok())
            .map(|raw| raw.into_classification(text))
            .ok_or_else(|| AppError::Solver("classifier reply contained no JSON object".into()))
    }
}

/// Classifier that asks the chat endpoint.
#[derive(Debug, Clone)]
pub struct ModelClassifier {
    client: ChatClient,
    parser: ReplyParser,
}

impl ModelClassifier {
    /// Build from the solver's `http` settings with a short timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Solver` if `solver` is not the `http` variant or
    /// the client cannot be built.
    pub fn from_config(solver: &SolverConfig) -> Result<Self> {
        let SolverConfig::Http {
            url,
            model,
            api_key_env,
            ..
        } = solver
        else {
            return Err(AppError::Solver("model classifier needs an http solver".into()));
        };
        let api_key = api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty());
        Ok(Self {
            client: ChatClient::new(url.clone(), model.clone(), api_key, REQUEST_TIMEOUT)?,
            parser: ReplyParser::new()?,
        })
    }

    /// Whether the endpoint is reachable.
    pub async fn is_available(&self) -> bool {
        self.client.is_reachable().await
    }

    /// Classify `text` with recent `context`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Solver` if the request fails or the reply cannot
    /// be parsed.
    pub async fn classify(&self, text: &str, context: &[String]) -> Result<Classification> {
        let mut prompt = format!("Analyze this speech:\n\"{}\"", text.trim());
        let recent = &context[context.len().saturating_sub(CONTEXT_LINES)..];
        if !recent.is_empty() {
            prompt.push_str("\n\nRecent context:");
            for line in recent {
                prompt.push_str("\n- ");
                prompt.push_str(line);
            }
        }
        let reply = self
            .client
            .complete(EXTRACTION_PROMPT, &prompt, MAX_TOKENS, TEMPERATURE)
            .await?;
        self.parser.parse(&reply, text)
    }
}
