//! OpenAI-compatible chat completions client.

use std::env;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Solver;
use crate::config::SolverConfig;
use crate::{AppError, Result};

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Thin client for a chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl ChatClient {
    /// Build a client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Solver` if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Solver(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            url: url.into(),
            model: model.into(),
            api_key,
        })
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one system/user exchange and return the first choice's text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Solver` on transport failure, a non-success
    /// status, or an empty reply.
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            max_tokens,
            temperature,
        };

        let mut request = self.http.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Solver(format!(
                "{} returned http {status}",
                self.url
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| AppError::Solver("solver returned an empty reply".into()))?;

        debug!(url = %self.url, chars = content.len(), "chat completion received");
        Ok(content)
    }

    /// Whether the endpoint answers at all.
    ///
    /// Any HTTP response, even an error status, counts as reachable; only
    /// transport failures do not.
    pub async fn is_reachable(&self) -> bool {
        self.http.get(&self.url).send().await.is_ok()
    }
}

/// Solver backed by a chat completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpSolver {
    client: ChatClient,
    max_tokens: u32,
    temperature: f32,
}

impl HttpSolver {
    /// Build from an `http` solver config. The bearer token, if any, is read
    /// from the configured environment variable at construction time.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Solver` if `config` is not the `http` variant or
    /// the client cannot be built.
    pub fn from_config(config: &SolverConfig) -> Result<Self> {
        let SolverConfig::Http {
            url,
            model,
            max_tokens,
            temperature,
            request_timeout_seconds,
            api_key_env,
        } = config
        else {
            return Err(AppError::Solver("not an http solver config".into()));
        };

        let api_key = api_key_env
            .as_deref()
            .and_then(|name| env::var(name).ok())
            .filter(|key| !key.is_empty());

        Ok(Self {
            client: ChatClient::new(
                url.clone(),
                model.clone(),
                api_key,
                Duration::from_secs(*request_timeout_seconds),
            )?,
            max_tokens: *max_tokens,
            temperature: *temperature,
        })
    }
}

impl Solver for HttpSolver {
    fn name(&self) -> &str {
        self.client.url()
    }

    fn solve<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            self.client
                .complete(system_prompt, user_prompt, self.max_tokens, self.temperature)
                .await
        })
    }
}
