//! Chat-completion model access.
//!
//! [`ChatModel`] is the single seam to the hosted model: messages in, text
//! out. [`OpenAiChat`] talks to an OpenAI-compatible endpoint, [`Throttled`]
//! enforces the wait before every call, and [`AgentSession`] keeps the agent
//! conversation for one publication.

use crate::config::LlmConfig;
use crate::error::{Result, SkgcError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a conversation, in OpenAI wire format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    /// Content of the last user message, or "" if there is none.
    pub fn last_user(messages: &[ChatMessage]) -> &str {
        messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// A generative model reached over the network.
///
/// Implementations return the generated text. Empty or malformed text is
/// returned as-is; only transport problems are errors.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Token usage tracking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Accumulated token usage with atomic counters
#[derive(Debug, Default)]
struct AtomicTokenUsage {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    total_tokens: AtomicU64,
}

impl AtomicTokenUsage {
    fn add(&self, usage: &TokenUsage) {
        self.prompt_tokens.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens.fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.total_tokens.fetch_add(usage.total_tokens, Ordering::Relaxed);
    }

    fn get(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
        }
    }
}

/// OpenAI-compatible request body
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

/// OpenAI-compatible API response structures
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

/// Client for an OpenAI-compatible chat completions endpoint.
///
/// One instance per API key; the agent and the assistant role each get
/// their own.
pub struct OpenAiChat {
    client: reqwest::Client,
    url: String,
    api_key: String,
    organization: Option<String>,
    model: String,
    temperature: f32,
    seed: Option<u64>,
    rate_limit_retries: usize,
    rate_limit_backoff: Duration,
    usage: AtomicTokenUsage,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SkgcError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.completions_url(),
            api_key: api_key.to_string(),
            organization: config.organization.clone().filter(|o| !o.trim().is_empty()),
            model: config.model.clone(),
            temperature: config.temperature,
            seed: config.seed,
            rate_limit_retries: config.rate_limit_retries,
            rate_limit_backoff: config.rate_limit_backoff,
            usage: AtomicTokenUsage::default(),
        })
    }

    /// Tokens consumed by this client so far
    pub fn usage(&self) -> TokenUsage {
        self.usage.get()
    }
}

impl OpenAiChat {
    /// One request. A 429 maps to [`SkgcError::RateLimited`] with the
    /// service's `retry-after` seconds (0 if absent).
    async fn send_once(&self, messages: &[ChatMessage]) -> Result<String> {
        let request_body = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            seed: self.seed,
        };

        debug!(model = %self.model, messages = messages.len(), "Sending LLM request");

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body);
        if let Some(ref organization) = self.organization {
            request = request.header("OpenAI-Organization", organization);
        }

        let response = request.send().await.map_err(SkgcError::Network)?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(0);
            return Err(SkgcError::RateLimited(retry_after));
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SkgcError::Api {
                code: status.as_u16(),
                message: format!("LLM API error: {} - {}", status, error_text),
            });
        }

        let body = response.text().await.map_err(SkgcError::Network)?;
        let api_response: ChatCompletionResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                // Malformed output goes on to the format check like any other bad answer
                warn!(model = %self.model, error = %e, "Unreadable LLM response, passing on empty text");
                return Ok(String::new());
            }
        };

        if let Some(u) = api_response.usage {
            self.usage.add(&TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });
        }

        // Empty output is passed on for validation
        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    /// Retries 429 responses with exponential backoff, at most
    /// `rate_limit_retries` times.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut backoff = self.rate_limit_backoff;
        let mut retries = 0;

        loop {
            match self.send_once(messages).await {
                Err(SkgcError::RateLimited(secs)) if retries < self.rate_limit_retries => {
                    retries += 1;
                    let wait = Duration::from_secs(secs).max(backoff);
                    warn!(
                        model = %self.model,
                        attempt = retries,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited, waiting"
                    );
                    tokio::time::sleep(wait).await;
                    backoff *= 2;
                }
                other => return other,
            }
        }
    }
}

/// Sleeps before every call to stay under the service's rate limit.
///
/// Calls are issued strictly one after another; this wait is the only
/// scheduling in the system.
pub struct Throttled {
    inner: Arc<dyn ChatModel>,
    delay: Duration,
}

impl Throttled {
    pub fn new(inner: Arc<dyn ChatModel>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl ChatModel for Throttled {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        if !self.delay.is_zero() {
            debug!(delay_ms = self.delay.as_millis() as u64, "Waiting before model call");
            tokio::time::sleep(self.delay).await;
        }
        self.inner.chat(messages).await
    }
}

/// Agent conversation for one publication.
///
/// The history holds the persona, every prompt, and the *validated* answer
/// to it; raw answers never enter the history.
pub struct AgentSession {
    model: Arc<dyn ChatModel>,
    history: Vec<ChatMessage>,
}

impl AgentSession {
    pub fn new(model: Arc<dyn ChatModel>, persona: &str) -> Self {
        Self {
            model,
            history: vec![ChatMessage::system(persona)],
        }
    }

    /// Send `prompt` with the full history and return the raw answer.
    pub async fn ask(&mut self, prompt: &str) -> Result<String> {
        self.history.push(ChatMessage::user(prompt));
        self.model.chat(&self.history).await
    }

    /// Record the validated answer to the last prompt.
    pub fn record(&mut self, validated: &str) {
        self.history.push(ChatMessage::assistant(validated));
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn into_history(self) -> Vec<ChatMessage> {
        self.history
    }
}

type Responder = dyn Fn(&[ChatMessage]) -> Result<String> + Send + Sync;

/// Deterministic model for tests and offline runs.
///
/// Answers from a queue of scripted replies, or from a closure once the
/// queue is empty. Every conversation it receives is recorded.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String>>>,
    responder: Option<Box<Responder>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    /// Reply with `replies` in order.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            responder: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply by calling `f` with the conversation.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            replies: Mutex::new(VecDeque::new()),
            responder: Some(Box::new(f)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue an error as the next scripted reply.
    pub fn then_fail(self, error: SkgcError) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(error));
        self
    }

    /// Conversations received so far
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());

        let queued = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match (queued, &self.responder) {
            (Some(reply), _) => reply,
            (None, Some(responder)) => responder(messages),
            (None, None) => Err(SkgcError::Parse(
                "Scripted model has no reply left".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_agent_session_records_validated_answers() {
        let model = Arc::new(ScriptedModel::new(["raw one", "raw two"]));
        let mut session = AgentSession::new(model.clone(), "persona");

        assert_eq!(session.ask("first").await.unwrap(), "raw one");
        session.record("clean one");
        assert_eq!(session.ask("second").await.unwrap(), "raw two");

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[1],
            vec![
                ChatMessage::system("persona"),
                ChatMessage::user("first"),
                ChatMessage::assistant("clean one"),
                ChatMessage::user("second"),
            ]
        );
    }

    #[tokio::test]
    async fn test_scripted_model_falls_back_to_closure() {
        let model = ScriptedModel::from_fn(|messages| {
            Ok(format!("echo: {}", ChatMessage::last_user(messages)))
        });
        let reply = model.chat(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(reply, "echo: hi");
    }

    #[tokio::test]
    async fn test_scripted_model_queued_error() {
        let model = ScriptedModel::new(["ok"]).then_fail(SkgcError::Api {
            code: 503,
            message: "unavailable".to_string(),
        });
        assert_eq!(model.chat(&[]).await.unwrap(), "ok");
        assert!(model.chat(&[]).await.unwrap_err().is_transport());
        assert!(model.chat(&[]).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_waits_before_every_call() {
        let inner = Arc::new(ScriptedModel::new(["a", "b", "c"]));
        let throttled = Throttled::new(inner.clone(), Duration::from_secs(10));

        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            throttled.chat(&[ChatMessage::user("x")]).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(inner.call_count(), 3);
    }

    #[tokio::test]
    async fn test_zero_delay_does_not_sleep() {
        let inner = Arc::new(ScriptedModel::new(["a"]));
        let throttled = Throttled::new(inner, Duration::ZERO);
        let start = Instant::now();
        throttled.chat(&[]).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_last_user_message() {
        let messages = vec![
            ChatMessage::system("s"),
            ChatMessage::user("u1"),
            ChatMessage::assistant("a"),
            ChatMessage::user("u2"),
        ];
        assert_eq!(ChatMessage::last_user(&messages), "u2");
        assert_eq!(ChatMessage::last_user(&[]), "");
    }
}
