//! Run configuration for the model service.

use crate::error::{Result, SkgcError};
use std::time::Duration;

/// Default OpenAI-compatible endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default chat model
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Wait before every model call. Sized for a 30k tokens-per-minute tier with
/// conversations of roughly 5k tokens.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(10);

/// Request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Retries after a 429 before the call fails
pub const DEFAULT_RATE_LIMIT_RETRIES: usize = 3;

/// First wait after a 429 when the service sends no `retry-after`; doubles per retry
pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);

/// Assistant calls allowed per validated step
pub const DEFAULT_VALIDATION_ATTEMPTS: usize = 3;

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Key for the agent role (extraction and evaluation)
    pub agent_api_key: String,
    /// Key for the assistant role (format checks)
    pub assistant_api_key: String,
    pub organization: Option<String>,
    pub request_delay: Duration,
    pub request_timeout: Duration,
    pub temperature: f32,
    pub seed: Option<u64>,
    pub validation_attempts: usize,
    pub rate_limit_retries: usize,
    pub rate_limit_backoff: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            agent_api_key: String::new(),
            assistant_api_key: String::new(),
            organization: None,
            request_delay: DEFAULT_REQUEST_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            temperature: 0.0,
            seed: Some(4),
            validation_attempts: DEFAULT_VALIDATION_ATTEMPTS,
            rate_limit_retries: DEFAULT_RATE_LIMIT_RETRIES,
            rate_limit_backoff: DEFAULT_RATE_LIMIT_BACKOFF,
        }
    }
}

impl LlmConfig {
    /// Reject configurations that would fail on the first call.
    pub fn validate(&self) -> Result<()> {
        if self.agent_api_key.trim().is_empty() {
            return Err(SkgcError::Config(
                "Agent API key not set (--agent-key or API_KEY_AGENT)".to_string(),
            ));
        }
        if self.assistant_api_key.trim().is_empty() {
            return Err(SkgcError::Config(
                "Assistant API key not set (--assistant-key or API_KEY_ASSISTANT)".to_string(),
            ));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| SkgcError::Config(format!("Invalid base URL '{}': {}", self.base_url, e)))?;
        if self.model.trim().is_empty() {
            return Err(SkgcError::Config("Model name is empty".to_string()));
        }
        if self.validation_attempts == 0 {
            return Err(SkgcError::Config(
                "Validation attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Chat completions endpoint derived from the base URL
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> LlmConfig {
        LlmConfig {
            agent_api_key: "sk-agent".to_string(),
            assistant_api_key: "sk-assistant".to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_defaults_are_reproducible() {
        let config = LlmConfig::default();
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.seed, Some(4));
        assert_eq!(config.request_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_validate_requires_keys() {
        assert!(LlmConfig::default().validate().is_err());
        configured().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_url_and_zero_attempts() {
        let bad_url = LlmConfig {
            base_url: "not a url".to_string(),
            ..configured()
        };
        assert!(bad_url.validate().is_err());

        let zero = LlmConfig {
            validation_attempts: 0,
            ..configured()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_completions_url_trims_slash() {
        let config = LlmConfig {
            base_url: "http://localhost:8080/v1/".to_string(),
            ..configured()
        };
        assert_eq!(config.completions_url(), "http://localhost:8080/v1/chat/completions");
    }
}
