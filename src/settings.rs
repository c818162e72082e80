use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const PLACEHOLDER_API_KEY: &str = "YOUR_GEMINI_API_KEY_HERE";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

/// Fully resolved parameters, as sent in `generationConfig`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for EffectiveParams {
    fn default() -> Self {
        Self { temperature: 0.7, max_output_tokens: 4096, top_p: 0.95, top_k: 40 }
    }
}

/// Per-field precedence: request override, then configured default, then built-in.
pub fn resolve_generation_params(configured: &GenerationParams, request: &GenerationParams) -> EffectiveParams {
    let builtin = EffectiveParams::default();
    EffectiveParams {
        temperature: request
            .temperature
            .or(configured.temperature)
            .unwrap_or(builtin.temperature),
        max_output_tokens: request
            .max_output_tokens
            .or(configured.max_output_tokens)
            .unwrap_or(builtin.max_output_tokens),
        top_p: request.top_p.or(configured.top_p).unwrap_or(builtin.top_p),
        top_k: request.top_k.or(configured.top_k).unwrap_or(builtin.top_k),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): base, 2*base, 4*base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_secs(1) }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub defaults: GenerationParams,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            api_key: api_key.into().trim().to_string(),
            defaults: GenerationParams::default(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn from_env() -> Self {
        let api_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
        let mut cfg = Self::new(api_key);
        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL") {
            cfg = cfg.with_base_url(base_url);
        }
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            cfg.model = model;
        }
        cfg
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[cfg(test)]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[cfg(test)]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url.trim_end_matches('/'), self.model)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_api_key(&self.api_key)?;
        url::Url::parse(&self.base_url)
            .map_err(|source| ConfigError::InvalidBaseUrl { url: self.base_url.clone(), source })?;
        Ok(())
    }
}

pub fn validate_api_key(api_key: &str) -> Result<(), ConfigError> {
    let key = api_key.trim();
    if key.is_empty() {
        return Err(ConfigError::MissingApiKey);
    }
    if key == PLACEHOLDER_API_KEY {
        return Err(ConfigError::PlaceholderApiKey);
    }
    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfigError::MalformedApiKey);
    }
    if !key.starts_with("AI") {
        tracing::warn!("API key does not look like a Gemini key (expected prefix \"AI\")");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_request_over_configured_over_builtin() {
        let configured = GenerationParams {
            temperature: Some(0.2),
            max_output_tokens: Some(1000),
            top_p: None,
            top_k: None,
        };
        let request = GenerationParams {
            temperature: None,
            max_output_tokens: Some(2048),
            top_p: None,
            top_k: Some(8),
        };

        let eff = resolve_generation_params(&configured, &request);

        assert_eq!(eff.temperature, 0.2); // configured
        assert_eq!(eff.max_output_tokens, 2048); // request
        assert_eq!(eff.top_p, 0.95); // built-in
        assert_eq!(eff.top_k, 8); // request
    }

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn api_key_validation() {
        assert!(matches!(validate_api_key("  "), Err(ConfigError::MissingApiKey)));
        assert!(matches!(validate_api_key(PLACEHOLDER_API_KEY), Err(ConfigError::PlaceholderApiKey)));
        assert!(validate_api_key("AIzaSyExample").is_ok());
        // unusual prefix is only logged
        assert!(validate_api_key("sk-something").is_ok());
    }

    #[test]
    fn api_key_is_trimmed_and_must_be_header_safe() {
        let cfg = LlmConfig::new("AIkey\n");
        assert_eq!(cfg.api_key, "AIkey");
        assert!(cfg.validate().is_ok());
        assert!(matches!(validate_api_key("AI\nkey"), Err(ConfigError::MalformedApiKey)));
        assert!(matches!(validate_api_key("AI key"), Err(ConfigError::MalformedApiKey)));
    }

    #[test]
    fn endpoint_joins_base_and_model() {
        let cfg = LlmConfig::new("AIkey").with_base_url("http://localhost:9000/v1beta/");
        assert_eq!(cfg.endpoint(), "http://localhost:9000/v1beta/models/gemini-2.5-flash:generateContent");
    }

    #[test]
    fn validate_rejects_bad_base_url() {
        let cfg = LlmConfig::new("AIkey").with_base_url("not a url");
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidBaseUrl { .. })));
    }
}
