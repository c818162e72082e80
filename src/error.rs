use thiserror::Error;
use uuid::Uuid;

/// Failures talking to the generative-content API.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error("Invalid API key. Please check your Gemini API key.")]
    InvalidCredentials,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Gemini API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("No valid response from Gemini API")]
    NoValidResponse,
    #[error("network error: {0}")]
    TransientNetwork(String),
    #[error("failed to decode Gemini response: {0}")]
    Decode(String),
}

impl LlmError {
    /// Only failures without a completed HTTP exchange are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::TransientNetwork(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("an optimization is already running for session {0}")]
    OptimizationInProgress(Uuid),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("API key is required")]
    MissingApiKey,
    #[error("Please replace the dummy API key with your actual Gemini API key")]
    PlaceholderApiKey,
    #[error("API key contains whitespace or control characters")]
    MalformedApiKey,
    #[error("invalid base url {url}: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
