use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("no provider is configured (missing API key for the selected model)")]
    NoProviderConfigured,

    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LLM provider returned an error: {0}")]
    ProviderError(String),

    #[error("LLM call timed out after {0}s")]
    Timeout(u64),

    #[error("cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("failed to serialize request payload: {0}")]
    Serialization(#[from] serde_json::Error),
}
