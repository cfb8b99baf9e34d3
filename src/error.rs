//! Error types for HealthMate.

/// Failures of a model call. The conversation never surfaces these to the
/// user; it logs them and answers with the fallback message instead.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Request to {provider} failed: {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} API request failed with status {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode {provider} response: {source}")]
    Decode {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned no text")]
    EmptyResponse { provider: String },

    /// The call never finished, e.g. its task panicked or was cancelled.
    #[error("Call to {provider} was aborted: {reason}")]
    Aborted { provider: String, reason: String },
}

/// Problems detected while assembling a conversation or a model client.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing API key for {backend}. Set {env_var} or pass --api-key")]
    MissingApiKey {
        backend: &'static str,
        env_var: &'static str,
    },

    #[error("The questionnaire must contain at least one question")]
    EmptyQuestionnaire,

    #[error("Question listed twice in the questionnaire: {0}")]
    DuplicateQuestion(String),
}
