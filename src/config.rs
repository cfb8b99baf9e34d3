//! Model backend selection and client construction.

use std::sync::Arc;

use tracing::info;

use crate::constants;
use crate::error::ConfigError;
use crate::llm_interaction::{GeminiClient, ModelClient, OllamaClient};

/// Supported text-generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ModelBackend {
    #[default]
    Gemini,
    Ollama,
}

impl std::fmt::Display for ModelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        };
        write!(f, "{s}")
    }
}

/// Everything needed to build a [`ModelClient`]. Unset fields fall back to
/// the defaults in [`constants`].
#[derive(Debug, Clone, Default)]
pub struct ModelSettings {
    pub backend: ModelBackend,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl ModelSettings {
    pub fn model_name(&self) -> String {
        self.model.clone().unwrap_or_else(|| match self.backend {
            ModelBackend::Gemini => constants::GEMINI_MODEL.clone(),
            ModelBackend::Ollama => constants::OLLAMA_MODEL.clone(),
        })
    }

    pub fn endpoint(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| match self.backend {
            ModelBackend::Gemini => constants::GEMINI_URL.clone(),
            ModelBackend::Ollama => constants::OLLAMA_URL.clone(),
        })
    }
}

/// Create the model client described by `settings`.
pub fn create_client(settings: &ModelSettings) -> Result<Arc<dyn ModelClient>, ConfigError> {
    let model = settings.model_name();
    let endpoint = settings.endpoint();

    match settings.backend {
        ModelBackend::Gemini => {
            let api_key = settings
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty())
                .ok_or(ConfigError::MissingApiKey {
                    backend: "gemini",
                    env_var: "GEMINI_API_KEY",
                })?;
            info!("Using Gemini (model: {}, endpoint: {})", model, endpoint);
            Ok(Arc::new(GeminiClient::new(
                endpoint,
                model,
                api_key,
                constants::SYSTEM_PROMPT,
            )))
        }
        ModelBackend::Ollama => {
            info!("Using Ollama (model: {}, endpoint: {})", model, endpoint);
            Ok(Arc::new(OllamaClient::new(
                endpoint,
                model,
                constants::SYSTEM_PROMPT,
            )))
        }
    }
}
