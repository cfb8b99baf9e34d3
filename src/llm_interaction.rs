use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::error::ModelError;

/// A text-generation service the conversation forwards prompts to.
///
/// Implementations prepend their system instruction to every call and
/// return the generated text, or an error the caller is expected to
/// swallow.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Short provider name used in logs and errors.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, context: Option<&str>) -> Result<String, ModelError>;
}

/// Ordered text fragments for one model call: the system instruction first,
/// then the user content with the optional profile context folded in.
pub fn prompt_fragments(system: &str, prompt: &str, context: Option<&str>) -> [String; 2] {
    let user_content = match context {
        Some(context) if !context.is_empty() => {
            format!("USER CONTEXT: {}\n\nUser message: {}", context, prompt)
        }
        _ => prompt.to_string(),
    };
    [system.to_string(), user_content]
}

// Structures matching Gemini's models/{model}:generateContent endpoint
#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiContent {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

/// Client for Google's Gemini `generateContent` API.
pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
    system_instruction: String,
}

impl GeminiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        system_instruction: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            system_instruction: system_instruction.into(),
        }
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    #[instrument(skip_all, fields(provider = "gemini"))]
    async fn generate(&self, prompt: &str, context: Option<&str>) -> Result<String, ModelError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let parts = prompt_fragments(&self.system_instruction, prompt, context)
            .into_iter()
            .map(|text| GeminiPart { text: Some(text) })
            .collect();
        let request_payload = GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts,
            }],
        };

        debug!(model = %self.model, ?prompt, ?context, "Sending Gemini request");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_payload)
            .send()
            .await
            .map_err(|source| ModelError::Transport {
                provider: self.name().to_string(),
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, "Gemini API request failed");
            return Err(ModelError::Status {
                provider: self.name().to_string(),
                status: status.as_u16(),
                body: error_body,
            });
        }

        let gemini_response = response
            .json::<GeminiResponse>()
            .await
            .map_err(|source| ModelError::Decode {
                provider: self.name().to_string(),
                source,
            })?;

        let text: String = gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ModelError::EmptyResponse {
                provider: self.name().to_string(),
            });
        }

        debug!(response = ?text, "Received Gemini response");
        Ok(text)
    }
}

// Structures matching Ollama's /api/generate endpoint
#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    system: String,
    stream: bool, // We want the full response, not a stream
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    response: String, // The generated text
    // Other fields like context, timings, etc., are ignored
}

/// Client for a local Ollama server.
pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
    system_instruction: String,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        system_instruction: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            system_instruction: system_instruction.into(),
        }
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    #[instrument(skip_all, fields(provider = "ollama"))]
    async fn generate(&self, prompt: &str, context: Option<&str>) -> Result<String, ModelError> {
        let ollama_api_url = format!("{}/api/generate", self.base_url);
        let [system, user_content] = prompt_fragments(&self.system_instruction, prompt, context);

        debug!(model = %self.model, prompt = ?user_content, "Sending Ollama request");

        let request_payload = OllamaRequest {
            model: self.model.clone(),
            prompt: user_content,
            system,
            stream: false,
        };

        let response = self
            .http
            .post(&ollama_api_url)
            .json(&request_payload)
            .send()
            .await
            .map_err(|source| ModelError::Transport {
                provider: self.name().to_string(),
                source,
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, "Ollama API request failed");
            return Err(ModelError::Status {
                provider: self.name().to_string(),
                status: status.as_u16(),
                body: error_body,
            });
        }

        let ollama_response = response
            .json::<OllamaResponse>()
            .await
            .map_err(|source| ModelError::Decode {
                provider: self.name().to_string(),
                source,
            })?;

        let text = ollama_response.response.trim();
        if text.is_empty() {
            return Err(ModelError::EmptyResponse {
                provider: self.name().to_string(),
            });
        }

        debug!(response = ?text, "Received Ollama response");
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_put_system_instruction_first() {
        let fragments = prompt_fragments("system", "How much water?", None);
        assert_eq!(fragments[0], "system");
        assert_eq!(fragments[1], "How much water?");
    }

    #[test]
    fn test_fragments_fold_in_context() {
        let fragments = prompt_fragments("system", "How much water?", Some("What's your name: Ana"));
        assert_eq!(
            fragments[1],
            "USER CONTEXT: What's your name: Ana\n\nUser message: How much water?"
        );
    }

    #[test]
    fn test_empty_context_is_ignored() {
        let fragments = prompt_fragments("system", "Hi", Some(""));
        assert_eq!(fragments[1], "Hi");
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = GeminiClient::new("http://localhost:1234/", "m", "k", "s");
        assert_eq!(client.base_url, "http://localhost:1234");
        let client = OllamaClient::new("http://localhost:11434/", "m", "s");
        assert_eq!(client.base_url, "http://localhost:11434");
    }
}
