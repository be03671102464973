//! Generative model fallback for questions the rules cannot answer.
//!
//! Defines the [`GenerativeModel`] trait and two implementations:
//! - **[`DisabledModel`]**: always fails with [`LlmError::MissingApiKey`].
//! - **[`GeminiModel`]**: calls the Gemini `generateContent` REST endpoint.
//!
//! # Retry Strategy
//!
//! Gemini calls use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key missing for provider {0}")]
    MissingApiKey(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// A text-completion backend.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Model identifier, e.g. `"gemini-pro"`.
    fn name(&self) -> &str;

    /// `false` when no backend is available and every call would fail.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Sends a prompt and returns the raw generated text.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

// ============ Disabled ============

pub struct DisabledModel {
    provider: String,
}

impl DisabledModel {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

#[async_trait]
impl GenerativeModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::MissingApiKey(self.provider.clone()))
    }
}

// ============ Gemini ============

pub struct GeminiModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    max_retries: u32,
}

impl GeminiModel {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl GenerativeModel for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying gemini request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(self.endpoint())
                .query(&[("key", self.api_key.as_str())])
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_gemini_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = LlmError::Api {
                        status: status.as_u16(),
                        body: body_text,
                    };

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| LlmError::InvalidResponse("no attempts were made".to_string())))
    }
}

/// Joins the text parts of the first candidate.
///
/// A candidate with no text parts yields an empty string, which callers
/// treat as "no answer" rather than an error.
pub fn parse_gemini_response(json: &serde_json::Value) -> Result<String, LlmError> {
    let candidate = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| LlmError::InvalidResponse("missing candidates".to_string()))?;

    let text = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default();

    Ok(text)
}

/// Picks the model backend from configuration and the environment.
///
/// | `provider` | API key set | Result |
/// |-----------|-------------|--------|
/// | `"gemini"` | yes | [`GeminiModel`] |
/// | `"gemini"` | no | [`DisabledModel`] |
/// | `"disabled"` | any | [`DisabledModel`] |
pub fn create_model(config: &LlmConfig) -> Result<Box<dyn GenerativeModel>, LlmError> {
    match (config.provider.as_str(), config.api_key()) {
        ("gemini", Some(key)) => Ok(Box::new(GeminiModel::new(config, key)?)),
        ("gemini", None) => {
            tracing::info!(
                env = %config.api_key_env,
                "gemini API key not set; only rule-based answers are available"
            );
            Ok(Box::new(DisabledModel::new("gemini")))
        }
        (other, _) => Ok(Box::new(DisabledModel::new(other))),
    }
}

/// Truncates `s` to at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Builds the grounded prompt sent to the model.
pub fn build_prompt(question: &str, context: &str, context_char_limit: usize) -> String {
    let trimmed = truncate_chars(context, context_char_limit);
    format!(
        "You are a precise assistant. Use ONLY the provided context below to answer the user's question.\n\
If the user asks for a number (counts, totals), provide the number first and a 1-line explanation.\n\
\n\
=== CONTEXT START ===\n\
{}\n\
=== CONTEXT END ===\n\
\n\
Question: {}\n\
Answer:",
        trimmed, question
    )
}
