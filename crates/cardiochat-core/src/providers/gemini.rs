//! Gemini provider (Generative Language API, non-streaming `generateContent`).

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::CompletionClient;
use super::shared::{
    ProviderError, ProviderErrorKind, ProviderResult, USER_AGENT, classify_reqwest_error,
    resolve_api_key, resolve_base_url,
};
use crate::config::Config;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

// ============================================================================
// Wire types
// ============================================================================

/// Speaker of a content entry in Gemini's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A single text part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// One entry of the `contents` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    /// Creates a content entry holding exactly one text part.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part { text: text.into() }],
        }
    }
}

/// Sampling parameters in wire format.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub top_p: f64,
    pub top_k: u32,
}

/// Content-safety threshold for one harm category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

impl SafetySetting {
    pub fn new(category: impl Into<String>, threshold: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            threshold: threshold.into(),
        }
    }
}

/// Request body for `models/{model}:generateContent`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
    pub safety_settings: Vec<SafetySetting>,
}

/// Successful response body.
///
/// Kept as raw JSON: a body of unexpected shape is still a success and simply
/// yields no text.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateContentResponse {
    body: Value,
}

impl GenerateContentResponse {
    pub fn from_value(body: Value) -> Self {
        Self { body }
    }

    /// Returns `candidates[0].content.parts[0].text` when it is a non-empty string.
    pub fn first_text(&self) -> Option<&str> {
        self.body
            .get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .get(0)?
            .get("text")?
            .as_str()
            .filter(|text| !text.is_empty())
    }

    /// Returns `promptFeedback.blockReason` when the prompt was blocked.
    pub fn block_reason(&self) -> Option<&str> {
        self.body
            .get("promptFeedback")?
            .get("blockReason")?
            .as_str()
    }

    pub fn as_value(&self) -> &Value {
        &self.body
    }
}

// ============================================================================
// Client
// ============================================================================

/// Gemini API configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Option<Duration>,
}

impl GeminiConfig {
    /// Creates a new config from the loaded configuration and environment.
    ///
    /// Authentication resolution order:
    /// 1. `api_key` from config.toml
    /// 2. `GEMINI_API_KEY` environment variable
    ///
    /// Base URL resolution order: `GEMINI_BASE_URL` > `base_url` > default.
    ///
    /// # Errors
    /// Returns an error if no API key is available or the base URL is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = resolve_api_key(config.api_key.as_deref(), "GEMINI_API_KEY")?;
        let base_url = resolve_base_url(
            config.effective_base_url(),
            "GEMINI_BASE_URL",
            DEFAULT_BASE_URL,
        )?;

        Ok(Self {
            api_key,
            base_url,
            model: config.model.trim().to_string(),
            timeout: config.request_timeout(),
        })
    }
}

/// Gemini client.
pub struct GeminiClient {
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("Failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> ProviderResult<url::Url> {
        let raw = format!(
            "{}/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let mut url = url::Url::parse(&raw).map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::HttpStatus,
                format!("Invalid request URL: {e}"),
            )
        })?;
        url.query_pairs_mut().append_pair("key", &self.config.api_key);
        Ok(url)
    }
}

impl CompletionClient for GeminiClient {
    async fn complete(
        &self,
        request: &GenerateContentRequest,
    ) -> ProviderResult<GenerateContentResponse> {
        let url = self.endpoint()?;
        debug!(
            model = %self.config.model,
            contents = request.contents.len(),
            "sending generateContent request"
        );

        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        if !status.is_success() {
            return Err(ProviderError::http_status(status.as_u16(), &body));
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            ProviderError::parse(format!("Failed to parse Gemini response JSON: {e}"), &body)
        })?;

        if let Some(error) = value.get("error") {
            let error_type = error
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("error");
            let message = error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error");
            return Err(ProviderError::api_error(error_type, message));
        }

        let response = GenerateContentResponse::from_value(value);
        if let Some(reason) = response.block_reason() {
            debug!(reason, "prompt blocked by safety filters");
        }
        Ok(response)
    }
}
