//! Chat-completion backends used to diagnose failed runs
//!
//! Gemini speaks its own `generateContent` API; everything else goes through
//! the OpenAI-compatible `/chat/completions` shape.

mod gemini;
mod openai;

pub use gemini::GeminiProvider;
pub use openai::OpenAiCompatibleProvider;

use crate::ProviderConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Why a completion call produced no usable answer
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Malformed provider payload: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Provider rejected the request: {0}")]
    ProviderError(String),

    #[error("Provider returned no text")]
    EmptyResponse,

    #[error("No API key configured (set {0})")]
    MissingApiKey(&'static str),

    #[error("Unknown provider type: {0}")]
    UnknownProvider(String),
}

/// One completion call: a persona plus the question
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmRequest {
    /// Persona the model answers as
    pub system: String,

    /// Question carrying the run's error text
    pub prompt: String,

    /// Left to the provider default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temp: Option<f32>) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: Option<u32>) -> Self {
        self.max_tokens = tokens;
        self
    }
}

/// Completion text with whatever accounting the provider reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,

    pub usage: Option<TokenUsage>,

    /// Wall time of the HTTP round trip
    pub duration_ms: Option<u64>,
}

/// Token accounting, when the provider reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Result of probing the provider endpoint, shown on `/health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// A chat-completion backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short backend name for logs and `/health`
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Exactly one remote call; no retries
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError>;

    /// Check if the provider is reachable with the configured credentials
    async fn health_check(&self) -> HealthStatus;
}

/// Build the configured provider, reading the API key from the environment
/// when the config does not carry one
pub fn from_config(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    match config.provider_type.to_lowercase().as_str() {
        "gemini" | "google" | "google_genai" => {
            let key = api_key(config, GeminiProvider::API_KEY_ENV)?;
            let provider = match &config.base_url {
                Some(url) => GeminiProvider::with_base_url(url, key, &config.model)?,
                None => GeminiProvider::new(key, &config.model)?,
            };
            Ok(Arc::new(provider))
        }
        "openai" | "groq" | "deepseek" | "litellm" => {
            let key = api_key(config, OpenAiCompatibleProvider::API_KEY_ENV)?;
            let provider = match &config.base_url {
                Some(url) => OpenAiCompatibleProvider::with_base_url(url, key, &config.model)?,
                None => OpenAiCompatibleProvider::new(key, &config.model)?,
            };
            Ok(Arc::new(provider))
        }
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}

fn api_key(config: &ProviderConfig, env_var: &'static str) -> Result<String, ProviderError> {
    config
        .api_key
        .clone()
        .or_else(|| std::env::var(env_var).ok())
        .filter(|k| !k.trim().is_empty())
        .ok_or(ProviderError::MissingApiKey(env_var))
}
