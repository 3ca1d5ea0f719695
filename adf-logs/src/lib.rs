//! ADF Logs - Azure Data Factory pipeline log analyzer
//!
//! This crate provides:
//! - CSV ingestion of pipeline run exports into an immutable [`LogTable`]
//! - Failure filtering and per-run key selection
//! - LLM-assisted diagnosis of a failed run's error text
//! - Dashboard aggregates (status counts, top failing pipelines, runs per day)
//! - A session store and REST API for a browser front end

pub mod api;
pub mod dashboard;
pub mod diagnosis;
pub mod filter;
pub mod ingest;
pub mod provider;
pub mod schema;
pub mod selection;
pub mod session;
pub mod timestamp;

pub use dashboard::DashboardSummary;
pub use diagnosis::{Diagnoser, DiagnosisRequest, DiagnosisSlot, DiagnosisState};
pub use filter::{filter_failures, FilteredLogs};
pub use ingest::{IngestError, LogRecord, LogTable};
pub use provider::{LlmProvider, LlmRequest, LlmResponse};
pub use schema::{ColumnNames, Feature, MissingColumns, TableSchema};
pub use selection::{FailedPipelineKey, FailureSelector};
pub use session::{Session, SessionStore};

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level configuration, loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub columns: ColumnNames,
    pub dashboard: DashboardConfig,
    pub diagnosis: DiagnosisConfig,
    pub provider: ProviderConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Load from `path` if given, otherwise fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Sessions untouched for this long are dropped, table included
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,

    /// How often idle sessions are swept
    #[serde(default = "default_session_sweep_secs")]
    pub session_sweep_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_idle_secs: default_session_idle_secs(),
            session_sweep_secs: default_session_sweep_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_session_idle_secs() -> u64 {
    3600
}

fn default_session_sweep_secs() -> u64 {
    60
}

/// Dashboard settings
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// How many pipelines to list in the top failing ranking
    #[serde(default = "default_top_failing")]
    pub top_failing: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            top_failing: default_top_failing(),
        }
    }
}

fn default_top_failing() -> usize {
    5
}

/// Generation parameters for diagnosis requests
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiagnosisConfig {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Configuration for the LLM provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider type: "gemini" or "openai"
    #[serde(default = "default_provider_type")]
    pub provider_type: String,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL override
    pub base_url: Option<String>,

    /// API key; falls back to the provider's environment variable
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: default_provider_type(),
            model: default_model(),
            base_url: None,
            api_key: None,
        }
    }
}

fn default_provider_type() -> String {
    "gemini".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.server.session_idle_secs, 3600);
        assert_eq!(config.server.session_sweep_secs, 60);
        assert_eq!(config.dashboard.top_failing, 5);
        assert_eq!(config.provider.provider_type, "gemini");
        assert_eq!(config.provider.model, "gemini-2.0-flash");
        assert_eq!(config.columns.status, "Status");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            session_idle_secs = 900

            [dashboard]
            top_failing = 3

            [provider]
            provider_type = "openai"
            model = "llama3-70b-8192"
            base_url = "https://api.groq.com/openai/v1"

            [columns]
            error = "Failure reason"
            "#,
        )
        .unwrap();

        assert_eq!(config.dashboard.top_failing, 3);
        assert_eq!(config.provider.provider_type, "openai");
        assert_eq!(
            config.provider.base_url.as_deref(),
            Some("https://api.groq.com/openai/v1")
        );
        assert_eq!(config.columns.error, "Failure reason");
        assert_eq!(config.columns.pipeline_name, "Pipeline name");
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.server.session_idle_secs, 900);
        assert_eq!(config.server.session_sweep_secs, 60);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = AppConfig::from_file("/nonexistent/adf-logs.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dashboard\ntop_failing = ").unwrap();
        let err = AppConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
