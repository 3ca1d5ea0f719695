//! LLM-assisted diagnosis of a failed pipeline run
//!
//! A diagnosis is a single completion request: a fixed engineering persona as
//! the system prompt and the run's raw error text in the user prompt. Each
//! session owns one [`DiagnosisSlot`], a small state machine that runs the
//! request on a spawned task so the rest of the session stays usable.

use crate::provider::{LlmProvider, LlmRequest, ProviderError, TokenUsage};
use crate::selection::FailedPipelineKey;
use crate::DiagnosisConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const SYSTEM_PROMPT: &str = "You are an expert Azure Data Factory and Databricks pipeline engineer. Help diagnose pipeline failures and suggest fixes.";

/// Why a diagnosis was not sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    NoErrorMessage,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::NoErrorMessage => {
                f.write_str("No error message available for the selected pipeline.")
            }
        }
    }
}

/// A diagnosis ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosisRequest {
    pub key: FailedPipelineKey,
    pub error_text: String,
}

impl DiagnosisRequest {
    /// Refuse to build a request from missing or blank error text
    pub fn prepare(key: FailedPipelineKey, error: Option<&str>) -> Result<Self, Notice> {
        match error {
            Some(text) if !text.trim().is_empty() => Ok(Self {
                key,
                error_text: text.to_string(),
            }),
            _ => Err(Notice::NoErrorMessage),
        }
    }

    pub fn user_prompt(&self) -> String {
        format!(
            "This is the error log for pipeline '{}':\n\n{}\n\nPlease analyze and suggest what went wrong and how to fix it.",
            self.key, self.error_text
        )
    }

    pub fn to_llm_request(&self, config: &DiagnosisConfig) -> LlmRequest {
        LlmRequest::new(SYSTEM_PROMPT, self.user_prompt())
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
    }
}

/// The model's answer, shown verbatim
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisResponse {
    pub key: FailedPipelineKey,
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub duration_ms: Option<u64>,
}

/// Sends diagnosis requests to a provider, one call per request
#[derive(Clone)]
pub struct Diagnoser {
    provider: Arc<dyn LlmProvider>,
    config: DiagnosisConfig,
}

impl Diagnoser {
    pub fn new(provider: Arc<dyn LlmProvider>, config: DiagnosisConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub async fn diagnose(
        &self,
        request: &DiagnosisRequest,
    ) -> Result<DiagnosisResponse, ProviderError> {
        info!(
            provider = self.provider.name(),
            model = self.provider.model(),
            key = %request.key,
            "Requesting diagnosis"
        );

        let response = self
            .provider
            .complete(&request.to_llm_request(&self.config))
            .await?;

        Ok(DiagnosisResponse {
            key: request.key.clone(),
            text: response.content,
            usage: response.usage,
            duration_ms: response.duration_ms,
        })
    }
}

/// Where a session's diagnosis stands
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DiagnosisState {
    Idle,
    Pending {
        key: FailedPipelineKey,
        started_at: DateTime<Utc>,
    },
    Succeeded {
        response: DiagnosisResponse,
    },
    Failed {
        key: FailedPipelineKey,
        message: String,
    },
    Cancelled {
        key: FailedPipelineKey,
    },
}

impl DiagnosisState {
    pub fn is_pending(&self) -> bool {
        matches!(self, DiagnosisState::Pending { .. })
    }
}

struct ActiveDiagnosis {
    key: FailedPipelineKey,
    state: watch::Receiver<DiagnosisState>,
    handle: JoinHandle<()>,
}

/// At most one in-flight diagnosis per session.
///
/// Starting a new diagnosis aborts the previous one; every run publishes
/// through its own channel, so an aborted task can never overwrite a newer state.
#[derive(Default)]
pub struct DiagnosisSlot {
    active: Option<ActiveDiagnosis>,
    cancelled: Option<FailedPipelineKey>,
}

impl DiagnosisSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the request on the current tokio runtime
    pub fn start(&mut self, diagnoser: Diagnoser, request: DiagnosisRequest) -> DiagnosisState {
        self.cancel();
        self.cancelled = None;

        let pending = DiagnosisState::Pending {
            key: request.key.clone(),
            started_at: Utc::now(),
        };
        let (tx, rx) = watch::channel(pending.clone());
        let key = request.key.clone();

        let handle = tokio::spawn(async move {
            let outcome = match diagnoser.diagnose(&request).await {
                Ok(response) => DiagnosisState::Succeeded { response },
                Err(e) => {
                    warn!(key = %request.key, error = %e, "Diagnosis failed");
                    DiagnosisState::Failed {
                        key: request.key.clone(),
                        message: e.to_string(),
                    }
                }
            };
            // Receiver is gone once the slot moved on; nothing to report to.
            let _ = tx.send(outcome);
        });

        self.active = Some(ActiveDiagnosis {
            key,
            state: rx,
            handle,
        });
        pending
    }

    /// Abort a pending diagnosis; returns whether one was in flight
    pub fn cancel(&mut self) -> bool {
        let pending = self
            .active
            .as_ref()
            .is_some_and(|a| a.state.borrow().is_pending());
        if !pending {
            return false;
        }

        if let Some(active) = self.active.take() {
            active.handle.abort();
            info!(key = %active.key, "Diagnosis cancelled");
            self.cancelled = Some(active.key);
        }
        true
    }

    /// Forget any finished result and return to idle
    pub fn reset(&mut self) {
        self.cancel();
        self.active = None;
        self.cancelled = None;
    }

    pub fn state(&self) -> DiagnosisState {
        match (&self.active, &self.cancelled) {
            (Some(active), _) => active.state.borrow().clone(),
            (None, Some(key)) => DiagnosisState::Cancelled { key: key.clone() },
            (None, None) => DiagnosisState::Idle,
        }
    }

    /// Handle for awaiting the current run without holding the slot
    pub fn watcher(&self) -> Option<DiagnosisWatcher> {
        self.active.as_ref().map(|a| DiagnosisWatcher {
            key: a.key.clone(),
            state: a.state.clone(),
        })
    }
}

impl Drop for DiagnosisSlot {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.handle.abort();
        }
    }
}

/// Awaits the terminal state of one diagnosis run
pub struct DiagnosisWatcher {
    key: FailedPipelineKey,
    state: watch::Receiver<DiagnosisState>,
}

impl DiagnosisWatcher {
    pub async fn wait(mut self) -> DiagnosisState {
        match self.state.wait_for(|s| !s.is_pending()).await {
            Ok(state) => state.clone(),
            Err(_) => DiagnosisState::Cancelled { key: self.key },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::provider::{HealthStatus, LlmResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Provider double that records every request it receives
    pub(crate) struct MockProvider {
        pub calls: AtomicUsize,
        pub requests: Mutex<Vec<LlmRequest>>,
        pub reply: Result<String, String>,
        pub delay: Option<Duration>,
    }

    impl MockProvider {
        pub fn replying(text: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                reply: Ok(text.to_string()),
                delay: None,
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                ..Self::replying("")
            }
        }

        pub fn slow(text: &str, delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::replying(text)
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-model"
        }

        async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.reply {
                Ok(text) => Ok(LlmResponse {
                    content: text.clone(),
                    usage: None,
                    duration_ms: Some(1),
                }),
                Err(message) => Err(ProviderError::ProviderError(message.clone())),
            }
        }

        async fn health_check(&self) -> HealthStatus {
            HealthStatus {
                healthy: true,
                latency_ms: Some(0),
                error: None,
            }
        }
    }

    fn key() -> FailedPipelineKey {
        "pipeline4 - 6/10/2025, 5:03:19 PM".into()
    }

    fn diagnoser(provider: &Arc<MockProvider>) -> Diagnoser {
        Diagnoser::new(provider.clone(), DiagnosisConfig::default())
    }

    #[test]
    fn test_blank_error_is_notice() {
        for error in [None, Some(""), Some("   \n\t")] {
            assert_eq!(
                DiagnosisRequest::prepare(key(), error),
                Err(Notice::NoErrorMessage)
            );
        }
        assert_eq!(
            Notice::NoErrorMessage.to_string(),
            "No error message available for the selected pipeline."
        );
    }

    #[test]
    fn test_prompt_embeds_key_and_verbatim_error() {
        let error = "Operation on target Copy failed:\n  ErrorCode=UserErrorFileNotFound";
        let request = DiagnosisRequest::prepare(key(), Some(error)).unwrap();
        let llm = request.to_llm_request(&DiagnosisConfig {
            temperature: Some(0.2),
            max_tokens: None,
        });

        assert_eq!(llm.system, SYSTEM_PROMPT);
        assert_eq!(
            llm.prompt,
            format!(
                "This is the error log for pipeline 'pipeline4 - 6/10/2025, 5:03:19 PM':\n\n{}\n\nPlease analyze and suggest what went wrong and how to fix it.",
                error
            )
        );
        assert_eq!(llm.temperature, Some(0.2));
    }

    #[tokio::test]
    async fn test_diagnose_issues_exactly_one_call() {
        let provider = Arc::new(MockProvider::replying("Check the linked service."));
        let request = DiagnosisRequest::prepare(key(), Some("boom")).unwrap();

        let response = diagnoser(&provider).diagnose(&request).await.unwrap();

        assert_eq!(response.text, "Check the linked service.");
        assert_eq!(response.key, key());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let sent = provider.requests.lock().unwrap();
        assert_eq!(sent[0].system, SYSTEM_PROMPT);
        assert!(sent[0].prompt.contains("boom"));
    }

    #[tokio::test]
    async fn test_slot_success() {
        let provider = Arc::new(MockProvider::replying("Rotate the SAS token."));
        let mut slot = DiagnosisSlot::new();
        assert_eq!(slot.state(), DiagnosisState::Idle);

        let started = slot.start(
            diagnoser(&provider),
            DiagnosisRequest::prepare(key(), Some("403 Forbidden")).unwrap(),
        );
        assert!(started.is_pending());

        let finished = slot.watcher().unwrap().wait().await;
        match &finished {
            DiagnosisState::Succeeded { response } => {
                assert_eq!(response.text, "Rotate the SAS token.")
            }
            other => panic!("unexpected state: {other:?}"),
        }
        assert_eq!(slot.state(), finished);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slot_failure_is_reported() {
        let provider = Arc::new(MockProvider::failing("HTTP 429: quota exceeded"));
        let mut slot = DiagnosisSlot::new();
        slot.start(
            diagnoser(&provider),
            DiagnosisRequest::prepare(key(), Some("boom")).unwrap(),
        );

        match slot.watcher().unwrap().wait().await {
            DiagnosisState::Failed { key: k, message } => {
                assert_eq!(k, key());
                assert!(message.contains("quota exceeded"));
            }
            other => panic!("unexpected state: {other:?}"),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let provider = Arc::new(MockProvider::slow("late", Duration::from_secs(60)));
        let mut slot = DiagnosisSlot::new();
        slot.start(
            diagnoser(&provider),
            DiagnosisRequest::prepare(key(), Some("boom")).unwrap(),
        );
        let watcher = slot.watcher().unwrap();

        assert!(slot.cancel());
        assert_eq!(slot.state(), DiagnosisState::Cancelled { key: key() });
        assert_eq!(watcher.wait().await, DiagnosisState::Cancelled { key: key() });
        assert!(!slot.cancel());

        slot.reset();
        assert_eq!(slot.state(), DiagnosisState::Idle);
    }

    #[tokio::test]
    async fn test_new_start_supersedes_pending() {
        let slow = Arc::new(MockProvider::slow("stale", Duration::from_secs(60)));
        let fast = Arc::new(MockProvider::replying("fresh"));
        let mut slot = DiagnosisSlot::new();

        slot.start(
            diagnoser(&slow),
            DiagnosisRequest::prepare("a - 1".into(), Some("first")).unwrap(),
        );
        slot.start(
            diagnoser(&fast),
            DiagnosisRequest::prepare("b - 2".into(), Some("second")).unwrap(),
        );

        match slot.watcher().unwrap().wait().await {
            DiagnosisState::Succeeded { response } => {
                assert_eq!(response.text, "fresh");
                assert_eq!(response.key.as_str(), "b - 2");
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let json = serde_json::to_value(DiagnosisState::Cancelled { key: key() }).unwrap();
        assert_eq!(json["state"], "cancelled");
        assert_eq!(json["key"], "pipeline4 - 6/10/2025, 5:03:19 PM");
        let json = serde_json::to_value(DiagnosisState::Idle).unwrap();
        assert_eq!(json["state"], "idle");
    }
}
