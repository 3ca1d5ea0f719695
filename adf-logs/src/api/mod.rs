//! REST API for the log analyzer
//!
//! Every route below `/sessions/:id` works against that session's snapshot
//! only. Errors are terminal to the request that caused them.

use crate::dashboard::DashboardSummary;
use crate::diagnosis::{Diagnoser, DiagnosisRequest, DiagnosisState};
use crate::filter::filter_failures;
use crate::ingest::IngestError;
use crate::provider::HealthStatus;
use crate::schema::{ColumnNames, MissingColumns};
use crate::selection::{FailedPipelineKey, FailureSelector};
use crate::session::{SessionStore, UploadInfo};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// API state
pub struct ApiState {
    pub sessions: Arc<SessionStore>,
    /// `None` when no provider could be configured; diagnosis then answers 503
    pub diagnoser: Option<Diagnoser>,
    pub columns: ColumnNames,
    pub top_failing: usize,
}

impl ApiState {
    pub fn new(diagnoser: Option<Diagnoser>, columns: ColumnNames, top_failing: usize) -> Self {
        Self {
            sessions: Arc::new(SessionStore::new()),
            diagnoser,
            columns,
            top_failing,
        }
    }
}

/// Errors surfaced to API clients
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("No CSV uploaded yet. Upload a file to get started.")]
    NoTable,

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("{0}")]
    MissingColumns(#[from] MissingColumns),

    #[error("No failed run matches key: {0}")]
    UnknownKey(String),

    #[error("Diagnosis unavailable: no LLM provider configured")]
    NoProvider,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::SessionNotFound(_) | ApiError::UnknownKey(_) => StatusCode::NOT_FOUND,
            ApiError::NoTable => StatusCode::CONFLICT,
            ApiError::Ingest(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingColumns(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NoProvider => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Live check of the provider endpoint, absent without a provider
    pub provider_health: Option<HealthStatus>,
    pub sessions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub upload: UploadInfo,
    /// Features the uploaded table cannot support
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub failed_only: bool,
}

/// Keys offered for diagnosis
#[derive(Debug, Serialize)]
pub struct SelectionJson {
    pub keys: Vec<FailedPipelineKey>,
    pub ambiguous: Vec<FailedPipelineKey>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub total_rows: usize,
    pub failures_only: bool,
    pub warning: Option<String>,
    /// Present when failed runs can be picked for diagnosis
    pub selection: Option<SelectionJson>,
    pub selection_warning: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DiagnosisStart {
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct DiagnosisReply {
    /// Set when no request was sent
    pub notice: Option<String>,
    /// More than one failed run shares the key; the first was used
    pub ambiguous: bool,
    #[serde(flatten)]
    pub state: DiagnosisState,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub summary: Option<DashboardSummary>,
    pub warning: Option<String>,
}

/// Create the API router
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/health", get(health_check))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", delete(delete_session))
        .route("/sessions/:id/upload", post(upload_csv))
        .route("/sessions/:id/logs", get(get_logs))
        .route(
            "/sessions/:id/diagnosis",
            get(get_diagnosis)
                .post(start_diagnosis)
                .delete(cancel_diagnosis),
        )
        .route("/sessions/:id/dashboard", get(get_dashboard))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_check(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let provider = state.diagnoser.as_ref().map(|d| Arc::clone(d.provider()));
    let provider_health = match &provider {
        Some(p) => {
            let status = p.health_check().await;
            if !status.healthy {
                warn!(provider = p.name(), error = ?status.error, "Provider health check failed");
            }
            Some(status)
        }
        None => None,
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: provider.as_ref().map(|p| p.name().to_string()),
        model: provider.as_ref().map(|p| p.model().to_string()),
        provider_health,
        sessions: state.sessions.len(),
    })
}

async fn create_session(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<SessionCreated>) {
    let session_id = state.sessions.create();
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

async fn delete_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.remove(&id) {
        info!(session = %id, "Session closed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound(id))
    }
}

async fn upload_csv(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut session = state
        .sessions
        .get_mut(&id)
        .ok_or(ApiError::SessionNotFound(id))?;

    let upload = session.upload(&body, query.file_name, &state.columns)?.clone();
    let warnings: Vec<String> = session
        .table()
        .map(|t| t.schema().warnings().iter().map(|w| w.to_string()).collect())
        .unwrap_or_default();

    Ok(Json(UploadResponse { upload, warnings }))
}

async fn get_logs(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let table = state
        .sessions
        .with(&id, |s| s.table())
        .ok_or(ApiError::SessionNotFound(id))?
        .ok_or(ApiError::NoTable)?;

    let view = filter_failures(&table, query.failed_only);
    let (selection, selection_warning) = match FailureSelector::new(&view, table.schema()) {
        Ok(Some(selector)) => (
            Some(SelectionJson {
                keys: selector.keys().into_iter().cloned().collect(),
                ambiguous: selector.ambiguous_keys().into_iter().cloned().collect(),
            }),
            None,
        ),
        Ok(None) => (None, None),
        Err(missing) => (None, Some(missing.to_string())),
    };

    Ok(Json(LogsResponse {
        columns: table.headers().to_vec(),
        rows: view.records.iter().map(|r| r.cells.clone()).collect(),
        total_rows: table.len(),
        failures_only: view.failures_only,
        warning: view.warning.map(|w| w.to_string()),
        selection,
        selection_warning,
    }))
}

async fn start_diagnosis(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<DiagnosisStart>,
) -> Result<Json<DiagnosisReply>, ApiError> {
    let mut session = state
        .sessions
        .get_mut(&id)
        .ok_or(ApiError::SessionNotFound(id))?;
    let table = session.table().ok_or(ApiError::NoTable)?;

    let view = filter_failures(&table, true);
    let selector = FailureSelector::new(&view, table.schema())?
        .ok_or_else(|| ApiError::UnknownKey(request.key.clone()))?;

    let key = FailedPipelineKey::from(request.key.as_str());
    let record = selector
        .resolve(&key)
        .ok_or_else(|| ApiError::UnknownKey(request.key.clone()))?;
    let ambiguous = selector.is_ambiguous(&key);

    let prepared = DiagnosisRequest::prepare(key, record.error.as_deref());
    let reply = match prepared {
        Err(notice) => DiagnosisReply {
            notice: Some(notice.to_string()),
            ambiguous,
            state: session.diagnosis().state(),
        },
        Ok(diagnosis) => {
            let diagnoser = state.diagnoser.clone().ok_or(ApiError::NoProvider)?;
            DiagnosisReply {
                notice: None,
                ambiguous,
                state: session.diagnosis_mut().start(diagnoser, diagnosis),
            }
        }
    };

    Ok(Json(reply))
}

async fn get_diagnosis(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DiagnosisState>, ApiError> {
    state
        .sessions
        .with(&id, |s| s.diagnosis().state())
        .map(Json)
        .ok_or(ApiError::SessionNotFound(id))
}

async fn cancel_diagnosis(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DiagnosisState>, ApiError> {
    let mut session = state
        .sessions
        .get_mut(&id)
        .ok_or(ApiError::SessionNotFound(id))?;
    session.diagnosis_mut().cancel();
    Ok(Json(session.diagnosis().state()))
}

async fn get_dashboard(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let table = state
        .sessions
        .with(&id, |s| s.table())
        .ok_or(ApiError::SessionNotFound(id))?
        .ok_or(ApiError::NoTable)?;

    let response = match DashboardSummary::compute(&table, state.top_failing) {
        Ok(summary) => DashboardResponse {
            summary: Some(summary),
            warning: None,
        },
        Err(missing) => DashboardResponse {
            summary: None,
            warning: Some(missing.to_string()),
        },
    };
    Ok(Json(response))
}

const INDEX_HTML: &str = include_str!("index.html");
