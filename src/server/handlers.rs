//! HTTP API handlers.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::de::DeserializeOwned;

use crate::model::{Metric, MetricKind, MetricQuery, ModelError};
use crate::repository::RepositoryError;
use crate::server::AppState;

/// Failure of an API call, rendered as a plain-text status response.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Repository(err) => match err {
                RepositoryError::Validation(_) => StatusCode::BAD_REQUEST,
                RepositoryError::NotFound { .. } => StatusCode::NOT_FOUND,
                RepositoryError::Unavailable(_) | RepositoryError::Stopped => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

/// Decode a JSON body; the content type must be `application/json`.
fn parse_json<T: DeserializeOwned>(headers: &HeaderMap, body: &Bytes) -> Result<T, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("application/json") {
        return Err(ApiError::BadRequest(format!(
            "unsupported content type '{content_type}'"
        )));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("cannot decode body: {e}")))
}

/// `POST /update/:kind/:name/:value`
pub(super) async fn update_from_path(
    State(state): State<Arc<AppState>>,
    Path((kind, name, raw)): Path<(String, String, String)>,
) -> Result<String, ApiError> {
    let metric = Metric::parse(&kind, &name, &raw)?;
    let stored = state.repo.update_metric(metric).await?;
    tracing::debug!(metric = %stored.name, value = %stored.value, "Metric updated");
    Ok(stored.value.to_string())
}

/// `POST /update`
pub(super) async fn update_json(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let metric: Metric = parse_json(&headers, &body)?;
    let stored = state.repo.update_metric(metric).await?;
    tracing::debug!(metric = %stored.name, value = %stored.value, "Metric updated");
    Ok(Json(stored))
}

/// `POST /updates`
///
/// The whole array is decoded and validated before anything is written.
pub(super) async fn update_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let batch: Vec<Metric> = parse_json(&headers, &body)?;
    let count = batch.len();
    state.repo.update_metrics(batch).await?;
    tracing::debug!(count, "Batch updated");
    Ok(Json(serde_json::json!({})))
}

/// `GET /value/:kind/:name`
pub(super) async fn value_from_path(
    State(state): State<Arc<AppState>>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let kind = MetricKind::parse(&kind)?;
    let metric = state.repo.metric(kind, &name).await?;
    Ok(metric.value.to_string())
}

/// `POST /value`
pub(super) async fn value_json(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Metric>, ApiError> {
    let query: MetricQuery = parse_json(&headers, &body)?;
    let (name, kind) = query.validate()?;
    let metric = state.repo.metric(kind, name).await?;
    Ok(Json(metric))
}

/// `GET /ping`
pub(super) async fn ping(State(state): State<Arc<AppState>>) -> Response {
    match state.repo.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            tracing::error!(error = %err, backend = state.repo.backend(), "Ping failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "repository is not available",
            )
                .into_response()
        }
    }
}

/// `GET /`: every stored metric as a JSON array in an HTML response.
pub(super) async fn index(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let metrics = state.repo.all_metrics().await?;
    let dump = serde_json::to_string(&metrics).map_err(RepositoryError::from)?;
    Ok(Html(dump).into_response())
}
