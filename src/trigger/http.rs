//! On-demand HTTP trigger.
//!
//! `GET|POST /api/poll` runs one reconciliation when the caller presents the
//! shared secret, either as the `secret` query parameter, an
//! `x-cron-secret` header or an `Authorization: Bearer` header. A request
//! carrying several of these is accepted when any one of them matches.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::models::ServerConfig;
use crate::pipeline::Reconciler;

/// Shared state for the trigger routes.
#[derive(Clone)]
pub struct TriggerState {
    reconciler: Arc<Reconciler>,
    secret: Option<String>,
    secret_env: String,
}

impl TriggerState {
    /// State with the secret resolved from the configured environment variable.
    pub fn new(reconciler: Arc<Reconciler>, config: &ServerConfig) -> Self {
        Self::with_secret(reconciler, config.secret(), &config.secret_env)
    }

    pub fn with_secret(
        reconciler: Arc<Reconciler>,
        secret: Option<String>,
        secret_env: &str,
    ) -> Self {
        Self {
            reconciler,
            secret: secret.filter(|s| !s.is_empty()),
            secret_env: secret_env.to_string(),
        }
    }
}

/// Errors returned by the trigger endpoint.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("{0} not configured")]
    SecretNotConfigured(String),

    #[error("Invalid secret")]
    InvalidSecret,

    #[error("Sync failed")]
    Job(#[from] AppError),
}

impl TriggerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::SecretNotConfigured(_) | Self::Job(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidSecret => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for TriggerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::Job(e) => error!(error = %e, "Triggered reconciliation failed"),
            other => warn!(status = %status, "Trigger rejected: {}", other),
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct PollQuery {
    secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub message: &'static str,
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Build the trigger router.
pub fn router(state: TriggerState) -> Router {
    Router::new()
        .route("/api/poll", get(poll).post(poll))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn poll(
    State(state): State<TriggerState>,
    Query(query): Query<PollQuery>,
    headers: HeaderMap,
) -> Result<Json<PollResponse>, TriggerError> {
    let expected = state
        .secret
        .as_deref()
        .ok_or_else(|| TriggerError::SecretNotConfigured(state.secret_env.clone()))?;

    let presented = presented_secrets(query.secret.as_deref(), &headers);
    let authorized = presented
        .iter()
        .fold(false, |ok, provided| ok | secrets_match(provided, expected));
    if !authorized {
        return Err(TriggerError::InvalidSecret);
    }

    info!("Reconciliation triggered over HTTP");
    let summary = state.reconciler.run().await?;

    let message = if summary.processed == 0 {
        "No active shipments"
    } else {
        "Sync complete"
    };
    Ok(Json(PollResponse {
        message,
        processed: summary.processed,
        updated: summary.updated,
        failed: summary.failed,
    }))
}

/// Every secret the caller presented: query parameter, then headers.
fn presented_secrets<'a>(query: Option<&'a str>, headers: &'a HeaderMap) -> Vec<&'a str> {
    let cron_header = headers
        .get("x-cron-secret")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    [query, cron_header, bearer].into_iter().flatten().collect()
}

fn secrets_match(provided: &str, expected: &str) -> bool {
    bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
}
