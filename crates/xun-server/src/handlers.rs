//! HTTP handlers for the coordination protocol.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::ledger::{AsyncLedger, LedgerError, WireStatus};

/// Shared application state: the assignment ledger.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<AsyncLedger>,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            ledger: Arc::new(AsyncLedger::new()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        AppState::new()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallRequest {
    pub call_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignResponse {
    pub assigned: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AwaitResponse {
    pub status: WireStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DoneRequest {
    pub call_id: String,
    pub status: WireStatus,
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = match &self {
            LedgerError::NeverAssigned(_) => StatusCode::NOT_FOUND,
            LedgerError::AlreadyDone(_) => StatusCode::CONFLICT,
        };
        (status, self.to_string()).into_response()
    }
}

pub async fn assign(
    State(state): State<AppState>,
    Json(request): Json<CallRequest>,
) -> Json<AssignResponse> {
    let assigned = state.ledger.assign(&request.call_id);
    tracing::debug!(call_id = %request.call_id, assigned, "assign");
    Json(AssignResponse { assigned })
}

pub async fn await_done(
    State(state): State<AppState>,
    Json(request): Json<CallRequest>,
) -> Result<Json<AwaitResponse>, LedgerError> {
    let status = state.ledger.await_done(&request.call_id).await?;
    Ok(Json(AwaitResponse { status }))
}

pub async fn done(
    State(state): State<AppState>,
    Json(request): Json<DoneRequest>,
) -> Result<StatusCode, LedgerError> {
    state.ledger.done(&request.call_id, request.status)?;
    tracing::debug!(call_id = %request.call_id, status = ?request.status, "done");
    Ok(StatusCode::NO_CONTENT)
}
