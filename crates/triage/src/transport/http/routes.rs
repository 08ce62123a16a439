//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
};
use serde::Serialize;

use crate::admission::QueuedEntry;
use crate::completion::Admission;
use crate::error::{AllocationError, ErrorKind};
use crate::service::{AdmissionService, HealthSnapshot};
use crate::store::{HospitalId, ReportId};

/// Shown to a requester whose bounded wait ran out.
pub const RETRY_MESSAGE: &str = "다시 시도해주세요.";

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub depth: usize,
    pub entries: Vec<QueuedEntry>,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyAllocated | ErrorKind::InvalidState => StatusCode::BAD_REQUEST,
        ErrorKind::ResourceExhausted | ErrorKind::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::TransactionFailed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: &AllocationError) -> (StatusCode, Json<serde_json::Value>) {
    let kind = e.kind();
    (
        status_for(kind),
        Json(serde_json::json!({
            "status": "failed",
            "kind": kind,
            "error": e.to_string(),
        })),
    )
}

fn admission_response(
    result: Result<Admission, AllocationError>,
) -> (StatusCode, Json<serde_json::Value>) {
    match result {
        Ok(Admission::Admitted(allocated)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "success",
                "hospital": allocated.hospital,
            })),
        ),
        Ok(Admission::Retry) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "retry",
                "message": RETRY_MESSAGE,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

async fn health_check(State(service): State<Arc<AdmissionService>>) -> Json<HealthSnapshot> {
    Json(service.health().await)
}

async fn queue(State(service): State<Arc<AdmissionService>>) -> Json<QueueResponse> {
    let entries = service.queue_snapshot();
    Json(QueueResponse {
        depth: entries.len(),
        entries,
    })
}

async fn request_allocation(
    State(service): State<Arc<AdmissionService>>,
    Path((report_id, hospital_id)): Path<(ReportId, HospitalId)>,
) -> impl IntoResponse {
    admission_response(service.request_allocation(report_id, hospital_id).await)
}

async fn allocate_direct(
    State(service): State<Arc<AdmissionService>>,
    Path((report_id, hospital_id)): Path<(ReportId, HospitalId)>,
) -> impl IntoResponse {
    admission_response(service.allocate(report_id, hospital_id).await)
}

async fn withdraw(
    State(service): State<Arc<AdmissionService>>,
    Path(report_id): Path<ReportId>,
) -> impl IntoResponse {
    match service.withdraw(report_id).await {
        Ok(view) => (StatusCode::OK, Json(serde_json::json!(view))),
        Err(e) => error_response(&e),
    }
}

async fn shutdown(State(service): State<Arc<AdmissionService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

pub fn routes(service: Arc<AdmissionService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/queue", get(queue))
        .route("/shutdown", post(shutdown))
        .route("/requests/{report_id}/{hospital_id}", post(request_allocation))
        .route("/requests/{report_id}", delete(withdraw))
        .route("/allocations/{report_id}/{hospital_id}", post(allocate_direct))
        .with_state(service)
}
