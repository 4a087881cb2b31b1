//! API route definitions and handlers.

use crate::api::state::AppState;
use crate::error::PipelineError;
use crate::model::{InjectRequest, WorkloadStatus};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/alert", post(ingest_alert))
        .route("/incidents", get(list_incidents))
        .route("/incidents/{id}", get(get_incident))
        .route("/incidents/{id}/resolve", post(resolve_incident))
        .route("/incidents/{id}/revalidate", post(revalidate_incident))
        .route("/demo/inject", post(inject_demo))
        .route("/demo/workloads", get(demo_workloads))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

/// Alertmanager-style ingestion. The body is parsed by hand so malformed
/// JSON gets a 400 with a JSON error body instead of axum's plain text.
async fn ingest_alert(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let payload: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(err) => return error_body(StatusCode::BAD_REQUEST, format!("invalid JSON body: {err}")),
    };
    ingest(&state, payload, correlation_id(&headers))
}

async fn inject_demo(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let req: InjectRequest = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(err) => return error_body(StatusCode::BAD_REQUEST, format!("invalid JSON body: {err}")),
    };
    match state.orchestrator.handle_inject(&req, correlation_id(&headers)) {
        Ok(ingested) => accepted(&state, ingested),
        Err(err) => error_response(err),
    }
}

fn ingest(state: &AppState, payload: Value, correlation_id: String) -> Response {
    match state.orchestrator.handle_alert(payload, correlation_id) {
        Ok(ingested) => accepted(state, ingested),
        Err(err) => error_response(err),
    }
}

fn accepted(state: &AppState, ingested: crate::pipeline::orchestrator::Ingested) -> Response {
    if ingested.created {
        state
            .orchestrator
            .spawn_run(ingested.incident.incident_id.clone());
    }
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "data": {
                "incident_id": ingested.incident.incident_id,
                "correlation_id": ingested.incident.correlation_id,
                "status": ingested.incident.status,
                "deduplicated": !ingested.created,
            }
        })),
    )
        .into_response()
}

async fn list_incidents(State(state): State<AppState>) -> Response {
    match state.store.list_incidents() {
        Ok(summaries) => {
            let total = summaries.len();
            (
                StatusCode::OK,
                Json(json!({ "data": summaries, "meta": { "total": total } })),
            )
                .into_response()
        }
        Err(err) => error_response(PipelineError::Persistence(err)),
    }
}

async fn get_incident(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_incident(&id) {
        Ok(Some(incident)) => (StatusCode::OK, Json(json!({ "data": incident }))).into_response(),
        Ok(None) => error_body(StatusCode::NOT_FOUND, format!("incident {id} not found")),
        Err(err) => error_response(PipelineError::Persistence(err)),
    }
}

async fn resolve_incident(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.resolve(&id) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "data": { "incident_id": id, "cancellation_requested": true } })),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn revalidate_incident(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.revalidate(&id).await {
        Ok(incident) => (StatusCode::OK, Json(json!({ "data": incident }))).into_response(),
        Err(err) => error_response(err),
    }
}

/// Health of the configured demo workloads, queried live from the cluster.
async fn demo_workloads(State(state): State<AppState>) -> Response {
    let mut statuses = Vec::with_capacity(state.demo_workloads.len());
    for target in &state.demo_workloads {
        statuses.push(workload_status(&state, &target.namespace, &target.workload).await);
    }
    let total = statuses.len();
    (
        StatusCode::OK,
        Json(json!({ "data": statuses, "meta": { "total": total } })),
    )
        .into_response()
}

async fn workload_status(state: &AppState, namespace: &str, workload: &str) -> WorkloadStatus {
    let mut status = WorkloadStatus {
        namespace: namespace.to_string(),
        workload: workload.to_string(),
        desired_replicas: 0,
        ready_replicas: 0,
        available_replicas: 0,
        restarts: 0,
        status: "unknown".to_string(),
        message: None,
    };

    let deployments = match state.cluster.list_deployments(namespace).await {
        Ok(deployments) => deployments,
        Err(err) => {
            status.message = Some(err.to_string());
            return status;
        }
    };
    let Some(deployment) = deployments.into_iter().find(|d| d.name == workload) else {
        status.message = Some("deployment not found".to_string());
        return status;
    };
    status.desired_replicas = deployment.desired;
    status.ready_replicas = deployment.ready;
    status.available_replicas = deployment.available;
    if let Some((condition, message)) = deployment.failed_conditions.first() {
        status.message = Some(format!("{condition}: {message}"));
    }

    if let Ok(pods) = state.cluster.list_pods(namespace).await {
        status.restarts = pods
            .iter()
            .filter(|p| p.name.starts_with(workload))
            .map(|p| p.restarts)
            .sum();
    }

    status.status = if status.ready_replicas >= status.desired_replicas && status.restarts == 0 {
        "healthy".to_string()
    } else {
        "degraded".to_string()
    };
    status
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn error_response(err: PipelineError) -> Response {
    let status = match &err {
        PipelineError::LockBusy(_) | PipelineError::LeaseLost(_) => StatusCode::CONFLICT,
        PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        PipelineError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_body(status, err.to_string())
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
