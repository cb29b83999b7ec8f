//! Unauthenticated surface: the user-facing request form handler plus the
//! endpoints the VM agents call back into.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{Path, State},
    response::Html,
    routing::{get, post},
};
use tracing::{error, info};

use crate::assignment::{self, AssignmentError};
use crate::db::enums::{GpuHealth, VmStatus};
use crate::db::registry::{self, TimingUpdate};
use crate::dispatch;
use crate::web::models::{
    GpuHealthRequest, InUseUpdateRequest, RequestVmForm, UnassignedCountResponse, VmLogsRequest,
    VmLogsResponse, VmMetricsRequest, VmStartupRequest, VmStartupResponse, VmStatusRequest,
    VmStatusResponse,
};
use crate::web::{AppState, error::AppError};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/request_vm", post(request_vm_handler))
        .route("/vm_startup", post(vm_startup_handler))
        .route("/api/unassigned_vms_count", get(unassigned_count_handler))
        .route("/api/update_inuse_status", post(update_in_use_handler))
        .route("/api/gpu_health", post(gpu_health_handler))
        .route("/api/vm-status", post(post_vm_status_handler).get(all_vm_status_handler))
        .route("/api/vm-status/{hostname}", get(get_vm_status_handler))
        .route("/api/vm-logs", post(post_vm_logs_handler))
        .route("/api/vm-logs/{hostname}", get(get_vm_logs_handler))
        .route("/api/vm-metrics/{hostname}", post(post_vm_metrics_handler))
}

/// User submits a CRD credential; on success the page shows the assigned
/// host and pin. Validation and capacity failures render as an error page
/// with status 200, since they are expected outcomes rather than faults.
async fn request_vm_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<RequestVmForm>,
) -> Result<Html<String>, AppError> {
    match assignment::request_vm(&state.pool, &form.email, &form.crd_command, &state.config.app.pin)
        .await
    {
        Ok(assigned) => {
            let mut ctx = tera::Context::new();
            ctx.insert("hostname", &assigned.hostname);
            ctx.insert("pin", &assigned.pin);
            ctx.insert("email", &form.email);
            Ok(Html(state.templates.render("success.html", &ctx)?))
        }
        Err(e @ (AssignmentError::InvalidCommand
        | AssignmentError::MissingEmail
        | AssignmentError::NoCapacity)) => {
            let mut ctx = tera::Context::new();
            ctx.insert("message", &e.to_string());
            Ok(Html(state.templates.render("error.html", &ctx)?))
        }
        Err(AssignmentError::Database(e)) => {
            error!(error = %e, "Assignment failed with database error.");
            Err(AppError::DatabaseError(e.to_string()))
        }
    }
}

/// Long-poll endpoint for the VM agent. Holds the request open (with one
/// dedicated LISTEN connection) until an assignment for this hostname
/// commits; dropping the request cancels the dispatcher.
async fn vm_startup_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VmStartupRequest>,
) -> Result<Json<VmStartupResponse>, AppError> {
    let hostname = body
        .hostname
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput("hostname is required".to_string()))?;

    if registry::get_row(&state.pool, &hostname).await?.is_none() {
        return Err(AppError::NotFound(format!("unknown hostname: {hostname}")));
    }

    let matched = dispatch::wait_for_assignment(&state.pool, &hostname)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    info!(hostname = %hostname, "Delivered assignment to VM agent.");
    Ok(Json(VmStartupResponse {
        status: "success".to_string(),
        pin: Some(matched.pin),
        command: Some(matched.command),
        message: None,
    }))
}

async fn unassigned_count_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<UnassignedCountResponse>, AppError> {
    let count = registry::count_unassigned_running(&state.pool).await?;
    Ok(Json(UnassignedCountResponse { count }))
}

async fn update_in_use_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InUseUpdateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let hostname = body
        .hostname
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput("hostname is required".to_string()))?;
    let in_use = body
        .status
        .ok_or_else(|| AppError::InvalidInput("status is required".to_string()))?;

    if registry::update_in_use(&state.pool, &hostname, in_use).await? == 0 {
        return Err(AppError::InvalidInput(format!(
            "unknown hostname: {hostname}"
        )));
    }
    Ok(Json(serde_json::json!({ "status": "success" })))
}

async fn gpu_health_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GpuHealthRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let hostname = body
        .hostname
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput("hostname is required".to_string()))?;
    let gpu_status = body
        .gpu_status
        .ok_or_else(|| AppError::InvalidInput("gpu_status is required".to_string()))?;
    let health = GpuHealth::from_str(&gpu_status).map_err(AppError::InvalidInput)?;

    if registry::update_health(&state.pool, &hostname, health).await? == 0 {
        return Err(AppError::InvalidInput(format!(
            "unknown hostname: {hostname}"
        )));
    }
    Ok(Json(serde_json::json!({ "status": "success" })))
}

/// Status registration/update, called by the VM itself. An unknown
/// hostname creates its row; the allocator never advances status on a VM's
/// behalf.
async fn post_vm_status_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VmStatusRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let hostname = body
        .hostname
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput("hostname is required".to_string()))?;
    let status_raw = body
        .status
        .ok_or_else(|| AppError::InvalidInput("status is required".to_string()))?;
    let status = VmStatus::from_str(&status_raw).map_err(AppError::InvalidInput)?;

    registry::insert_or_update_status(&state.pool, &hostname, status).await?;
    info!(hostname = %hostname, status = %status, "VM status updated.");
    Ok(Json(serde_json::json!({ "status": "success" })))
}

async fn get_vm_status_handler(
    State(state): State<Arc<AppState>>,
    Path(hostname): Path<String>,
) -> Result<Json<VmStatusResponse>, AppError> {
    let row = registry::get_row(&state.pool, &hostname)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("unknown hostname: {hostname}")))?;
    Ok(Json(VmStatusResponse {
        hostname: row.hostname,
        status: row.status,
    }))
}

async fn all_vm_status_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HashMap<String, String>>, AppError> {
    let rows = registry::list_rows(&state.pool).await?;
    if rows.is_empty() {
        return Err(AppError::NotFound("no VMs registered".to_string()));
    }
    Ok(Json(
        rows.into_iter().map(|r| (r.hostname, r.status)).collect(),
    ))
}

/// Log shipping from the VM: messages are appended to the row keyed by the
/// log stream name (the hostname).
async fn post_vm_logs_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VmLogsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let stream = body
        .log_stream
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput("log_stream is required".to_string()))?;
    if body.messages.is_empty() {
        return Ok(Json(serde_json::json!({ "status": "success" })));
    }

    let mut text = body.messages.join("\n");
    text.push('\n');
    if registry::append_logs(&state.pool, &stream, &text).await? == 0 {
        return Err(AppError::NotFound(format!("unknown log stream: {stream}")));
    }
    info!(
        group = body.log_group.as_deref().unwrap_or("-"),
        stream = %stream,
        lines = body.messages.len(),
        "Appended VM logs."
    );
    Ok(Json(serde_json::json!({ "status": "success" })))
}

async fn get_vm_logs_handler(
    State(state): State<Arc<AppState>>,
    Path(hostname): Path<String>,
) -> Result<Json<VmLogsResponse>, AppError> {
    let row = registry::get_row(&state.pool, &hostname)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("unknown hostname: {hostname}")))?;

    match row.logs {
        Some(logs) => Ok(Json(VmLogsResponse {
            hostname: row.hostname,
            logs,
        })),
        None if row.status == VmStatus::Initializing.as_str() => Err(AppError::Unavailable(
            "VM is still initializing; logs not yet available".to_string(),
        )),
        None => Ok(Json(VmLogsResponse {
            hostname: row.hostname,
            logs: String::new(),
        })),
    }
}

async fn post_vm_metrics_handler(
    State(state): State<Arc<AppState>>,
    Path(hostname): Path<String>,
    Json(body): Json<VmMetricsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let update = TimingUpdate {
        cloud_init_start: body.cloud_init_start,
        cloud_init_end: body.cloud_init_end,
        cloud_init_duration_seconds: body.cloud_init_duration_seconds,
        container_start: body.container_start,
        container_end: body.container_end,
        container_startup_duration_seconds: body.container_startup_duration_seconds,
        total_startup_duration_seconds: body.total_startup_duration_seconds,
        ..TimingUpdate::default()
    };
    if registry::upsert_timings(&state.pool, &hostname, &update).await? == 0 {
        return Err(AppError::NotFound(format!("unknown hostname: {hostname}")));
    }
    Ok(Json(serde_json::json!({ "status": "success" })))
}
