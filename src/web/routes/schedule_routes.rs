//! Admin CRUD for scheduled destructions.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};

use crate::db::models::ScheduledDestruction;
use crate::scheduler::ScheduleRequest;
use crate::web::models::{ScheduleCreatedResponse, ScheduleDestructionRequest};
use crate::web::{AppState, error::AppError};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/schedule-destruction",
            get(list_handler).post(create_handler),
        )
        .route(
            "/api/schedule-destruction/{id}",
            get(get_handler).delete(cancel_handler),
        )
}

async fn create_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScheduleDestructionRequest>,
) -> Result<(StatusCode, Json<ScheduleCreatedResponse>), AppError> {
    let name = body
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput("name is required".to_string()))?;
    let destruction_time = body
        .destruction_time
        .ok_or_else(|| AppError::InvalidInput("destruction_time is required".to_string()))?;

    let id = state
        .scheduler
        .schedule(ScheduleRequest {
            name,
            destruction_time,
            recurrence_rule: body.recurrence_rule,
            notification_enabled: body.notification_enabled,
            notification_hours_before: body.notification_hours_before,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ScheduleCreatedResponse {
            id,
            status: "scheduled".to_string(),
        }),
    ))
}

async fn list_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ScheduledDestruction>>, AppError> {
    Ok(Json(state.scheduler.list().await?))
}

async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<ScheduledDestruction>, AppError> {
    let row = state
        .scheduler
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("schedule {id} not found")))?;
    Ok(Json(row))
}

async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.scheduler.cancel(id).await?;
    Ok(Json(serde_json::json!({ "id": id, "status": "cancelled" })))
}
