//! Request/response bodies for the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RequestVmForm {
    pub email: String,
    pub crd_command: String,
}

#[derive(Debug, Deserialize)]
pub struct VmStartupRequest {
    pub hostname: Option<String>,
}

/// Long-poll response consumed by the VM agent's subscribe loop.
#[derive(Debug, Serialize, Deserialize)]
pub struct VmStartupResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UnassignedCountResponse {
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct InUseUpdateRequest {
    pub hostname: Option<String>,
    pub status: Option<bool>,
}

/// Health report shape accepted by the allocator; older client builds sent
/// `{status, message}` but only this form is supported.
#[derive(Debug, Serialize, Deserialize)]
pub struct GpuHealthRequest {
    pub hostname: Option<String>,
    pub gpu_status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VmStatusRequest {
    pub hostname: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VmStatusResponse {
    pub hostname: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct VmLogsRequest {
    pub log_group: Option<String>,
    pub log_stream: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct VmLogsResponse {
    pub hostname: String,
    pub logs: String,
}

/// Startup timing report posted by a VM once its container is up.
#[derive(Debug, Deserialize)]
pub struct VmMetricsRequest {
    pub cloud_init_start: Option<DateTime<Utc>>,
    pub cloud_init_end: Option<DateTime<Utc>>,
    pub cloud_init_duration_seconds: Option<f64>,
    pub container_start: Option<DateTime<Utc>>,
    pub container_end: Option<DateTime<Utc>>,
    pub container_startup_duration_seconds: Option<f64>,
    pub total_startup_duration_seconds: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct LaunchForm {
    pub num_vms: i64,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleDestructionRequest {
    pub name: Option<String>,
    pub destruction_time: Option<DateTime<Utc>>,
    pub recurrence_rule: Option<String>,
    #[serde(default)]
    pub notification_enabled: bool,
    pub notification_hours_before: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct ScheduleCreatedResponse {
    pub id: i32,
    pub status: String,
}
