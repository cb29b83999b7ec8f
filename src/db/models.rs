use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A pool VM as stored in the `vms` table, keyed by hostname.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VmRow {
    pub hostname: String,
    pub pin: Option<String>,
    pub crd_command: Option<String>,
    pub user_email: Option<String>,
    pub in_use: bool,
    pub healthy: Option<String>,
    pub status: String,
    pub logs: Option<String>,
    pub terraform_apply_start: Option<DateTime<Utc>>,
    pub terraform_apply_end: Option<DateTime<Utc>>,
    pub terraform_apply_duration_seconds: Option<f64>,
    pub cloud_init_start: Option<DateTime<Utc>>,
    pub cloud_init_end: Option<DateTime<Utc>>,
    pub cloud_init_duration_seconds: Option<f64>,
    pub container_start: Option<DateTime<Utc>>,
    pub container_end: Option<DateTime<Utc>>,
    pub container_startup_duration_seconds: Option<f64>,
    pub total_startup_duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// The triple returned to a user after a successful assignment.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Assignment {
    pub hostname: String,
    pub pin: Option<String>,
    pub crd_command: Option<String>,
}

/// A scheduled destruction as stored in `scheduled_destructions`.
/// Rows outlive executions; a recurring row is re-armed after each fire.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledDestruction {
    pub id: i32,
    pub schedule_name: String,
    pub destruction_time: DateTime<Utc>,
    pub recurrence_rule: Option<String>,
    pub status: String,
    pub execution_count: i32,
    pub last_execution_time: Option<DateTime<Utc>>,
    pub last_execution_result: Option<String>,
    pub notification_enabled: bool,
    pub notification_hours_before: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload carried on the `vm_updates` notification channel.
/// Field names are part of the wire contract with the VM agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentPayload {
    #[serde(rename = "HostName")]
    pub host_name: Option<String>,
    #[serde(rename = "CrdCommand")]
    pub crd_command: Option<String>,
    #[serde(rename = "Pin")]
    pub pin: Option<String>,
}

/// Per-instance timings parsed from the IaC tool's JSON output.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplyTiming {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub seconds: f64,
}
