//! Registry operations over the `vms` table.
//!
//! All writes are single statements; the assignment notification is emitted
//! by a database trigger on the same commit that sets `crd_command`, so
//! subscribers never observe an assignment without its notification.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Result};

use crate::db::enums::{GpuHealth, VmStatus};
use crate::db::models::{Assignment, VmRow};

/// Channel the assignment trigger notifies on. Shared with the dispatcher.
pub const VM_UPDATES_CHANNEL: &str = "vm_updates";

/// Upsert keyed on hostname; an existing row only has its status updated.
/// Called by the VM itself through the status endpoint, so a VM that
/// reboots re-registers without losing its assignment.
pub async fn insert_or_update_status(pool: &PgPool, hostname: &str, status: VmStatus) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO vms (hostname, status)
        VALUES ($1, $2)
        ON CONFLICT (hostname) DO UPDATE SET status = EXCLUDED.status
        "#,
    )
    .bind(hostname)
    .bind(status.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

/// Atomically binds `(email, command, pin)` to the oldest assignable row.
///
/// `FOR UPDATE SKIP LOCKED` makes concurrent callers pick distinct rows, so
/// a hostname is never assigned twice. Returns `None` when the pool has no
/// free running VM.
pub async fn assign(
    pool: &PgPool,
    email: &str,
    crd_command: &str,
    pin: &str,
) -> Result<Option<String>> {
    let hostname: Option<String> = sqlx::query_scalar(
        r#"
        UPDATE vms
        SET user_email = $1,
            crd_command = $2,
            pin = $3,
            in_use = FALSE,
            healthy = NULL
        WHERE hostname = (
            SELECT hostname FROM vms
            WHERE user_email IS NULL AND status = 'running'
            ORDER BY created_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING hostname
        "#,
    )
    .bind(email)
    .bind(crd_command)
    .bind(pin)
    .fetch_optional(pool)
    .await?;
    Ok(hostname)
}

pub async fn get_assignment_by_email(pool: &PgPool, email: &str) -> Result<Option<Assignment>> {
    sqlx::query_as::<_, Assignment>(
        "SELECT hostname, pin, crd_command FROM vms WHERE user_email = $1 ORDER BY created_at LIMIT 1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await
}

/// Hostnames eligible for assignment, oldest first. Rows that are not
/// `running` or already carry a user never appear here.
pub async fn list_unassigned_running(pool: &PgPool) -> Result<Vec<String>> {
    sqlx::query_scalar(
        "SELECT hostname FROM vms WHERE user_email IS NULL AND status = 'running' ORDER BY created_at",
    )
    .fetch_all(pool)
    .await
}

pub async fn count_unassigned_running(pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM vms WHERE user_email IS NULL AND status = 'running'",
    )
    .fetch_one(pool)
    .await
}

/// Returns the rows affected; 0 means the hostname is unknown.
pub async fn update_in_use(pool: &PgPool, hostname: &str, in_use: bool) -> Result<u64> {
    let rows = sqlx::query("UPDATE vms SET in_use = $1 WHERE hostname = $2")
        .bind(in_use)
        .bind(hostname)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows)
}

pub async fn update_health(pool: &PgPool, hostname: &str, health: GpuHealth) -> Result<u64> {
    let rows = sqlx::query("UPDATE vms SET healthy = $1 WHERE hostname = $2")
        .bind(health.as_str())
        .bind(hostname)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows)
}

pub async fn update_status(pool: &PgPool, hostname: &str, status: VmStatus) -> Result<u64> {
    let rows = sqlx::query("UPDATE vms SET status = $1 WHERE hostname = $2")
        .bind(status.as_str())
        .bind(hostname)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows)
}

pub async fn append_logs(pool: &PgPool, hostname: &str, text: &str) -> Result<u64> {
    let rows = sqlx::query(
        "UPDATE vms SET logs = COALESCE(logs, '') || $1 WHERE hostname = $2",
    )
    .bind(text)
    .bind(hostname)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Partial update of the timing columns; absent fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct TimingUpdate {
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
}

pub async fn upsert_timings(pool: &PgPool, hostname: &str, update: &TimingUpdate) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE vms SET
            terraform_apply_start = COALESCE($1, terraform_apply_start),
            terraform_apply_end = COALESCE($2, terraform_apply_end),
            terraform_apply_duration_seconds = COALESCE($3, terraform_apply_duration_seconds),
            cloud_init_start = COALESCE($4, cloud_init_start),
            cloud_init_end = COALESCE($5, cloud_init_end),
            cloud_init_duration_seconds = COALESCE($6, cloud_init_duration_seconds),
            container_start = COALESCE($7, container_start),
            container_end = COALESCE($8, container_end),
            container_startup_duration_seconds = COALESCE($9, container_startup_duration_seconds),
            total_startup_duration_seconds = COALESCE($10, total_startup_duration_seconds)
        WHERE hostname = $11
        "#,
    )
    .bind(update.terraform_apply_start)
    .bind(update.terraform_apply_end)
    .bind(update.terraform_apply_duration_seconds)
    .bind(update.cloud_init_start)
    .bind(update.cloud_init_end)
    .bind(update.cloud_init_duration_seconds)
    .bind(update.container_start)
    .bind(update.container_end)
    .bind(update.container_startup_duration_seconds)
    .bind(update.total_startup_duration_seconds)
    .bind(hostname)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

pub async fn get_row(pool: &PgPool, hostname: &str) -> Result<Option<VmRow>> {
    sqlx::query_as::<_, VmRow>("SELECT * FROM vms WHERE hostname = $1")
        .bind(hostname)
        .fetch_optional(pool)
        .await
}

pub async fn list_rows(pool: &PgPool) -> Result<Vec<VmRow>> {
    sqlx::query_as::<_, VmRow>("SELECT * FROM vms ORDER BY created_at")
        .fetch_all(pool)
        .await
}

pub async fn count_rows(pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM vms")
        .fetch_one(pool)
        .await
}

/// Empties the registry. Only teardown calls this, after a successful
/// destroy of the underlying instances.
pub async fn clear_all(pool: &PgPool) -> Result<u64> {
    let rows = sqlx::query("DELETE FROM vms")
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows)
}

/// Opens a dedicated LISTEN connection on the assignment channel. The
/// listener does not multiplex application queries; each dispatcher holds
/// its own.
pub async fn subscribe(pool: &PgPool) -> Result<PgListener> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(VM_UPDATES_CHANNEL).await?;
    Ok(listener)
}
