//! Persistence for scheduled destructions. The scheduler derives its armed
//! triggers from these rows, so a restart can rebuild them from the table
//! alone.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Result};

use crate::db::enums::ScheduleStatus;
use crate::db::models::ScheduledDestruction;

pub struct NewSchedule<'a> {
    pub schedule_name: &'a str,
    pub destruction_time: DateTime<Utc>,
    pub recurrence_rule: Option<&'a str>,
    pub notification_enabled: bool,
    pub notification_hours_before: Option<i32>,
}

/// Inserts a schedule row. A unique violation on `schedule_name` surfaces
/// as `sqlx::Error::Database`; the caller maps it to a duplicate-name error.
pub async fn insert(pool: &PgPool, new: &NewSchedule<'_>) -> Result<i32> {
    sqlx::query_scalar(
        r#"
        INSERT INTO scheduled_destructions
            (schedule_name, destruction_time, recurrence_rule, status,
             notification_enabled, notification_hours_before)
        VALUES ($1, $2, $3, 'scheduled', $4, $5)
        RETURNING id
        "#,
    )
    .bind(new.schedule_name)
    .bind(new.destruction_time)
    .bind(new.recurrence_rule)
    .bind(new.notification_enabled)
    .bind(new.notification_hours_before)
    .fetch_one(pool)
    .await
}

pub async fn get(pool: &PgPool, id: i32) -> Result<Option<ScheduledDestruction>> {
    sqlx::query_as::<_, ScheduledDestruction>(
        "SELECT * FROM scheduled_destructions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn list(pool: &PgPool) -> Result<Vec<ScheduledDestruction>> {
    sqlx::query_as::<_, ScheduledDestruction>(
        "SELECT * FROM scheduled_destructions ORDER BY destruction_time",
    )
    .fetch_all(pool)
    .await
}

pub async fn list_with_status(
    pool: &PgPool,
    status: ScheduleStatus,
) -> Result<Vec<ScheduledDestruction>> {
    sqlx::query_as::<_, ScheduledDestruction>(
        "SELECT * FROM scheduled_destructions WHERE status = $1 ORDER BY destruction_time",
    )
    .bind(status.as_str())
    .fetch_all(pool)
    .await
}

pub async fn set_status(pool: &PgPool, id: i32, status: ScheduleStatus) -> Result<u64> {
    let rows = sqlx::query("UPDATE scheduled_destructions SET status = $1 WHERE id = $2")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows)
}

/// Records the outcome of one execution and bumps the execution counter.
pub async fn record_execution(
    pool: &PgPool,
    id: i32,
    status: ScheduleStatus,
    result: &str,
) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE scheduled_destructions
        SET status = $1,
            execution_count = execution_count + 1,
            last_execution_time = now(),
            last_execution_result = $2
        WHERE id = $3
        "#,
    )
    .bind(status.as_str())
    .bind(result)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Re-arms a recurring schedule for its next occurrence.
pub async fn rearm(pool: &PgPool, id: i32, next_fire: DateTime<Utc>) -> Result<u64> {
    let rows = sqlx::query(
        "UPDATE scheduled_destructions SET status = 'scheduled', destruction_time = $1 WHERE id = $2",
    )
    .bind(next_fire)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}
