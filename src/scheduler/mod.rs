//! Persistent destruction scheduler.
//!
//! The `scheduled_destructions` table is the job store; armed triggers are
//! plain tokio tasks derived from the rows, so a restart rebuilds the whole
//! trigger set from the table (`resume`). A trigger task runs its execution
//! inline, which gives `max_instances = 1` per job for free.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::enums::{ScheduleStatus, VmStatus};
use crate::db::models::ScheduledDestruction;
use crate::db::registry;
use crate::db::schedule_store::{self, NewSchedule};
use crate::provisioner::TerraformRunner;

pub mod rrule;

use rrule::{Recurrence, RruleError};

/// A job that should have fired during an outage still fires once on
/// resume, if within this window.
const MISFIRE_GRACE: chrono::Duration = chrono::Duration::minutes(5);

/// Wall-clock budget for one destruction run.
const EXECUTION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("destruction_time must be in the future")]
    PastDate,
    #[error("a schedule named '{0}' already exists")]
    DuplicateName(String),
    #[error("invalid recurrence rule: {0}")]
    InvalidRecurrence(#[from] RruleError),
    #[error("schedule {0} not found")]
    NotFound(i32),
    #[error("schedule {0} is already {1} and cannot be cancelled")]
    AlreadyTerminal(i32, String),
    #[error("schedule {0} is currently executing and cannot be cancelled")]
    Executing(i32),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub name: String,
    pub destruction_time: DateTime<Utc>,
    pub recurrence_rule: Option<String>,
    pub notification_enabled: bool,
    pub notification_hours_before: Option<i32>,
}

/// What to do with a `scheduled` row found at resume time.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FireDisposition {
    /// Fire at the stored time (still in the future).
    At(DateTime<Utc>),
    /// Fire immediately: the stored time passed within the grace window.
    Immediately,
    /// One-shot whose time passed beyond grace; mark as missed.
    Misfired,
    /// Recurring whose time passed beyond grace; advance to the next
    /// occurrence instead of firing stale.
    AdvanceTo(DateTime<Utc>),
}

/// Validates a request without touching the store: the fire time must be in
/// the future and the recurrence rule, if any, must parse. Returns the
/// parsed recurrence so insert and arm share one parse.
fn validate_request(
    req: &ScheduleRequest,
    now: DateTime<Utc>,
) -> Result<Option<Recurrence>, SchedulerError> {
    if req.destruction_time <= now {
        return Err(SchedulerError::PastDate);
    }
    Ok(req
        .recurrence_rule
        .as_deref()
        .map(Recurrence::from_str)
        .transpose()?)
}

/// Only `scheduled` rows may be cancelled. An `executing` row has a destroy
/// in flight that must not be orphaned mid-run; terminal rows are history.
fn check_cancellable(id: i32, status: ScheduleStatus, raw: &str) -> Result<(), SchedulerError> {
    if status == ScheduleStatus::Executing {
        return Err(SchedulerError::Executing(id));
    }
    if status.is_terminal() {
        return Err(SchedulerError::AlreadyTerminal(id, raw.to_string()));
    }
    Ok(())
}

fn classify_fire(
    now: DateTime<Utc>,
    destruction_time: DateTime<Utc>,
    recurrence: Option<&Recurrence>,
) -> FireDisposition {
    if destruction_time > now {
        return FireDisposition::At(destruction_time);
    }
    if now - destruction_time <= MISFIRE_GRACE {
        return FireDisposition::Immediately;
    }
    match recurrence {
        Some(rec) => FireDisposition::AdvanceTo(rec.next_occurrence(now)),
        None => FireDisposition::Misfired,
    }
}

pub struct DestructionScheduler {
    pool: PgPool,
    runner: Arc<TerraformRunner>,
    triggers: Mutex<HashMap<i32, JoinHandle<()>>>,
}

impl DestructionScheduler {
    pub fn new(pool: PgPool, runner: Arc<TerraformRunner>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            runner,
            triggers: Mutex::new(HashMap::new()),
        })
    }

    /// Creates a schedule row and arms its trigger. The request is
    /// validated before the insert so a bad rule or past date never leaves
    /// an orphan row.
    pub async fn schedule(self: &Arc<Self>, req: ScheduleRequest) -> Result<i32, SchedulerError> {
        let recurrence = validate_request(&req, Utc::now())?;

        let id = schedule_store::insert(
            &self.pool,
            &NewSchedule {
                schedule_name: &req.name,
                destruction_time: req.destruction_time,
                recurrence_rule: req.recurrence_rule.as_deref(),
                notification_enabled: req.notification_enabled,
                notification_hours_before: req.notification_hours_before,
            },
        )
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                SchedulerError::DuplicateName(req.name.clone())
            }
            _ => SchedulerError::Database(e),
        })?;

        self.arm(id, req.destruction_time, recurrence).await;
        info!(id, name = %req.name, at = %req.destruction_time, "Destruction scheduled.");
        Ok(id)
    }

    /// Removes the armed trigger (if any) and marks the row cancelled.
    pub async fn cancel(self: &Arc<Self>, id: i32) -> Result<(), SchedulerError> {
        let row = schedule_store::get(&self.pool, id)
            .await?
            .ok_or(SchedulerError::NotFound(id))?;
        let status =
            ScheduleStatus::from_str(&row.status).unwrap_or(ScheduleStatus::Scheduled);
        check_cancellable(id, status, &row.status)?;

        if let Some(handle) = self.triggers.lock().await.remove(&id) {
            handle.abort();
        }
        schedule_store::set_status(&self.pool, id, ScheduleStatus::Cancelled).await?;
        info!(id, name = %row.schedule_name, "Destruction schedule cancelled.");
        Ok(())
    }

    pub async fn get(&self, id: i32) -> Result<Option<ScheduledDestruction>, SchedulerError> {
        Ok(schedule_store::get(&self.pool, id).await?)
    }

    pub async fn list(&self) -> Result<Vec<ScheduledDestruction>, SchedulerError> {
        Ok(schedule_store::list(&self.pool).await?)
    }

    /// Re-arms every `scheduled` row after a restart. Arming replaces any
    /// existing trigger for the same id, so repeated resumes are idempotent.
    pub async fn resume(self: &Arc<Self>) -> Result<usize, SchedulerError> {
        let rows = schedule_store::list_with_status(&self.pool, ScheduleStatus::Scheduled).await?;
        let now = Utc::now();
        let mut armed = 0usize;

        for row in rows {
            let recurrence = match row.recurrence_rule.as_deref().map(Recurrence::from_str) {
                Some(Ok(rec)) => Some(rec),
                Some(Err(e)) => {
                    // Row written by an older version with a wider rule
                    // vocabulary; refuse to guess a fire time.
                    error!(id = row.id, error = %e, "Unparseable recurrence rule on resume; marking failed.");
                    schedule_store::record_execution(
                        &self.pool,
                        row.id,
                        ScheduleStatus::Failed,
                        &format!("invalid recurrence rule: {e}"),
                    )
                    .await?;
                    continue;
                }
                None => None,
            };

            match classify_fire(now, row.destruction_time, recurrence.as_ref()) {
                FireDisposition::At(t) => {
                    self.arm(row.id, t, recurrence).await;
                    armed += 1;
                }
                FireDisposition::Immediately => {
                    warn!(id = row.id, "Missed fire within grace window; firing now.");
                    self.arm(row.id, now, recurrence).await;
                    armed += 1;
                }
                FireDisposition::AdvanceTo(next) => {
                    warn!(id = row.id, next = %next, "Recurring schedule missed beyond grace; advancing.");
                    schedule_store::rearm(&self.pool, row.id, next).await?;
                    self.arm(row.id, next, recurrence).await;
                    armed += 1;
                }
                FireDisposition::Misfired => {
                    warn!(id = row.id, "One-shot schedule missed beyond grace; marking failed.");
                    schedule_store::record_execution(
                        &self.pool,
                        row.id,
                        ScheduleStatus::Failed,
                        "missed fire time beyond misfire grace",
                    )
                    .await?;
                }
            }
        }
        info!(armed, "Scheduler resume complete.");
        Ok(armed)
    }

    /// Spawns the trigger task for a schedule, replacing any armed trigger
    /// with the same id.
    async fn arm(self: &Arc<Self>, id: i32, fire_at: DateTime<Utc>, recurrence: Option<Recurrence>) {
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let delay = (fire_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;
            scheduler.fire(id, recurrence).await;
        });

        if let Some(old) = self.triggers.lock().await.insert(id, handle) {
            old.abort();
        }
    }

    async fn mark_remaining_unknown(&self, id: i32) {
        let rows = match registry::list_rows(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(id, error = %e, "Failed to list registry rows after destroy timeout.");
                return;
            }
        };
        for row in rows {
            if let Err(e) =
                registry::update_status(&self.pool, &row.hostname, VmStatus::Unknown).await
            {
                error!(id, hostname = %row.hostname, error = %e, "Failed to mark VM status unknown.");
            }
        }
    }

    /// One execution of a schedule: destroy the pool under the wall-clock
    /// budget, record the outcome, and re-arm recurring schedules.
    fn fire(
        self: Arc<Self>,
        id: i32,
        recurrence: Option<Recurrence>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
        if let Err(e) = schedule_store::set_status(&self.pool, id, ScheduleStatus::Executing).await
        {
            error!(id, error = %e, "Failed to mark schedule executing; skipping fire.");
            return;
        }
        info!(id, "Scheduled destruction executing.");

        let result =
            tokio::time::timeout(EXECUTION_TIMEOUT, self.runner.destroy(&self.pool)).await;
        let (status, message) = match result {
            Ok(Ok(())) => (
                ScheduleStatus::Completed,
                "All VMs destroyed successfully".to_string(),
            ),
            Ok(Err(e)) => (ScheduleStatus::Failed, e.to_string()),
            Err(_) => {
                // A timed-out destroy may have torn down some instances and
                // not others; the remaining rows no longer describe a known
                // state.
                self.mark_remaining_unknown(id).await;
                (
                    ScheduleStatus::Failed,
                    format!(
                        "destruction exceeded {} second budget",
                        EXECUTION_TIMEOUT.as_secs()
                    ),
                )
            }
        };

        if let Err(e) =
            schedule_store::record_execution(&self.pool, id, status, &message).await
        {
            error!(id, error = %e, "Failed to record schedule execution result.");
        }
        match status {
            ScheduleStatus::Completed => info!(id, "Scheduled destruction completed."),
            _ => error!(id, result = %message, "Scheduled destruction failed."),
        }

        self.triggers.lock().await.remove(&id);

        // A recurring schedule comes back as `scheduled` for its next fire,
        // whatever this occurrence's outcome was recorded as.
        if let Some(rec) = recurrence {
            let next = rec.next_occurrence(Utc::now());
            match schedule_store::rearm(&self.pool, id, next).await {
                Ok(_) => {
                    info!(id, next = %next, "Recurring schedule re-armed.");
                    self.arm(id, next, Some(rec)).await;
                }
                Err(e) => error!(id, error = %e, "Failed to re-arm recurring schedule."),
            }
        }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 24, h, m, 0).unwrap()
    }

    #[test]
    fn future_time_fires_at_stored_time() {
        let now = at(12, 0);
        let fire = at(14, 0);
        assert_eq!(classify_fire(now, fire, None), FireDisposition::At(fire));
    }

    #[test]
    fn missed_within_grace_fires_immediately() {
        let now = at(12, 0);
        let fire = at(11, 57);
        assert_eq!(classify_fire(now, fire, None), FireDisposition::Immediately);
    }

    #[test]
    fn one_shot_missed_beyond_grace_is_misfired() {
        let now = at(12, 0);
        let fire = at(11, 0);
        assert_eq!(classify_fire(now, fire, None), FireDisposition::Misfired);
    }

    #[test]
    fn recurring_missed_beyond_grace_advances() {
        let rec: Recurrence = "FREQ=DAILY;BYHOUR=3;BYMINUTE=0".parse().unwrap();
        let now = at(12, 0);
        let fire = at(3, 0);
        let next = Utc.with_ymd_and_hms(2026, 8, 25, 3, 0, 0).unwrap();
        assert_eq!(
            classify_fire(now, fire, Some(&rec)),
            FireDisposition::AdvanceTo(next)
        );
    }

    #[test]
    fn grace_boundary_is_inclusive() {
        let now = at(12, 0);
        let fire = now - MISFIRE_GRACE;
        assert_eq!(classify_fire(now, fire, None), FireDisposition::Immediately);
    }

    fn request(destruction_time: DateTime<Utc>, rule: Option<&str>) -> ScheduleRequest {
        ScheduleRequest {
            name: "nightly".to_string(),
            destruction_time,
            recurrence_rule: rule.map(str::to_string),
            notification_enabled: false,
            notification_hours_before: None,
        }
    }

    #[test]
    fn past_destruction_time_is_rejected() {
        let now = at(12, 0);
        let err = validate_request(&request(at(11, 0), None), now).unwrap_err();
        assert!(matches!(err, SchedulerError::PastDate));
        // Exactly now counts as past; the trigger could never fire.
        let err = validate_request(&request(now, None), now).unwrap_err();
        assert!(matches!(err, SchedulerError::PastDate));
    }

    #[test]
    fn unparseable_rule_is_rejected_before_insert() {
        let now = at(12, 0);
        let err =
            validate_request(&request(at(14, 0), Some("FREQ=MONTHLY;BYHOUR=3")), now)
                .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRecurrence(_)));
    }

    #[test]
    fn valid_request_yields_parsed_recurrence() {
        let now = at(12, 0);
        let rec = validate_request(
            &request(at(14, 0), Some("FREQ=DAILY;BYHOUR=3;BYMINUTE=0")),
            now,
        )
        .unwrap()
        .expect("recurrence");
        assert_eq!(rec.by_hour, 3);
        assert!(validate_request(&request(at(14, 0), None), now)
            .unwrap()
            .is_none());
    }

    #[test]
    fn executing_schedule_cannot_be_cancelled() {
        let err = check_cancellable(7, ScheduleStatus::Executing, "executing").unwrap_err();
        assert!(matches!(err, SchedulerError::Executing(7)));
    }

    #[test]
    fn terminal_schedule_cannot_be_cancelled() {
        let err = check_cancellable(7, ScheduleStatus::Completed, "completed").unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyTerminal(7, _)));
    }

    #[test]
    fn scheduled_row_is_cancellable() {
        assert!(check_cancellable(7, ScheduleStatus::Scheduled, "scheduled").is_ok());
    }
}
