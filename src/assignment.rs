//! Assignment engine: matches a user's remote-desktop credential to a free
//! running VM. The actual row write lives in `db::registry::assign`; this
//! module owns validation and the request-level protocol.

use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use crate::db::models::Assignment;
use crate::db::registry;

#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error("Invalid command: the CRD command must contain --code")]
    InvalidCommand,
    #[error("Email must not be empty")]
    MissingEmail,
    #[error("No available VMs.")]
    NoCapacity,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub fn validate_request(email: &str, crd_command: &str) -> Result<(), AssignmentError> {
    if email.trim().is_empty() {
        return Err(AssignmentError::MissingEmail);
    }
    if crd_command.trim().is_empty() || !crd_command.contains("--code") {
        return Err(AssignmentError::InvalidCommand);
    }
    Ok(())
}

/// Binds `(email, crd_command, pin)` to the first free running VM.
///
/// The row update commits together with its channel notification, so by the
/// time this returns both the user-facing wait and the target VM's agent
/// can observe the assignment.
pub async fn request_vm(
    pool: &PgPool,
    email: &str,
    crd_command: &str,
    pin: &str,
) -> Result<Assignment, AssignmentError> {
    validate_request(email, crd_command)?;

    // The capacity pre-check keeps the common empty-pool case off the
    // row-locking path; a race between check and assign still resolves to
    // NoCapacity below.
    if registry::list_unassigned_running(pool).await?.is_empty() {
        return Err(AssignmentError::NoCapacity);
    }

    let hostname = registry::assign(pool, email, crd_command, pin)
        .await?
        .ok_or(AssignmentError::NoCapacity)?;

    info!(hostname = %hostname, email = %email, "Assigned VM to user.");

    registry::get_assignment_by_email(pool, email)
        .await?
        .ok_or(AssignmentError::NoCapacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_command_without_code_flag() {
        let err = validate_request("u@x.org", "bash -c 'rm -rf /'").unwrap_err();
        assert!(matches!(err, AssignmentError::InvalidCommand));
    }

    #[test]
    fn rejects_empty_command() {
        let err = validate_request("u@x.org", "   ").unwrap_err();
        assert!(matches!(err, AssignmentError::InvalidCommand));
    }

    #[test]
    fn rejects_empty_email() {
        let err = validate_request("", "start-host --code=4/AAAA").unwrap_err();
        assert!(matches!(err, AssignmentError::MissingEmail));
    }

    #[test]
    fn accepts_well_formed_request() {
        assert!(validate_request("u@x.org", "start-host --code=4/AAAA --name=vm1").is_ok());
    }
}
