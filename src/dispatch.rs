//! Notification dispatcher: a per-request listener on the assignment
//! channel that resolves when a payload for the target hostname arrives.
//!
//! One dispatcher per in-flight wait; listeners are never shared. The inner
//! receive is bounded at 10 s so a dropped caller cancels the future at
//! worst one poll later.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgListener;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::models::AssignmentPayload;
use crate::db::registry;

const POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("notification channel disconnected: {0}")]
    Disconnected(sqlx::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A complete assignment for one hostname: pin plus CRD start command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedAssignment {
    pub pin: String,
    pub command: String,
}

/// Parses one raw channel payload and returns it only if it is complete and
/// addressed to `target`. Malformed payloads and payloads for other
/// hostnames are both dropped; duplicates are the caller's concern (it
/// closes after the first match).
pub fn match_payload(raw: &str, target: &str) -> Option<MatchedAssignment> {
    let payload: AssignmentPayload = match serde_json::from_str(raw) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Dropping malformed notification payload.");
            return None;
        }
    };
    match (payload.host_name, payload.crd_command, payload.pin) {
        (Some(host), Some(command), Some(pin)) if host == target => {
            Some(MatchedAssignment { pin, command })
        }
        (Some(host), Some(_), Some(_)) => {
            debug!(host = %host, target = %target, "Notification for another VM; ignoring.");
            None
        }
        _ => {
            warn!("Dropping notification payload with missing fields.");
            None
        }
    }
}

/// Blocks until an assignment for `target_hostname` is committed.
///
/// The listener is opened before the registry re-read, so an assignment
/// that commits in the gap is seen either by the read or by the channel,
/// never lost. Cancellation is by dropping the future (caller disconnect).
pub async fn wait_for_assignment(
    pool: &PgPool,
    target_hostname: &str,
) -> Result<MatchedAssignment, DispatchError> {
    let mut listener: PgListener = registry::subscribe(pool).await?;

    // Assignment may have committed before we began listening.
    if let Some(row) = registry::get_row(pool, target_hostname).await? {
        if let (Some(pin), Some(command)) = (row.pin, row.crd_command) {
            return Ok(MatchedAssignment { pin, command });
        }
    }

    loop {
        match tokio::time::timeout(POLL_INTERVAL, listener.recv()).await {
            Ok(Ok(notification)) => {
                if let Some(matched) = match_payload(notification.payload(), target_hostname) {
                    return Ok(matched);
                }
            }
            Ok(Err(e)) => return Err(DispatchError::Disconnected(e)),
            // Poll bound elapsed; loop again so cancellation stays prompt.
            Err(_) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_payload_for_target() {
        let raw = r#"{"HostName":"vm-1","CrdCommand":"start-host --code=4/AAA","Pin":"123456"}"#;
        let matched = match_payload(raw, "vm-1").unwrap();
        assert_eq!(matched.pin, "123456");
        assert_eq!(matched.command, "start-host --code=4/AAA");
    }

    #[test]
    fn ignores_payload_for_other_host() {
        let raw = r#"{"HostName":"vm-2","CrdCommand":"start-host --code=4/AAA","Pin":"123456"}"#;
        assert!(match_payload(raw, "vm-1").is_none());
    }

    #[test]
    fn drops_payload_with_null_fields() {
        let raw = r#"{"HostName":"vm-1","CrdCommand":null,"Pin":"123456"}"#;
        assert!(match_payload(raw, "vm-1").is_none());
    }

    #[test]
    fn drops_payload_missing_keys() {
        assert!(match_payload(r#"{"HostName":"vm-1"}"#, "vm-1").is_none());
    }

    #[test]
    fn drops_non_json_payload() {
        assert!(match_payload("not json at all", "vm-1").is_none());
    }
}
