//! GPU health loop: probes the driver every interval and reports state
//! transitions to the allocator.

use std::io::ErrorKind;

use reqwest::Client;
use serde_json::json;
use tokio::process::Command;
use tracing::{info, warn};

use crate::agent_modules::config::AgentConfig;
use crate::agent_modules::utils::{MAX_REPORT_ATTEMPTS, retry_delay};
use crate::db::enums::GpuHealth;

/// Classifies one probe run. ENOENT and exit code 127 both mean the probe
/// binary does not exist on this machine: no GPU driver, terminal state.
pub fn classify_probe(result: &Result<std::process::Output, std::io::Error>) -> GpuHealth {
    match result {
        Ok(output) => match output.status.code() {
            Some(0) => GpuHealth::Healthy,
            Some(127) => GpuHealth::NotApplicable,
            _ => GpuHealth::Unhealthy,
        },
        Err(e) if e.kind() == ErrorKind::NotFound => GpuHealth::NotApplicable,
        Err(_) => GpuHealth::Unhealthy,
    }
}

/// Posts one health report, retrying with jittered backoff. After the
/// attempt cap the state is treated as reported anyway so a flapping
/// allocator does not cause a report storm.
pub async fn report_health(client: &Client, config: &AgentConfig, health: GpuHealth) {
    let url = format!("{}/api/gpu_health", config.allocator_url);
    let body = json!({ "hostname": config.vm_name, "gpu_status": health.as_str() });

    for attempt in 1..=MAX_REPORT_ATTEMPTS {
        match client.post(&url).json(&body).send().await {
            Ok(r) if r.status().is_success() => {
                info!(gpu_status = %health, "Reported GPU health.");
                return;
            }
            Ok(r) => {
                warn!(status = %r.status(), attempt, "GPU health report rejected; retrying.")
            }
            Err(e) => warn!(error = %e, attempt, "GPU health report failed; retrying."),
        }
        if attempt < MAX_REPORT_ATTEMPTS {
            tokio::time::sleep(retry_delay()).await;
        }
    }
    warn!(gpu_status = %health, "Giving up on GPU health report after max attempts.");
}

pub async fn health_loop(config: AgentConfig, client: Client) {
    let mut last_reported: Option<GpuHealth> = None;

    loop {
        let probe = Command::new(&config.gpu_probe_command).output().await;
        let current = classify_probe(&probe);

        if last_reported != Some(current) {
            report_health(&client, &config, current).await;
            last_reported = Some(current);
        }

        if current == GpuHealth::NotApplicable {
            // No driver on this machine; further probing is pointless.
            info!("GPU not applicable; health loop terminating.");
            return;
        }

        tokio::time::sleep(config.probe_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Output};

    fn output_with_code(code: i32) -> Result<Output, std::io::Error> {
        Ok(Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }

    #[test]
    fn zero_exit_is_healthy() {
        assert_eq!(classify_probe(&output_with_code(0)), GpuHealth::Healthy);
    }

    #[test]
    fn nonzero_exit_is_unhealthy() {
        assert_eq!(classify_probe(&output_with_code(1)), GpuHealth::Unhealthy);
    }

    #[test]
    fn exit_127_is_not_applicable() {
        assert_eq!(
            classify_probe(&output_with_code(127)),
            GpuHealth::NotApplicable
        );
    }

    #[test]
    fn enoent_is_not_applicable() {
        let err: Result<Output, std::io::Error> =
            Err(std::io::Error::from(ErrorKind::NotFound));
        assert_eq!(classify_probe(&err), GpuHealth::NotApplicable);
    }

    #[test]
    fn other_io_error_is_unhealthy() {
        let err: Result<Output, std::io::Error> =
            Err(std::io::Error::from(ErrorKind::PermissionDenied));
        assert_eq!(classify_probe(&err), GpuHealth::Unhealthy);
    }
}
