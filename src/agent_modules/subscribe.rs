//! Subscribe loop: long-polls the allocator until this VM is assigned,
//! then binds Chrome Remote Desktop with the delivered code and pin.

use std::process::Stdio;
use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::agent_modules::config::AgentConfig;
use crate::agent_modules::utils::retry_delay;
use crate::web::models::VmStartupResponse;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const START_HOST_BINARY: &str = "/opt/google/chrome-remote-desktop/start-host";
const REDIRECT_URL: &str = "https://remotedesktop.google.com/_/oauthredirect";

#[derive(Debug, Error)]
pub enum BindError {
    #[error("assignment command has no --code value")]
    MissingCode,
    #[error("failed to spawn start-host: {0}")]
    Spawn(std::io::Error),
    #[error("start-host exited with {0}")]
    NonZeroExit(std::process::ExitStatus),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pulls the `--code=` value out of the user-submitted CRD command.
pub fn extract_code(command: &str) -> Option<&str> {
    for token in command.split_whitespace() {
        if let Some(code) = token.strip_prefix("--code=") {
            let code = code.trim_matches(|c| c == '\'' || c == '"');
            if !code.is_empty() {
                return Some(code);
            }
        }
    }
    None
}

/// Reconstructs the start-host invocation from the code alone; the rest of
/// the submitted command is untrusted and discarded.
pub fn build_start_host_command(code: &str, vm_name: &str) -> String {
    format!(
        "DISPLAY= {START_HOST_BINARY} --code={code} --redirect-url='{REDIRECT_URL}' --name={vm_name}"
    )
}

/// start-host asks for the pin twice on stdin.
pub fn pin_stdin(pin: &str) -> String {
    format!("{pin}\n{pin}\n")
}

/// Runs the remote-desktop binder, feeding the pin on stdin.
pub async fn connect_crd(command: &str, pin: &str, vm_name: &str) -> Result<(), BindError> {
    let code = extract_code(command).ok_or(BindError::MissingCode)?;
    let shell_command = build_start_host_command(code, vm_name);
    info!(vm_name = %vm_name, "Starting remote-desktop host binding.");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&shell_command)
        .stdin(Stdio::piped())
        .spawn()
        .map_err(BindError::Spawn)?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(pin_stdin(pin).as_bytes()).await?;
    }
    let status = child.wait().await?;
    if !status.success() {
        return Err(BindError::NonZeroExit(status));
    }
    info!(vm_name = %vm_name, "Remote-desktop host bound.");
    Ok(())
}

/// Blocks on the allocator's wait endpoint until this VM is assigned.
///
/// The request deliberately has no read timeout: the allocator holds it
/// open until an assignment arrives. Transport errors and HTTP >= 400 are
/// retried forever with jittered backoff; only an explicit non-success
/// payload or a completed bind ends the loop.
pub async fn subscribe_loop(config: AgentConfig) {
    let client = match Client::builder().connect_timeout(CONNECT_TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to build HTTP client; subscribe loop cannot run.");
            return;
        }
    };
    let url = format!("{}/vm_startup", config.allocator_url);
    let body = json!({ "hostname": config.vm_name });

    loop {
        let response = match client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Allocator unreachable; will retry.");
                tokio::time::sleep(retry_delay()).await;
                continue;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "Wait endpoint returned an error; will retry.");
            tokio::time::sleep(retry_delay()).await;
            continue;
        }

        let payload: VmStartupResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Malformed wait response; will retry.");
                tokio::time::sleep(retry_delay()).await;
                continue;
            }
        };

        if payload.status != "success" {
            // Explicit rejection from the allocator; do not bind, do not retry.
            error!(
                status = %payload.status,
                message = payload.message.as_deref().unwrap_or(""),
                "Allocator rejected this VM; subscribe loop ending."
            );
            return;
        }

        match (payload.pin, payload.command) {
            (Some(pin), Some(command)) => {
                match connect_crd(&command, &pin, &config.vm_name).await {
                    Ok(()) => {
                        info!("Assignment bound; subscribe loop complete.");
                        return;
                    }
                    Err(e) => {
                        error!(error = %e, "Remote-desktop bind failed; will wait for a new assignment.");
                        tokio::time::sleep(retry_delay()).await;
                    }
                }
            }
            _ => {
                warn!("Success payload missing pin or command; will retry.");
                tokio::time::sleep(retry_delay()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_code_from_headless_command() {
        let command = "DISPLAY= /opt/google/chrome-remote-desktop/start-host \
                       --code=4/0AVHEtk5xyz --redirect-url='https://remotedesktop.google.com/_/oauthredirect' \
                       --name=$(hostname)";
        assert_eq!(extract_code(command), Some("4/0AVHEtk5xyz"));
    }

    #[test]
    fn extracts_quoted_code() {
        assert_eq!(extract_code("start-host --code='4/0ABCD'"), Some("4/0ABCD"));
    }

    #[test]
    fn missing_code_yields_none() {
        assert_eq!(extract_code("bash -c 'rm -rf /'"), None);
        assert_eq!(extract_code("start-host --code="), None);
    }

    #[test]
    fn rebuilt_command_pins_binary_and_redirect() {
        let cmd = build_start_host_command("4/0AVH", "lablink-vm-1");
        assert!(cmd.starts_with("DISPLAY= /opt/google/chrome-remote-desktop/start-host"));
        assert!(cmd.contains("--code=4/0AVH"));
        assert!(cmd.contains("--redirect-url='https://remotedesktop.google.com/_/oauthredirect'"));
        assert!(cmd.ends_with("--name=lablink-vm-1"));
    }

    #[test]
    fn pin_is_fed_twice() {
        assert_eq!(pin_stdin("123456"), "123456\n123456\n");
    }
}
