//! The per-VM agent: registration, subscribe, GPU health and in-use loops.

use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

pub mod config;
pub mod gpu_health;
pub mod inuse;
pub mod subscribe;
pub mod utils;

use config::AgentConfig;

const REPORT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REPORT_READ_TIMEOUT: Duration = Duration::from_secs(20);

/// Client for the short report calls (health, in-use, status). The
/// subscribe loop builds its own client without a read timeout.
pub fn report_client() -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(REPORT_CONNECT_TIMEOUT)
        .timeout(REPORT_READ_TIMEOUT)
        .build()
}

/// Registers this VM with the allocator by posting `status = running`.
/// Creates the registry row on first boot; retried until acknowledged
/// because the VM may come up before the allocator does.
pub async fn register_vm(client: &Client, config: &AgentConfig) {
    let url = format!("{}/api/vm-status", config.allocator_url);
    let body = json!({ "hostname": config.vm_name, "status": "running" });

    loop {
        match client.post(&url).json(&body).send().await {
            Ok(r) if r.status().is_success() => {
                info!(hostname = %config.vm_name, "VM registered with allocator.");
                return;
            }
            Ok(r) => warn!(status = %r.status(), "VM registration rejected; retrying."),
            Err(e) => warn!(error = %e, "Allocator unreachable during registration; retrying."),
        }
        tokio::time::sleep(utils::retry_delay()).await;
    }
}
