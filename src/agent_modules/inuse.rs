//! In-use loop: the VM counts as in use while any process command line
//! contains the subject-software substring.

use reqwest::Client;
use serde_json::json;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{info, warn};

use crate::agent_modules::config::AgentConfig;
use crate::agent_modules::utils::{MAX_REPORT_ATTEMPTS, retry_delay};

/// True iff any command line contains `subject`, excluding the agent's own
/// process (its environment mentions the subject software too).
pub fn any_subject_process<'a>(
    mut command_lines: impl Iterator<Item = (u32, &'a str)>,
    subject: &str,
    own_pid: u32,
) -> bool {
    command_lines.any(|(pid, cmdline)| pid != own_pid && cmdline.contains(subject))
}

fn scan(sys: &mut System, subject: &str) -> bool {
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cmd(sysinfo::UpdateKind::Always),
    );
    let own_pid = std::process::id();
    let lines = sys.processes().iter().map(|(pid, process)| {
        (
            pid.as_u32(),
            process
                .cmd()
                .iter()
                .map(|s| s.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" "),
        )
    });
    // Collect to strings first; any_subject_process borrows them.
    let collected: Vec<(u32, String)> = lines.collect();
    any_subject_process(
        collected.iter().map(|(pid, line)| (*pid, line.as_str())),
        subject,
        own_pid,
    )
}

async fn report_in_use(client: &Client, config: &AgentConfig, in_use: bool) {
    let url = format!("{}/api/update_inuse_status", config.allocator_url);
    let body = json!({ "hostname": config.vm_name, "status": in_use });

    for attempt in 1..=MAX_REPORT_ATTEMPTS {
        match client.post(&url).json(&body).send().await {
            Ok(r) if r.status().is_success() => {
                info!(in_use, "Reported in-use status.");
                return;
            }
            Ok(r) => warn!(status = %r.status(), attempt, "In-use report rejected; retrying."),
            Err(e) => warn!(error = %e, attempt, "In-use report failed; retrying."),
        }
        if attempt < MAX_REPORT_ATTEMPTS {
            tokio::time::sleep(retry_delay()).await;
        }
    }
    warn!(in_use, "Giving up on in-use report after max attempts.");
}

pub async fn in_use_loop(config: AgentConfig, client: Client) {
    let mut sys = System::new();
    let mut last_reported: Option<bool> = None;

    loop {
        let in_use = scan(&mut sys, &config.subject_software);
        if last_reported != Some(in_use) {
            report_in_use(&client, &config, in_use).await;
            last_reported = Some(in_use);
        }
        tokio::time::sleep(config.probe_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_subject_in_command_line() {
        let procs = [
            (100u32, "/usr/bin/python /usr/local/bin/sleap-label"),
            (200u32, "bash"),
        ];
        assert!(any_subject_process(
            procs.iter().map(|(p, c)| (*p, *c)),
            "sleap",
            999
        ));
    }

    #[test]
    fn ignores_own_process() {
        let procs = [(100u32, "lablink-agent --software sleap")];
        assert!(!any_subject_process(
            procs.iter().map(|(p, c)| (*p, *c)),
            "sleap",
            100
        ));
    }

    #[test]
    fn no_match_when_subject_absent() {
        let procs = [(100u32, "bash"), (200u32, "sshd: ubuntu@pts/0")];
        assert!(!any_subject_process(
            procs.iter().map(|(p, c)| (*p, *c)),
            "sleap",
            999
        ));
    }
}
