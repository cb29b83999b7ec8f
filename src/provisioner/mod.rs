//! Provisioner driver: wraps the external IaC tool (terraform) via process
//! execution in a fixed working directory. Callers serialize apply/destroy
//! at the HTTP layer; this module assumes at most one in flight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::PgPool;
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::AllocatorConfig;
use crate::db::enums::VmStatus;
use crate::db::models::ApplyTiming;
use crate::db::registry::{self, TimingUpdate};

pub mod outputs;

const VAR_FILE_NAME: &str = "terraform.tfvars";
const PRIVATE_KEY_FILE: &str = "lablink_key.pem";

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid ANSI regex"));

/// Removes terminal escape sequences so captured tool output is safe to
/// store and render.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("terraform {command} failed: {stderr}")]
    Tool { command: String, stderr: String },
    #[error("failed to parse terraform output {0}")]
    Output(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Explicit capability for the cloud credential environment. Constructed
/// once in the binary from config and handed to the runner; handlers never
/// mutate the process environment.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnv {
    vars: HashMap<String, String>,
}

impl ProcessEnv {
    pub fn new(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn apply_to(&self, command: &mut Command) {
        command.envs(&self.vars);
    }
}

pub struct TerraformRunner {
    working_dir: PathBuf,
    env: ProcessEnv,
}

impl TerraformRunner {
    pub fn new(working_dir: impl Into<PathBuf>, env: ProcessEnv) -> Self {
        Self {
            working_dir: working_dir.into(),
            env,
        }
    }

    pub fn var_file_path(&self) -> PathBuf {
        self.working_dir.join(VAR_FILE_NAME)
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.working_dir.join(PRIVATE_KEY_FILE)
    }

    /// Writes the key=value variable file consumed by `-var-file`. The file
    /// is opaque to the core; it is also what gets re-uploaded to the
    /// bucket after each apply.
    pub async fn write_var_file(&self, config: &AllocatorConfig) -> Result<PathBuf, ProvisionerError> {
        let path = self.var_file_path();
        let contents = render_var_file(config);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, ProvisionerError> {
        let mut command = Command::new("terraform");
        command.args(args).current_dir(&self.working_dir);
        self.env.apply_to(&mut command);
        Ok(command.output().await?)
    }

    /// Runs a terraform subcommand, mapping a non-zero exit to a tool error
    /// with ANSI-stripped stderr (stdout fallback when stderr is empty).
    async fn run_checked(&self, args: &[&str]) -> Result<String, ProvisionerError> {
        let output = self.run(args).await?;
        let stdout = strip_ansi(&String::from_utf8_lossy(&output.stdout));
        if output.status.success() {
            return Ok(stdout);
        }
        let stderr = strip_ansi(&String::from_utf8_lossy(&output.stderr));
        let message = if stderr.trim().is_empty() { stdout } else { stderr };
        Err(ProvisionerError::Tool {
            command: args.first().unwrap_or(&"terraform").to_string(),
            stderr: message,
        })
    }

    /// `apply` with the computed variable file plus the requested instance
    /// count, then record per-instance apply timings into the registry.
    pub async fn provision(
        &self,
        pool: &PgPool,
        config: &AllocatorConfig,
        total_count: u32,
    ) -> Result<(), ProvisionerError> {
        let var_file = self.write_var_file(config).await?;
        info!(count = total_count, dir = %self.working_dir.display(), "Starting terraform apply.");

        let count_var = format!("instance_count={total_count}");
        let var_file_arg = format!("-var-file={}", var_file.display());
        self.run_checked(&[
            "apply",
            "-auto-approve",
            &var_file_arg,
            "-var",
            &count_var,
        ])
        .await?;

        let ids = self.get_ids().await?;
        info!(instance_ids = ?ids, "Instances created.");

        // Register every instance as initializing right away; each VM flips
        // itself to running when its agent calls back.
        for name in self.get_names().await? {
            registry::insert_or_update_status(pool, &name, VmStatus::Initializing).await?;
        }

        let timings = self.get_apply_times().await?;
        for (hostname, timing) in &timings {
            let update = TimingUpdate {
                terraform_apply_start: Some(timing.start_time),
                terraform_apply_end: Some(timing.end_time),
                terraform_apply_duration_seconds: Some(timing.seconds),
                ..TimingUpdate::default()
            };
            if registry::upsert_timings(pool, hostname, &update).await? == 0 {
                warn!(hostname = %hostname, "Apply timing for a hostname missing from instance names.");
            }
        }
        // The variable file is mirrored to the deployment bucket out of
        // band; the contract here is only that it exists at a fixed path.
        info!(
            bucket = %config.bucket_name,
            var_file = %var_file.display(),
            "Variable file ready for bucket re-upload."
        );
        info!(count = total_count, "Terraform apply complete.");
        Ok(())
    }

    /// `destroy` then clear the registry. A failed destroy leaves the
    /// registry untouched so rows still describe live instances.
    pub async fn destroy(&self, pool: &PgPool) -> Result<(), ProvisionerError> {
        let var_file_arg = format!("-var-file={}", self.var_file_path().display());
        info!(dir = %self.working_dir.display(), "Starting terraform destroy.");
        if let Err(e) = self.run_checked(&["destroy", "-auto-approve", &var_file_arg]).await {
            error!(error = %e, "Terraform destroy failed; registry left as-is.");
            return Err(e);
        }
        let cleared = registry::clear_all(pool).await?;
        info!(rows = cleared, "Terraform destroy complete; registry cleared.");
        Ok(())
    }

    pub async fn get_apply_times(&self) -> Result<HashMap<String, ApplyTiming>, ProvisionerError> {
        let raw = self
            .run_checked(&["output", "-json", "instance_terraform_apply_times"])
            .await?;
        outputs::parse_apply_times(&raw)
    }

    pub async fn get_ips(&self) -> Result<Vec<String>, ProvisionerError> {
        let raw = self.run_checked(&["output", "-json", "instance_ips"]).await?;
        outputs::parse_string_list("instance_ips", &raw)
    }

    pub async fn get_ids(&self) -> Result<Vec<String>, ProvisionerError> {
        let raw = self.run_checked(&["output", "-json", "instance_ids"]).await?;
        outputs::parse_string_list("instance_ids", &raw)
    }

    pub async fn get_names(&self) -> Result<Vec<String>, ProvisionerError> {
        let raw = self
            .run_checked(&["output", "-json", "instance_names"])
            .await?;
        outputs::parse_string_list("instance_names", &raw)
    }

    /// Fetches the SSH private key and writes it to a fixed path with mode
    /// 0400, as ssh requires.
    pub async fn get_private_key(&self) -> Result<PathBuf, ProvisionerError> {
        let key = self.run_checked(&["output", "-raw", "private_key"]).await?;
        let path = self.private_key_path();
        write_private_key(&path, &key).await?;
        Ok(path)
    }
}

async fn write_private_key(path: &Path, key: &str) -> Result<(), std::io::Error> {
    tokio::fs::write(path, key).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o400)).await?;
    }
    Ok(())
}

fn render_var_file(config: &AllocatorConfig) -> String {
    let mut lines = vec![
        format!("allocator_url = \"{}\"", config.cloud.allocator_url),
        format!("machine_type = \"{}\"", config.machine.machine_type),
        format!("image_name = \"{}\"", config.machine.image),
        format!("repository = \"{}\"", config.machine.repository),
        format!("ami_id = \"{}\"", config.machine.ami_id),
        format!("subject_software = \"{}\"", config.machine.software),
        format!("gpu_support = {}", config.machine.gpu_support),
        format!("cloud_init_log_group = \"{}\"", config.cloud.log_group),
        format!("region = \"{}\"", config.cloud.region),
        format!(
            "startup_script_error_policy = \"{}\"",
            match config.startup_script.on_error {
                crate::config::OnError::Continue => "continue",
                crate::config::OnError::Fail => "fail",
            }
        ),
    ];
    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_sequences() {
        let colored = "\x1b[31mError:\x1b[0m something \x1b[1;32mgreen\x1b[0m";
        assert_eq!(strip_ansi(colored), "Error: something green");
    }

    #[test]
    fn strips_cursor_and_clear_sequences() {
        let noisy = "\x1b[2Kprogress\x1b[1A done";
        let stripped = strip_ansi(noisy);
        assert!(!stripped.contains('\x1b'));
        assert_eq!(stripped, "progress done");
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(strip_ansi("no escapes here"), "no escapes here");
    }

    #[test]
    fn var_file_contains_required_keys() {
        let rendered = render_var_file(&crate::config::tests_support::sample_config());
        for key in [
            "allocator_url",
            "machine_type",
            "image_name",
            "repository",
            "ami_id",
            "subject_software",
            "gpu_support",
            "cloud_init_log_group",
            "region",
            "startup_script_error_policy",
        ] {
            assert!(rendered.contains(key), "missing key {key}");
        }
    }
}
