//! Artifact collector: before teardown, pulls user-produced files with the
//! configured extension out of each VM's workload container and bundles
//! them into one downloadable archive.
//!
//! Everything runs through external tools (ssh, docker, rsync, zip), the
//! same process-execution idiom as the provisioner driver. Failures are
//! best-effort per VM: a dead or empty VM is logged and skipped.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::Utc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("no artifacts found on any VM")]
    NoArtifacts,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to create archive: {0}")]
    Archive(String),
}

pub struct ArtifactCollector {
    key_path: PathBuf,
    remote_user: String,
    extension: String,
    excluded_subpaths: [String; 2],
    staging_subdir: String,
    scratch_dir: PathBuf,
}

impl ArtifactCollector {
    pub fn new(key_path: PathBuf, extension: &str, scratch_dir: PathBuf) -> Self {
        Self {
            key_path,
            remote_user: "ubuntu".to_string(),
            extension: extension.trim_start_matches('.').to_string(),
            excluded_subpaths: ["*/proc/*".to_string(), "*/models/*".to_string()],
            staging_subdir: "lablink-artifacts".to_string(),
            scratch_dir,
        }
    }

    fn ssh_base_args(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.key_path.display().to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
        ]
    }

    async fn ssh(&self, ip: &str, remote_command: &str) -> Result<String, std::io::Error> {
        let mut command = Command::new("ssh");
        command
            .args(self.ssh_base_args())
            .arg(format!("{}@{}", self.remote_user, ip))
            .arg(remote_command)
            .stdin(Stdio::null());
        let output = command.output().await?;
        if !output.status.success() {
            return Err(std::io::Error::other(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Command that lists matching files inside the container, excluding
    /// the configured subpaths.
    fn find_command(&self, container_id: &str) -> String {
        format!(
            "docker exec {container_id} find / -name '*.{ext}' -not -path '{ex0}' -not -path '{ex1}' 2>/dev/null",
            ext = self.extension,
            ex0 = self.excluded_subpaths[0],
            ex1 = self.excluded_subpaths[1],
        )
    }

    fn staging_root(&self) -> String {
        format!("/home/{}/{}", self.remote_user, self.staging_subdir)
    }

    /// Harvests one VM: locate, `docker cp` into a mirrored staging tree,
    /// rsync staged files into a per-VM local directory. Returns whether
    /// anything was pulled.
    async fn collect_from_vm(&self, ip: &str) -> Result<bool, std::io::Error> {
        let container_id = self
            .ssh(ip, "docker ps -q | head -n 1")
            .await?
            .trim()
            .to_string();
        if container_id.is_empty() {
            warn!(ip = %ip, "No running container; skipping VM.");
            return Ok(false);
        }

        let listing = self.ssh(ip, &self.find_command(&container_id)).await?;
        let files: Vec<&str> = listing.lines().filter(|l| !l.trim().is_empty()).collect();
        if files.is_empty() {
            info!(ip = %ip, "No artifact files in container.");
            return Ok(false);
        }

        let staging = self.staging_root();
        for file in &files {
            let staged = format!("{staging}{file}");
            let staged_parent = Path::new(&staged)
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| staging.clone());
            let copy = format!(
                "mkdir -p '{staged_parent}' && docker cp '{container_id}:{file}' '{staged}'"
            );
            if let Err(e) = self.ssh(ip, &copy).await {
                warn!(ip = %ip, file = %file, error = %e, "Failed to stage artifact; skipping file.");
            }
        }

        // Probe: anything actually staged?
        let probe = format!(
            "find '{staging}' -name '*.{}' 2>/dev/null | head -n 1",
            self.extension
        );
        if self.ssh(ip, &probe).await?.trim().is_empty() {
            return Ok(false);
        }

        let local_dir = self.scratch_dir.join(ip);
        tokio::fs::create_dir_all(&local_dir).await?;

        let ssh_transport = format!("ssh {}", self.ssh_base_args().join(" "));
        let output = Command::new("rsync")
            .arg("-a")
            .arg("--include=*/")
            .arg(format!("--include=*.{}", self.extension))
            .arg("--exclude=*")
            .arg("-e")
            .arg(ssh_transport)
            .arg(format!("{}@{}:{}/", self.remote_user, ip, staging))
            .arg(&local_dir)
            .output()
            .await?;
        if !output.status.success() {
            return Err(std::io::Error::other(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(true)
    }

    /// Walks every VM IP, then archives all per-VM directories into a
    /// single timestamped zip and returns its path. The caller streams the
    /// file and deletes the scratch tree afterwards.
    pub async fn collect(&self, ips: &[String]) -> Result<PathBuf, ArtifactError> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;

        let mut harvested = Vec::new();
        for ip in ips {
            match self.collect_from_vm(ip).await {
                Ok(true) => harvested.push(ip.clone()),
                Ok(false) => {}
                Err(e) => warn!(ip = %ip, error = %e, "Artifact collection failed for VM; skipping."),
            }
        }
        if harvested.is_empty() {
            return Err(ArtifactError::NoArtifacts);
        }

        let archive_name = archive_name(Utc::now());
        let archive_path = self.scratch_dir.join(&archive_name);
        let output = Command::new("zip")
            .arg("-r")
            .arg(&archive_name)
            .args(&harvested)
            .current_dir(&self.scratch_dir)
            .output()
            .await?;
        if !output.status.success() {
            return Err(ArtifactError::Archive(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        info!(archive = %archive_path.display(), vms = harvested.len(), "Artifact archive created.");
        Ok(archive_path)
    }

    /// Removes the scratch tree, archive included. Called after the
    /// download response has been produced.
    pub async fn cleanup(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.scratch_dir).await {
            warn!(error = %e, "Failed to remove artifact scratch directory.");
        }
    }
}

fn archive_name(now: chrono::DateTime<Utc>) -> String {
    format!("lablink_data{}.zip", now.format("%Y%m%d%H%M%S"))
}

/// A fresh scratch directory for one collection run, so concurrent
/// downloads never share or clobber each other's staging trees.
pub fn unique_scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("lablink-artifacts-{:08x}", rand::random::<u32>()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn collector() -> ArtifactCollector {
        ArtifactCollector::new(PathBuf::from("/tmp/key.pem"), ".slp", PathBuf::from("/tmp/scratch"))
    }

    #[test]
    fn archive_name_is_timestamped() {
        let t = Utc.with_ymd_and_hms(2026, 8, 30, 17, 30, 5).unwrap();
        assert_eq!(archive_name(t), "lablink_data20260830173005.zip");
    }

    #[test]
    fn extension_dot_is_normalized() {
        let c = collector();
        assert_eq!(c.extension, "slp");
    }

    #[test]
    fn find_command_excludes_configured_subpaths() {
        let c = collector();
        let cmd = c.find_command("abc123");
        assert!(cmd.contains("docker exec abc123 find /"));
        assert!(cmd.contains("-name '*.slp'"));
        assert!(cmd.contains("-not -path '*/proc/*'"));
        assert!(cmd.contains("-not -path '*/models/*'"));
    }

    #[test]
    fn scratch_dirs_are_unique_per_run() {
        let a = unique_scratch_dir();
        let b = unique_scratch_dir();
        assert_ne!(a, b);
        assert!(a.starts_with(std::env::temp_dir()));
    }

    #[test]
    fn ssh_args_disable_strict_host_key_checking() {
        let args = collector().ssh_base_args();
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(args.contains(&"-i".to_string()));
    }
}
