//! Allocator configuration: a closed TOML record loaded once at startup.
//!
//! Cross-field rules (DNS/SSL/EIP coupling) are enforced here so a bad
//! deployment fails at boot instead of at the first provision.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllocatorConfig {
    pub database: DatabaseConfig,
    pub app: AppConfig,
    pub machine: MachineConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub eip: EipConfig,
    #[serde(default)]
    pub ssl: SslConfig,
    #[serde(default)]
    pub startup_script: StartupScriptConfig,
    pub cloud: CloudConfig,
    pub bucket_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    // Long-poll dispatchers hold a dedicated LISTEN connection each, so the
    // pool must be sized well above the handler concurrency baseline.
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub admin_user: String,
    pub admin_password: String,
    #[serde(default = "default_pin")]
    pub pin: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_pin() -> String {
    // Single-class pin for the whole pool; kept from the original design.
    "123456".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:5000".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    pub machine_type: String,
    pub image: String,
    pub ami_id: String,
    pub repository: String,
    pub software: String,
    pub extension: String,
    #[serde(default)]
    pub gpu_support: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DnsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub terraform_managed: bool,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub zone_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EipStrategy {
    Persistent,
    #[default]
    Dynamic,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EipConfig {
    #[serde(default)]
    pub strategy: EipStrategy,
    #[serde(default)]
    pub tag_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SslProvider {
    #[default]
    None,
    Letsencrypt,
    Cloudflare,
    Acm,
}

impl fmt::Display for SslProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SslProvider::None => "none",
            SslProvider::Letsencrypt => "letsencrypt",
            SslProvider::Cloudflare => "cloudflare",
            SslProvider::Acm => "acm",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SslConfig {
    #[serde(default)]
    pub provider: SslProvider,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub certificate_arn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Continue,
    Fail,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StartupScriptConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub on_error: OnError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    pub region: String,
    pub log_group: String,
    pub allocator_url: String,
    #[serde(default = "default_terraform_dir")]
    pub terraform_dir: String,
    /// Credential environment handed to the IaC tool and the artifact
    /// collector; never written into the allocator's own process env.
    #[serde(default)]
    pub credential_env: HashMap<String, String>,
}

fn default_terraform_dir() -> String {
    "terraform".to_string()
}

impl AllocatorConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(Path::new(path)).map_err(|e| ConfigError::Read {
            path: path.to_string(),
            source: e,
        })?;
        let config: AllocatorConfig = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dns.enabled && self.dns.domain.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "dns.enabled requires a non-empty dns.domain".to_string(),
            ));
        }
        if self.ssl.provider != SslProvider::None && !self.dns.enabled {
            return Err(ConfigError::Invalid(format!(
                "ssl.provider = {} requires dns.enabled = true",
                self.ssl.provider
            )));
        }
        if self.ssl.provider == SslProvider::Letsencrypt && self.ssl.email.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ssl.provider = letsencrypt requires ssl.email".to_string(),
            ));
        }
        if self.ssl.provider == SslProvider::Acm && self.ssl.certificate_arn.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ssl.provider = acm requires ssl.certificate_arn".to_string(),
            ));
        }
        if self.ssl.provider == SslProvider::Cloudflare && self.dns.terraform_managed {
            return Err(ConfigError::Invalid(
                "ssl.provider = cloudflare requires dns.terraform_managed = false".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod tests_support {
    use super::*;

    /// A minimal valid config shared by unit tests across modules.
    pub fn sample_config() -> AllocatorConfig {
        AllocatorConfig {
            database: DatabaseConfig {
                url: "postgres://localhost/lablink".to_string(),
                max_connections: default_max_connections(),
            },
            app: AppConfig {
                admin_user: "admin".to_string(),
                admin_password: "secret".to_string(),
                pin: default_pin(),
                listen_addr: default_listen_addr(),
            },
            machine: MachineConfig {
                machine_type: "g4dn.xlarge".to_string(),
                image: "ghcr.io/example/client:latest".to_string(),
                ami_id: "ami-0123456789abcdef0".to_string(),
                repository: "https://github.com/example/data.git".to_string(),
                software: "sleap".to_string(),
                extension: "slp".to_string(),
                gpu_support: true,
            },
            dns: DnsConfig::default(),
            eip: EipConfig::default(),
            ssl: SslConfig::default(),
            startup_script: StartupScriptConfig::default(),
            cloud: CloudConfig {
                region: "us-west-2".to_string(),
                log_group: "lablink".to_string(),
                allocator_url: "http://10.0.0.1:5000".to_string(),
                terraform_dir: default_terraform_dir(),
                credential_env: HashMap::new(),
            },
            bucket_name: "lablink-bucket".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::sample_config;
    use super::*;

    #[test]
    fn valid_defaults_pass() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn loads_minimal_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allocator_config.toml");
        std::fs::write(
            &path,
            r#"
            bucket_name = "lablink-bucket"

            [database]
            url = "postgres://localhost/lablink"

            [app]
            admin_user = "admin"
            admin_password = "secret"

            [machine]
            machine_type = "g4dn.xlarge"
            image = "ghcr.io/example/client:latest"
            ami_id = "ami-0123456789abcdef0"
            repository = "https://github.com/example/data.git"
            software = "sleap"
            extension = "slp"

            [cloud]
            region = "us-west-2"
            log_group = "lablink"
            allocator_url = "http://10.0.0.1:5000"
            "#,
        )
        .unwrap();

        let cfg = AllocatorConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.app.pin, "123456");
        assert_eq!(cfg.app.listen_addr, "0.0.0.0:5000");
        assert_eq!(cfg.cloud.terraform_dir, "terraform");
        assert!(!cfg.machine.gpu_support);
        assert_eq!(cfg.ssl.provider, SslProvider::None);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = AllocatorConfig::load("/nonexistent/allocator_config.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn dns_enabled_requires_domain() {
        let mut cfg = sample_config();
        cfg.dns.enabled = true;
        assert!(cfg.validate().is_err());
        cfg.dns.domain = "lab.example.org".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn ssl_requires_dns() {
        let mut cfg = sample_config();
        cfg.ssl.provider = SslProvider::Letsencrypt;
        cfg.ssl.email = "admin@example.org".to_string();
        assert!(cfg.validate().is_err());
        cfg.dns.enabled = true;
        cfg.dns.domain = "lab.example.org".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn letsencrypt_requires_email() {
        let mut cfg = sample_config();
        cfg.dns.enabled = true;
        cfg.dns.domain = "lab.example.org".to_string();
        cfg.ssl.provider = SslProvider::Letsencrypt;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn acm_requires_certificate_arn() {
        let mut cfg = sample_config();
        cfg.dns.enabled = true;
        cfg.dns.domain = "lab.example.org".to_string();
        cfg.ssl.provider = SslProvider::Acm;
        assert!(cfg.validate().is_err());
        cfg.ssl.certificate_arn = "arn:aws:acm:us-west-2:123:certificate/abc".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn cloudflare_rejects_terraform_managed_dns() {
        let mut cfg = sample_config();
        cfg.dns.enabled = true;
        cfg.dns.domain = "lab.example.org".to_string();
        cfg.dns.terraform_managed = true;
        cfg.ssl.provider = SslProvider::Cloudflare;
        assert!(cfg.validate().is_err());
        cfg.dns.terraform_managed = false;
        assert!(cfg.validate().is_ok());
    }
}
