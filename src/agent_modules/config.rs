//! VM agent configuration, read from the environment the provisioner bakes
//! into each instance.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("no allocator address: set ALLOCATOR_URL, DNS settings, or ALLOCATOR_IP")]
    NoAllocatorAddress,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// This VM's hostname; also its registry key and log stream name.
    pub vm_name: String,
    /// Base URL of the allocator, scheme included.
    pub allocator_url: String,
    /// Substring identifying the subject software in a process command line.
    pub subject_software: String,
    /// Command used to probe GPU availability.
    pub gpu_probe_command: String,
    pub probe_interval: Duration,
}

/// Raw environment inputs, separated from `std::env` so URL precedence is
/// testable.
#[derive(Debug, Clone, Default)]
pub struct AgentEnv {
    pub allocator_url: Option<String>,
    pub allocator_dns: Option<String>,
    pub allocator_ssl_provider: Option<String>,
    pub allocator_ip: Option<String>,
    pub vm_name: Option<String>,
    pub subject_software: Option<String>,
}

impl AgentEnv {
    pub fn from_process_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            allocator_url: var("ALLOCATOR_URL"),
            allocator_dns: var("ALLOCATOR_DNS"),
            allocator_ssl_provider: var("ALLOCATOR_SSL_PROVIDER"),
            allocator_ip: var("ALLOCATOR_IP"),
            vm_name: var("VM_NAME"),
            subject_software: var("SUBJECT_SOFTWARE"),
        }
    }
}

/// Precedence: explicit URL, then DNS (scheme chosen by the SSL provider),
/// then raw IP over plain http.
pub fn resolve_allocator_url(env: &AgentEnv) -> Result<String, AgentConfigError> {
    if let Some(url) = &env.allocator_url {
        return Ok(url.trim_end_matches('/').to_string());
    }
    if let Some(domain) = &env.allocator_dns {
        let scheme = match env.allocator_ssl_provider.as_deref() {
            None | Some("none") | Some("") => "http",
            _ => "https",
        };
        return Ok(format!("{scheme}://{domain}"));
    }
    if let Some(ip) = &env.allocator_ip {
        return Ok(format!("http://{ip}"));
    }
    Err(AgentConfigError::NoAllocatorAddress)
}

pub fn load_config() -> Result<AgentConfig, AgentConfigError> {
    let env = AgentEnv::from_process_env();
    let allocator_url = resolve_allocator_url(&env)?;
    let vm_name = env
        .vm_name
        .ok_or(AgentConfigError::MissingVar("VM_NAME"))?;
    let subject_software = env
        .subject_software
        .ok_or(AgentConfigError::MissingVar("SUBJECT_SOFTWARE"))?;

    Ok(AgentConfig {
        vm_name,
        allocator_url,
        subject_software,
        gpu_probe_command: "nvidia-smi".to_string(),
        probe_interval: Duration::from_secs(20),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_url_wins() {
        let env = AgentEnv {
            allocator_url: Some("https://alloc.example.org/".to_string()),
            allocator_dns: Some("other.example.org".to_string()),
            allocator_ip: Some("10.0.0.1".to_string()),
            ..AgentEnv::default()
        };
        assert_eq!(
            resolve_allocator_url(&env).unwrap(),
            "https://alloc.example.org"
        );
    }

    #[test]
    fn dns_with_ssl_uses_https() {
        let env = AgentEnv {
            allocator_dns: Some("alloc.example.org".to_string()),
            allocator_ssl_provider: Some("letsencrypt".to_string()),
            ..AgentEnv::default()
        };
        assert_eq!(
            resolve_allocator_url(&env).unwrap(),
            "https://alloc.example.org"
        );
    }

    #[test]
    fn dns_without_ssl_uses_http() {
        let env = AgentEnv {
            allocator_dns: Some("alloc.example.org".to_string()),
            allocator_ssl_provider: Some("none".to_string()),
            ..AgentEnv::default()
        };
        assert_eq!(
            resolve_allocator_url(&env).unwrap(),
            "http://alloc.example.org"
        );
    }

    #[test]
    fn falls_back_to_raw_ip() {
        let env = AgentEnv {
            allocator_ip: Some("10.0.0.1:5000".to_string()),
            ..AgentEnv::default()
        };
        assert_eq!(resolve_allocator_url(&env).unwrap(), "http://10.0.0.1:5000");
    }

    #[test]
    fn errors_with_no_address_source() {
        assert!(matches!(
            resolve_allocator_url(&AgentEnv::default()).unwrap_err(),
            AgentConfigError::NoAllocatorAddress
        ));
    }
}
