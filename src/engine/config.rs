use crate::error::{MfwError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Permit,
    Deny,
}

/// What the matcher does with a packet. Rules carry no action of their own,
/// so both outcomes come from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionPolicy {
    #[serde(default = "default_on_match")]
    pub on_match: Disposition,
    #[serde(default = "default_on_miss")]
    pub on_miss: Disposition,
}

impl Default for DispositionPolicy {
    fn default() -> Self {
        DispositionPolicy {
            on_match: default_on_match(),
            on_miss: default_on_miss(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default)]
    pub max_rules: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub policy: DispositionPolicy,
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_on_match() -> Disposition {
    Disposition::Deny
}

fn default_on_miss() -> Disposition {
    Disposition::Permit
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_log_level() -> String {
    "info".to_string()
}

pub const DEFAULT_SOCKET_PATH: &str = "/run/mfw.sock";

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            socket_path: default_socket_path(),
            max_rules: 0,
            log_level: default_log_level(),
            request_timeout_ms: default_request_timeout_ms(),
            policy: DispositionPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MfwError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: EngineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        log::info!("Engine config loaded: {}", path.display());
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(MfwError::Config("Socket path cannot be empty".to_string()));
        }

        if self.request_timeout_ms == 0 {
            return Err(MfwError::Config(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if log_level_filter(&self.log_level).is_none() {
            return Err(MfwError::Config(format!(
                "Unknown log level '{}'",
                self.log_level
            )));
        }

        Ok(())
    }
}

pub fn log_level_filter(level: &str) -> Option<log::LevelFilter> {
    level.parse().ok()
}
