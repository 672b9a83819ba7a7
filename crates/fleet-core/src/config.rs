//! fleet.toml configuration parser.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a runnable configuration for local development.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerConfig,
    pub state: StateConfig,
    pub cluster: ClusterConfig,
    pub scale: ScaleConfig,
    pub protection: ProtectionConfig,
    pub provider: ProviderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// redb file holding the state blob and its lease.
    pub path: PathBuf,
    pub resource: String,
    pub lease_duration_secs: u64,
    pub lease_retry_attempts: u32,
    pub lease_retry_backoff_ms: u64,
    // Seed values, used only when the blob does not exist yet.
    pub initial_size: usize,
    pub clusterization_target: usize,
    pub desired_size: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("fleet-state.redb"),
            resource: "state".to_string(),
            lease_duration_secs: 60,
            lease_retry_attempts: 1000,
            lease_retry_backoff_ms: 1000,
            initial_size: 6,
            clusterization_target: 6,
            desired_size: 6,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub username: String,
    pub password: String,
    pub management_port: u16,
    pub rpc_timeout_secs: u64,
    pub role: String,
    pub min_cluster_size: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: String::new(),
            management_port: 14000,
            rpc_timeout_secs: 30,
            role: "backend".to_string(),
            min_cluster_size: 6,
        }
    }
}

impl std::fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("management_port", &self.management_port)
            .field("rpc_timeout_secs", &self.rpc_timeout_secs)
            .field("role", &self.role)
            .field("min_cluster_size", &self.min_cluster_size)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    pub scale_up_interval_secs: u64,
    pub scale_down_interval_secs: u64,
    pub down_backends_removal_timeout_secs: u64,
    pub unhealthy_deactivate_timeout_mins: i64,
    pub drive_settle_window_mins: i64,
    pub termination_grace_secs: i64,
    pub max_unhealthy_deactivations: usize,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            scale_up_interval_secs: 10,
            scale_down_interval_secs: 10,
            down_backends_removal_timeout_secs: crate::types::DEFAULT_DOWN_BACKENDS_REMOVAL_TIMEOUT_SECS,
            unhealthy_deactivate_timeout_mins: 120,
            drive_settle_window_mins: 5,
            termination_grace_secs: 30 * 60,
            max_unhealthy_deactivations: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    pub max_attempts: u32,
    pub sleep_interval_secs: u64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            sleep_interval_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// `host:port` of the scale set gateway.
    pub endpoint: String,
    pub scale_set: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:9090".to_string(),
            scale_set: "fleet".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl StateConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn lease_retry(&self) -> crate::RetryPolicy {
        crate::RetryPolicy::new(
            self.lease_retry_attempts,
            Duration::from_millis(self.lease_retry_backoff_ms),
        )
    }
}

impl ProtectionConfig {
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_interval_secs)
    }
}
