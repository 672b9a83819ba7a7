//! Protocol records shared across fleet crates.
//!
//! The scale-down pipeline is split into independently invoked stages
//! (fetch → scale_down → terminate → transient). Each stage consumes the
//! previous stage's JSON output, so every record that crosses a stage
//! boundary carries the protocol [`VERSION`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol version stamped on every pipeline record.
pub const VERSION: u32 = 1;

/// Cloud instance identifier within the scale set.
pub type InstanceId = String;

/// Host (container) identifier inside the storage cluster.
pub type HostId = String;

/// Default time a backend may stay DOWN before it is kicked out.
pub const DEFAULT_DOWN_BACKENDS_REMOVAL_TIMEOUT_SECS: u64 = 30 * 60;

/// Errors raised when a pipeline record fails protocol validation.
///
/// These are never retried: the two stages disagree about payload shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("incompatible protocol version: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("hosts list must not be empty")]
    EmptyHosts,

    #[error("{field} of {value}s is out of range")]
    DurationOutOfRange { field: &'static str, value: u64 },
}

fn check_version(actual: u32) -> Result<(), ProtocolError> {
    if actual != VERSION {
        return Err(ProtocolError::VersionMismatch {
            expected: VERSION,
            actual,
        });
    }
    Ok(())
}

// ── Host group ─────────────────────────────────────────────────────

/// A cloud instance as seen by the decision stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HgInstance {
    pub id: InstanceId,
    pub private_ip: String,
}

/// Input of the scale-down stage: the current host group.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct HostGroupInfoResponse {
    pub username: String,
    pub password: String,
    pub desired_capacity: usize,
    /// Cloud instances currently in the scale set.
    #[serde(default)]
    pub instances: Vec<HgInstance>,
    #[serde(default)]
    pub backend_ips: Vec<String>,
    pub role: String,
    pub version: u32,
    /// How long a DOWN backend is tolerated before it is kicked out.
    #[serde(default = "default_down_backends_removal_timeout")]
    pub down_backends_removal_timeout_secs: u64,
}

fn default_down_backends_removal_timeout() -> u64 {
    DEFAULT_DOWN_BACKENDS_REMOVAL_TIMEOUT_SECS
}

impl std::fmt::Debug for HostGroupInfoResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostGroupInfoResponse")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("desired_capacity", &self.desired_capacity)
            .field("instances", &self.instances)
            .field("backend_ips", &self.backend_ips)
            .field("role", &self.role)
            .field("version", &self.version)
            .finish()
    }
}

impl HostGroupInfoResponse {
    pub fn check_version(&self) -> Result<(), ProtocolError> {
        check_version(self.version)
    }

    /// The DOWN-backend removal timeout, rejected if chrono cannot hold it.
    pub fn down_backends_removal_timeout(&self) -> Result<chrono::Duration, ProtocolError> {
        let secs = self.down_backends_removal_timeout_secs;
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or(ProtocolError::DurationOutOfRange {
                field: "down_backends_removal_timeout_secs",
                value: secs,
            })
    }
}

// ── Scale response ─────────────────────────────────────────────────

/// Health grade of a host, ordered by removal priority.
///
/// `Deactivating < Unhealthy < Healthy`: sorting ascending puts the hosts
/// that should leave the cluster first at the front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleState {
    Deactivating,
    Unhealthy,
    Healthy,
}

impl std::fmt::Display for ScaleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScaleState::Deactivating => "deactivating",
            ScaleState::Unhealthy => "unhealthy",
            ScaleState::Healthy => "healthy",
        };
        f.write_str(s)
    }
}

/// One accepted member of the cluster in the decision record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleResponseHost {
    pub instance_id: InstanceId,
    pub private_ip: String,
    pub state: ScaleState,
    pub added_time: DateTime<Utc>,
    pub host_id: HostId,
}

/// Decision record produced once per scale-down cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleResponse {
    pub version: u32,
    #[serde(default)]
    pub hosts: Vec<ScaleResponseHost>,
    /// Instances the decision stage wants removed regardless of age or health.
    #[serde(default)]
    pub to_terminate: Vec<HgInstance>,
    #[serde(default)]
    pub transient_errors: Vec<String>,
}

impl Default for ScaleResponse {
    fn default() -> Self {
        Self {
            version: VERSION,
            hosts: Vec::new(),
            to_terminate: Vec::new(),
            transient_errors: Vec::new(),
        }
    }
}

impl ScaleResponse {
    /// Validate the record before the terminate stage acts on it.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        check_version(self.version)?;
        if self.hosts.is_empty() {
            return Err(ProtocolError::EmptyHosts);
        }
        Ok(())
    }
}

// ── Terminated instances ───────────────────────────────────────────

/// An instance removed by the terminate stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminatedInstance {
    pub instance_id: InstanceId,
    /// Provisioning time reported by the platform, when known.
    pub creation: Option<DateTime<Utc>>,
}

/// Result record of the terminate stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminatedInstancesResponse {
    pub version: u32,
    #[serde(default)]
    pub instances: Vec<TerminatedInstance>,
    #[serde(default)]
    pub transient_errors: Vec<String>,
}

impl Default for TerminatedInstancesResponse {
    fn default() -> Self {
        Self {
            version: VERSION,
            instances: Vec::new(),
            transient_errors: Vec::new(),
        }
    }
}

impl TerminatedInstancesResponse {
    pub fn check_version(&self) -> Result<(), ProtocolError> {
        check_version(self.version)
    }
}

// ── Reports ────────────────────────────────────────────────────────

/// Which per-host log a report is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Progress,
    Error,
    Debug,
}

/// A message reported by (or on behalf of) an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "type")]
    pub kind: ReportType,
    pub hostname: String,
    pub message: String,
}

impl Report {
    pub fn new(kind: ReportType, hostname: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            hostname: hostname.into(),
            message: message.into(),
        }
    }
}

/// Extract the scale set instance id from a VM name (`<vmss>_<index>`).
pub fn instance_id_from_vm_name(vm_name: &str) -> &str {
    vm_name.rsplit('_').next().unwrap_or(vm_name)
}
