//! Raw inventory records as returned by the management API.
//!
//! List calls return JSON objects keyed by id (`"HostId<3>"`,
//! `"DiskId<12>"`, `"NodeId<300>"`); they are kept in `BTreeMap`s so that
//! iteration order is stable across runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fleet_core::HostId;
use serde::{Deserialize, Serialize};

pub type DriveId = String;
pub type NodeId = String;

pub type HostList = BTreeMap<HostId, RawHost>;
pub type DriveList = BTreeMap<DriveId, RawDrive>;
pub type NodeList = BTreeMap<NodeId, RawNode>;

/// Numeric part of an id such as `HostId<7>` (or a bare `7`).
pub fn id_number(id: &str) -> Option<i64> {
    let inner = match (id.find('<'), id.rfind('>')) {
        (Some(start), Some(end)) if start < end => &id[start + 1..end],
        _ => id,
    };
    inner.trim().parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub io_status: String,
    /// Non-empty while an upgrade is running.
    #[serde(default)]
    pub upgrade: String,
}

impl SystemStatus {
    /// Why the cluster must not be scaled right now, if anything.
    pub fn scale_blocker(&self) -> Option<String> {
        if self.io_status != "STARTED" {
            return Some(format!("io status:{}, aborting scale", self.io_status));
        }
        if !self.upgrade.is_empty() {
            return Some("upgrade is running, aborting scale".to_string());
        }
        None
    }
}

/// One container (drive, compute or frontend process group) on a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHost {
    pub host_ip: String,
    #[serde(default)]
    pub container_name: String,
    /// Lifecycle: ACTIVE, DEACTIVATING, REMOVING, INACTIVE.
    pub state: String,
    /// Reachability: UP, DOWN, DEGRADED.
    pub status: String,
    pub added_time: DateTime<Utc>,
    #[serde(default)]
    pub state_changed_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDrive {
    pub uuid: String,
    pub host_id: HostId,
    pub status: String,
    pub should_be_active: bool,
}

impl RawDrive {
    /// Left behind by an earlier host removal.
    pub fn is_orphaned(&self) -> bool {
        id_number(&self.host_id).is_none_or(|n| n < 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNode {
    pub host_id: HostId,
    pub status: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub last_fencing_time: Option<DateTime<Utc>>,
}

impl RawNode {
    pub fn is_management(&self) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case("MANAGEMENT"))
    }
}

/// Hosts, drives and nodes fetched together for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub hosts: HostList,
    pub drives: DriveList,
    pub nodes: NodeList,
}
