//! Host model reconstructed from an inventory snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use fleet_cluster::{DriveId, Inventory, NodeId};
use fleet_core::{HostId, ScaleState};
use serde::{Deserialize, Serialize};

/// What a container runs, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRole {
    Drive,
    Compute,
    Frontend,
}

impl ContainerRole {
    pub fn from_container_name(name: &str) -> Self {
        if name.contains("compute") {
            ContainerRole::Compute
        } else if name.contains("frontend") {
            ContainerRole::Frontend
        } else {
            ContainerRole::Drive
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drive {
    pub id: DriveId,
    pub uuid: String,
    pub host_id: HostId,
    pub status: String,
    pub should_be_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub host_id: HostId,
    pub status: String,
    pub is_management: bool,
    pub last_fencing_time: Option<DateTime<Utc>>,
}

/// One cluster container with the drives and nodes it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub id: HostId,
    pub host_ip: String,
    pub container_role: ContainerRole,
    pub raw_state: String,
    pub raw_status: String,
    pub added_time: DateTime<Utc>,
    pub state_changed_time: DateTime<Utc>,
    pub drives: BTreeMap<DriveId, Drive>,
    pub nodes: BTreeMap<NodeId, Node>,
    /// Set by [`crate::classify_hosts`]; `Healthy` until then.
    pub scale_state: ScaleState,
}

impl HostInfo {
    pub fn is_state(&self, states: &[&str]) -> bool {
        states.contains(&self.raw_state.as_str())
    }

    pub fn is_status(&self, statuses: &[&str]) -> bool {
        statuses.contains(&self.raw_status.as_str())
    }

    /// Has drives, and every one of them is targeted for removal.
    pub fn all_drives_being_removed(&self) -> bool {
        !self.drives.is_empty() && self.drives.values().all(|d| !d.should_be_active)
    }

    pub fn any_drive_being_removed(&self) -> bool {
        self.drives.values().any(|d| !d.should_be_active)
    }

    /// Drives stuck INACTIVE after the host had `settle` time to bring them up.
    pub fn unhealthy_drive_count(&self, now: DateTime<Utc>, settle: Duration) -> usize {
        if now - self.added_time <= settle {
            return 0;
        }
        self.drives.values().filter(|d| d.status == "INACTIVE").count()
    }

    /// A management node on this host has been DOWN for longer than `timeout`.
    pub fn management_down_longer_than(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.nodes.values().any(|node| {
            if !node.is_management || node.status != "DOWN" {
                return false;
            }
            let since = node.last_fencing_time.unwrap_or(self.state_changed_time);
            now - since > timeout
        })
    }
}

/// Assemble hosts from a snapshot, attaching drives and nodes by host id.
///
/// Drives and nodes whose host is not in the snapshot are ignored.
pub fn build_hosts(inventory: &Inventory) -> Vec<HostInfo> {
    let mut hosts: BTreeMap<HostId, HostInfo> = inventory
        .hosts
        .iter()
        .map(|(id, raw)| {
            let host = HostInfo {
                id: id.clone(),
                host_ip: raw.host_ip.clone(),
                container_role: ContainerRole::from_container_name(&raw.container_name),
                raw_state: raw.state.clone(),
                raw_status: raw.status.clone(),
                added_time: raw.added_time,
                state_changed_time: raw.state_changed_time.unwrap_or(raw.added_time),
                drives: BTreeMap::new(),
                nodes: BTreeMap::new(),
                scale_state: ScaleState::Healthy,
            };
            (id.clone(), host)
        })
        .collect();

    for (id, raw) in &inventory.drives {
        if let Some(host) = hosts.get_mut(&raw.host_id) {
            host.drives.insert(
                id.clone(),
                Drive {
                    id: id.clone(),
                    uuid: raw.uuid.clone(),
                    host_id: raw.host_id.clone(),
                    status: raw.status.clone(),
                    should_be_active: raw.should_be_active,
                },
            );
        }
    }

    for (id, raw) in &inventory.nodes {
        if let Some(host) = hosts.get_mut(&raw.host_id) {
            host.nodes.insert(
                id.clone(),
                Node {
                    id: id.clone(),
                    host_id: raw.host_id.clone(),
                    status: raw.status.clone(),
                    is_management: raw.is_management(),
                    last_fencing_time: raw.last_fencing_time,
                },
            );
        }
    }

    hosts.into_values().collect()
}
