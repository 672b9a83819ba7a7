//! Recording fakes of the cluster and scale set collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_cloud::{CloudError, CloudResult, InstanceSummary, ScaleSetApi};
use fleet_cluster::*;
use fleet_core::{HostGroupInfoResponse, HostId};
use fleet_state::{ClusterState, ClusterStateStore, RedbBackend};

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
}

pub fn now() -> DateTime<Utc> {
    at("2024-06-01T12:00:00Z")
}

pub async fn store(state: ClusterState) -> ClusterStateStore {
    let store = ClusterStateStore::new(Arc::new(RedbBackend::open_in_memory().unwrap()), "state");
    store.init_if_absent(&state).await.unwrap();
    store
}

// ── Cluster ────────────────────────────────────────────────────────

pub struct FakeCluster {
    pub status: SystemStatus,
    pub inventory: Inventory,
    /// Calls whose description starts with one of these fail.
    pub failing: Vec<String>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeCluster {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            status: SystemStatus {
                io_status: "STARTED".into(),
                upgrade: String::new(),
            },
            inventory,
            failing: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, call: &str) -> Self {
        self.failing.push(call.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Mutating calls only, in order.
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c.as_str(), "status" | "hosts" | "drives" | "nodes"))
            .collect()
    }

    fn record(&self, call: String) -> RpcResult<()> {
        let fails = self.failing.iter().any(|f| call.starts_with(f.as_str()));
        self.calls.lock().unwrap().push(call);
        if fails {
            return Err(RpcError::Remote {
                code: -32000,
                message: "injected failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn status(&self) -> RpcResult<SystemStatus> {
        self.record("status".into())?;
        Ok(self.status.clone())
    }

    async fn hosts(&self) -> RpcResult<HostList> {
        self.record("hosts".into())?;
        Ok(self.inventory.hosts.clone())
    }

    async fn drives(&self) -> RpcResult<DriveList> {
        self.record("drives".into())?;
        Ok(self.inventory.drives.clone())
    }

    async fn nodes(&self) -> RpcResult<NodeList> {
        self.record("nodes".into())?;
        Ok(self.inventory.nodes.clone())
    }

    async fn deactivate_drives(&self, uuids: &[String]) -> RpcResult<()> {
        self.record(format!("deactivate_drives {}", uuids.join(",")))
    }

    async fn deactivate_hosts(&self, host_ids: &[HostId]) -> RpcResult<()> {
        self.record(format!("deactivate_hosts {}", host_ids.join(",")))
    }

    async fn remove_drives(&self, uuids: &[String]) -> RpcResult<()> {
        self.record(format!("remove_drives {}", uuids.join(",")))
    }

    async fn remove_host(&self, host_id: &HostId) -> RpcResult<()> {
        self.record(format!("remove_host {host_id}"))
    }

    async fn forget_backend(&self, ip: &str) {
        self.calls.lock().unwrap().push(format!("forget {ip}"));
    }
}

pub struct FakeConnector(pub Arc<FakeCluster>);

impl ClusterConnector for FakeConnector {
    fn connect(&self, _info: &HostGroupInfoResponse) -> Arc<dyn ClusterApi> {
        self.0.clone()
    }
}

/// Inventory builder: one machine per IP with drive/compute/frontend containers.
#[derive(Default)]
pub struct InventoryBuilder {
    inventory: Inventory,
    next_host: i64,
    next_drive: i64,
}

impl InventoryBuilder {
    pub fn container(
        &mut self,
        ip: &str,
        name: &str,
        state: &str,
        status: &str,
        added: DateTime<Utc>,
    ) -> HostId {
        let id = format!("HostId<{}>", self.next_host);
        self.next_host += 1;
        self.inventory.hosts.insert(
            id.clone(),
            RawHost {
                host_ip: ip.into(),
                container_name: name.into(),
                state: state.into(),
                status: status.into(),
                added_time: added,
                state_changed_time: None,
            },
        );
        id
    }

    /// A healthy drive+compute machine; returns the drive container id.
    pub fn machine(&mut self, ip: &str, added: DateTime<Utc>) -> HostId {
        let drive = self.container(ip, "drives0", "ACTIVE", "UP", added);
        self.container(ip, "compute0", "ACTIVE", "UP", added);
        self.drive(&drive, "ACTIVE", true);
        drive
    }

    pub fn drive(&mut self, host_id: &str, status: &str, should_be_active: bool) -> String {
        let uuid = format!("uuid-{}", self.next_drive);
        self.inventory.drives.insert(
            format!("DiskId<{}>", self.next_drive),
            RawDrive {
                uuid: uuid.clone(),
                host_id: host_id.into(),
                status: status.into(),
                should_be_active,
            },
        );
        self.next_drive += 1;
        uuid
    }

    pub fn management_node(&mut self, host_id: &str, status: &str, fenced: Option<DateTime<Utc>>) {
        let id = format!("NodeId<{}>", self.inventory.nodes.len());
        self.inventory.nodes.insert(
            id,
            RawNode {
                host_id: host_id.into(),
                status: status.into(),
                roles: vec!["MANAGEMENT".into()],
                last_fencing_time: fenced,
            },
        );
    }

    pub fn build(self) -> Inventory {
        self.inventory
    }
}

// ── Scale set ──────────────────────────────────────────────────────

pub fn instance(id: &str, ip: Option<&str>, power: &str, created_at: Option<DateTime<Utc>>) -> InstanceSummary {
    InstanceSummary {
        instance_id: id.into(),
        name: format!("cluster-vmss_{id}"),
        computer_name: Some(format!("cluster-vm{id}")),
        private_ip: ip.map(str::to_string),
        power_state: Some(power.into()),
        health: None,
        created_at,
        protected: false,
    }
}

#[derive(Default)]
pub struct FakeCloud {
    pub instances: Vec<InstanceSummary>,
    pub capacity: Mutex<usize>,
    /// Remaining authorization failures per instance for protection calls.
    pub auth_failures: Mutex<HashMap<String, u32>>,
    pub failing_deletes: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeCloud {
    pub fn with_instances(instances: Vec<InstanceSummary>) -> Self {
        Self {
            instances,
            ..Self::default()
        }
    }

    pub fn auth_failures(self, instance_id: &str, count: u32) -> Self {
        self.auth_failures
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), count);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScaleSetApi for FakeCloud {
    async fn list_instances(&self) -> CloudResult<Vec<InstanceSummary>> {
        Ok(self.instances.clone())
    }

    async fn set_deletion_protection(&self, instance_id: &str, protect: bool) -> CloudResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("protect {instance_id} {protect}"));
        let mut failures = self.auth_failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(instance_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CloudError::AuthorizationFailed("role assignment pending".into()));
            }
        }
        Ok(())
    }

    async fn delete_instance(&self, instance_id: &str, force: bool) -> CloudResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete {instance_id} {force}"));
        if self.failing_deletes.contains(instance_id) {
            return Err(CloudError::Api {
                status: 409,
                code: "OperationNotAllowed".into(),
                message: "instance is busy".into(),
            });
        }
        Ok(())
    }

    async fn capacity(&self) -> CloudResult<usize> {
        Ok(*self.capacity.lock().unwrap())
    }

    async fn set_capacity(&self, capacity: usize) -> CloudResult<()> {
        self.calls.lock().unwrap().push(format!("set_capacity {capacity}"));
        *self.capacity.lock().unwrap() = capacity;
        Ok(())
    }
}
