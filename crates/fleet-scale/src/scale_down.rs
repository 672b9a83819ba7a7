//! Scale-down orchestrator.
//!
//! One cycle, given the current host group:
//!
//! ```text
//! status ──▶ abort unless I/O started and no upgrade
//! hosts / drives / nodes ──▶ HostInfo ──▶ classify
//! group containers by IP into machines, then partition:
//!   inactive   (every container INACTIVE)   → remove_host, terminate instance
//!   membership (IP belongs to the group)    → graded removal
//!   kicked out (DOWN past removal timeout)  → deactivate
//! orphaned INACTIVE drives                  → remove_drives
//! order membership, deactivate the first `target`
//! ```
//!
//! RPC failures on individual machines are recorded as transient errors
//! and the cycle continues.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use fleet_cluster::{ClusterApi, DriveList, Inventory};
use fleet_core::config::ScaleConfig;
use fleet_core::{HgInstance, HostGroupInfoResponse, HostId, ScaleResponse, ScaleResponseHost, ScaleState};
use fleet_health::{ContainerRole, HostInfo, Thresholds, build_hosts, classify_hosts};
use tracing::{debug, info};

use crate::error::{ScaleError, ScaleResult};
use crate::target::calculate_deactivate_target_with;
use crate::transient::TransientErrors;

const BACKEND_ROLE: &str = "backend";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleDownSettings {
    pub thresholds: Thresholds,
    pub max_unhealthy_deactivations: usize,
}

impl Default for ScaleDownSettings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            max_unhealthy_deactivations: crate::target::MAX_UNHEALTHY_DEACTIVATIONS,
        }
    }
}

impl From<&ScaleConfig> for ScaleDownSettings {
    fn from(config: &ScaleConfig) -> Self {
        Self {
            thresholds: Thresholds::new(
                config.unhealthy_deactivate_timeout_mins,
                config.drive_settle_window_mins,
            ),
            max_unhealthy_deactivations: config.max_unhealthy_deactivations,
        }
    }
}

// ── Machines ───────────────────────────────────────────────────────

/// All containers sharing one backend IP, graded as a unit.
#[derive(Debug, Clone)]
struct Machine {
    ip: String,
    containers: Vec<HostInfo>,
    /// Most severe state of any container.
    state: ScaleState,
    added_time: DateTime<Utc>,
    unhealthy_drives: usize,
}

impl Machine {
    fn new(ip: String, containers: Vec<HostInfo>, now: DateTime<Utc>, settle: Duration) -> Self {
        let state = containers
            .iter()
            .map(|c| c.scale_state)
            .min()
            .unwrap_or(ScaleState::Healthy);
        let added_time = containers
            .iter()
            .map(|c| c.added_time)
            .min()
            .unwrap_or(now);
        let unhealthy_drives = containers
            .iter()
            .map(|c| c.unhealthy_drive_count(now, settle))
            .sum();
        Self {
            ip,
            containers,
            state,
            added_time,
            unhealthy_drives,
        }
    }

    fn all_inactive(&self) -> bool {
        self.containers.iter().all(|c| c.raw_state == "INACTIVE")
    }

    fn all_deactivating(&self) -> bool {
        self.containers
            .iter()
            .all(|c| c.scale_state == ScaleState::Deactivating)
    }

    /// A container has been DOWN, without being deactivated, past `timeout`.
    fn kicked_out(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.containers.iter().any(|c| {
            c.raw_status == "DOWN"
                && c.raw_state != "INACTIVE"
                && c.management_down_longer_than(now, timeout)
        })
    }

    fn host_ids(&self) -> Vec<HostId> {
        self.containers.iter().map(|c| c.id.clone()).collect()
    }

    /// The drive container when there is one.
    fn primary_host_id(&self) -> HostId {
        self.containers
            .iter()
            .find(|c| c.container_role == ContainerRole::Drive)
            .or_else(|| self.containers.first())
            .map(|c| c.id.clone())
            .unwrap_or_default()
    }

    fn drive_uuids(&self, only_active: bool) -> Vec<String> {
        self.containers
            .iter()
            .flat_map(|c| c.drives.values())
            .filter(|d| !only_active || d.should_be_active)
            .map(|d| d.uuid.clone())
            .collect()
    }
}

fn group_by_ip(hosts: Vec<HostInfo>, now: DateTime<Utc>, settle: Duration) -> Vec<Machine> {
    let mut by_ip: BTreeMap<String, Vec<HostInfo>> = BTreeMap::new();
    for host in hosts {
        by_ip.entry(host.host_ip.clone()).or_default().push(host);
    }
    by_ip
        .into_iter()
        .map(|(ip, containers)| Machine::new(ip, containers, now, settle))
        .collect()
}

/// Removal priority: most severe state, then most unhealthy drives, then oldest.
fn order_for_removal(machines: &mut [Machine]) {
    machines.sort_by(|a, b| {
        a.state
            .cmp(&b.state)
            .then(b.unhealthy_drives.cmp(&a.unhealthy_drives))
            .then(a.added_time.cmp(&b.added_time))
            .then(a.ip.cmp(&b.ip))
    });
}

#[derive(Debug, Default)]
struct Partition {
    membership: Vec<Machine>,
    inactive: Vec<Machine>,
    kicked_out: Vec<Machine>,
}

fn partition(
    machines: Vec<Machine>,
    instances: &HashMap<&str, &HgInstance>,
    role: &str,
    now: DateTime<Utc>,
    kick_out_timeout: Duration,
) -> Partition {
    let mut out = Partition::default();
    for machine in machines {
        let in_group = instances.contains_key(machine.ip.as_str());
        if machine.all_inactive() {
            if in_group || role == BACKEND_ROLE {
                if !in_group {
                    info!(ip = %machine.ip, "inactive machine outside the host group, removing from cluster");
                }
                out.inactive.push(machine);
            }
            continue;
        }
        if in_group {
            out.membership.push(machine);
            continue;
        }
        if role == BACKEND_ROLE && machine.kicked_out(now, kick_out_timeout) {
            info!(ip = %machine.ip, "machine down for too long, kicking out");
            out.kicked_out.push(machine);
        }
    }
    out
}

// ── Cycle ──────────────────────────────────────────────────────────

async fn fetch_inventory(cluster: &dyn ClusterApi, role: &str) -> ScaleResult<Inventory> {
    let hosts = cluster.hosts().await?;
    let drives = if role == BACKEND_ROLE {
        cluster.drives().await?
    } else {
        DriveList::new()
    };
    let nodes = cluster.nodes().await?;
    Ok(Inventory { hosts, drives, nodes })
}

/// Run one scale-down decision cycle against the cluster.
pub async fn scale_down(
    cluster: &dyn ClusterApi,
    info: &HostGroupInfoResponse,
    settings: &ScaleDownSettings,
    now: DateTime<Utc>,
) -> ScaleResult<ScaleResponse> {
    info.check_version()?;
    let kick_out_timeout = info.down_backends_removal_timeout()?;

    let status = cluster.status().await?;
    if let Some(reason) = status.scale_blocker() {
        return Err(ScaleError::NotAllowed(reason));
    }

    let inventory = fetch_inventory(cluster, &info.role).await?;
    let mut hosts = build_hosts(&inventory);
    classify_hosts(&mut hosts, now, &settings.thresholds);

    let instances: HashMap<&str, &HgInstance> = info
        .instances
        .iter()
        .map(|i| (i.private_ip.as_str(), i))
        .collect();
    let machines = group_by_ip(hosts, now, settings.thresholds.drive_settle_window);
    let Partition {
        mut membership,
        inactive,
        kicked_out,
    } = partition(machines, &instances, &info.role, now, kick_out_timeout);

    let mut errors = TransientErrors::new();
    let mut to_terminate = Vec::new();

    for machine in &inactive {
        let instance = instances.get(machine.ip.as_str()).copied();
        if remove_inactive(cluster, machine, &mut errors).await {
            if let Some(instance) = instance {
                to_terminate.push(instance.clone());
            }
        }
    }
    remove_old_drives(cluster, &inventory.drives, &mut errors).await;

    order_for_removal(&mut membership);
    let count = |state| membership.iter().filter(|m| m.state == state).count();
    let target = calculate_deactivate_target_with(
        count(ScaleState::Healthy),
        count(ScaleState::Unhealthy),
        count(ScaleState::Deactivating),
        info.desired_capacity,
        settings.max_unhealthy_deactivations,
    )
    .min(membership.len());
    info!(
        members = membership.len(),
        desired = info.desired_capacity,
        target,
        inactive = inactive.len(),
        kicked_out = kicked_out.len(),
        "scale-down plan"
    );

    for machine in membership.iter_mut().take(target) {
        if machine.all_deactivating() {
            debug!(ip = %machine.ip, "already deactivating");
            continue;
        }
        if deactivate(cluster, machine, &mut errors).await {
            machine.state = ScaleState::Deactivating;
        }
    }
    for machine in &kicked_out {
        deactivate(cluster, machine, &mut errors).await;
    }

    let hosts = membership
        .iter()
        .filter_map(|machine| {
            let instance = instances.get(machine.ip.as_str())?;
            Some(ScaleResponseHost {
                instance_id: instance.id.clone(),
                private_ip: machine.ip.clone(),
                state: machine.state,
                added_time: machine.added_time,
                host_id: machine.primary_host_id(),
            })
        })
        .collect();

    Ok(ScaleResponse {
        hosts,
        to_terminate,
        transient_errors: errors.into_vec(),
        ..ScaleResponse::default()
    })
}

/// Remove every container of an inactive machine, then its drives.
/// Returns true when all containers were removed.
async fn remove_inactive(cluster: &dyn ClusterApi, machine: &Machine, errors: &mut TransientErrors) -> bool {
    cluster.forget_backend(&machine.ip).await;

    let mut removed = true;
    for host_id in machine.host_ids() {
        if let Err(e) = cluster.remove_host(&host_id).await {
            errors.add("removeInactive", format!("{host_id}: {e}"));
            removed = false;
        }
    }
    if !removed {
        return false;
    }

    info!(ip = %machine.ip, "inactive machine removed");
    for uuid in machine.drive_uuids(false) {
        remove_drive(cluster, uuid, errors).await;
    }
    true
}

/// Drives left behind by earlier host removals.
async fn remove_old_drives(cluster: &dyn ClusterApi, drives: &DriveList, errors: &mut TransientErrors) {
    for drive in drives.values() {
        if drive.is_orphaned() && drive.status == "INACTIVE" {
            remove_drive(cluster, drive.uuid.clone(), errors).await;
        }
    }
}

async fn remove_drive(cluster: &dyn ClusterApi, uuid: String, errors: &mut TransientErrors) {
    if let Err(e) = cluster.remove_drives(std::slice::from_ref(&uuid)).await {
        errors.add("removeDrive", format!("{uuid}: {e}"));
    }
}

/// Deactivate active drives one by one, then all containers together.
/// Returns true when the containers were accepted for deactivation.
async fn deactivate(cluster: &dyn ClusterApi, machine: &Machine, errors: &mut TransientErrors) -> bool {
    info!(ip = %machine.ip, state = %machine.state, "deactivating machine");
    for uuid in machine.drive_uuids(true) {
        if let Err(e) = cluster.deactivate_drives(std::slice::from_ref(&uuid)).await {
            errors.add("deactivateDrive", format!("{uuid}: {e}"));
        }
    }

    match cluster.deactivate_hosts(&machine.host_ids()).await {
        Ok(()) => {
            cluster.forget_backend(&machine.ip).await;
            true
        }
        Err(e) => {
            errors.add("deactivateHost", format!("{}: {e}", machine.ip));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::*;
    use fleet_core::{ProtocolError, VERSION};

    fn host_group(ips: &[&str], desired: usize) -> HostGroupInfoResponse {
        HostGroupInfoResponse {
            username: "admin".into(),
            password: "secret".into(),
            desired_capacity: desired,
            instances: ips
                .iter()
                .enumerate()
                .map(|(i, ip)| HgInstance {
                    id: i.to_string(),
                    private_ip: ip.to_string(),
                })
                .collect(),
            backend_ips: ips.iter().map(|s| s.to_string()).collect(),
            role: "backend".into(),
            version: VERSION,
            down_backends_removal_timeout_secs: 1800,
        }
    }

    fn ip(i: usize) -> String {
        format!("10.0.0.{}", 10 + i)
    }

    /// `n` healthy machines added one day apart, oldest first.
    fn healthy_fleet(n: usize) -> (InventoryBuilder, Vec<String>) {
        let mut inv = InventoryBuilder::default();
        let ips: Vec<String> = (0..n).map(ip).collect();
        for (i, addr) in ips.iter().enumerate() {
            inv.machine(addr, now() - Duration::days(30 - i as i64));
        }
        (inv, ips)
    }

    async fn run(cluster: &FakeCluster, info: &HostGroupInfoResponse) -> ScaleResponse {
        scale_down(cluster, info, &ScaleDownSettings::default(), now())
            .await
            .unwrap()
    }

    fn refs(ips: &[String]) -> Vec<&str> {
        ips.iter().map(String::as_str).collect()
    }

    #[tokio::test]
    async fn test_upgrade_aborts_without_mutation() {
        let (inv, ips) = healthy_fleet(3);
        let mut cluster = FakeCluster::new(inv.build());
        cluster.status.upgrade = "4.2.1".into();

        let err = scale_down(&cluster, &host_group(&refs(&ips), 3), &ScaleDownSettings::default(), now())
            .await
            .unwrap_err();
        assert!(matches!(err, ScaleError::NotAllowed(_)));
        assert_eq!(cluster.calls(), vec!["status"]);
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let cluster = FakeCluster::new(Inventory::default());
        let mut info = host_group(&[], 0);
        info.version = VERSION + 1;
        let err = scale_down(&cluster, &info, &ScaleDownSettings::default(), now())
            .await
            .unwrap_err();
        assert!(matches!(err, ScaleError::Protocol(_)));
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unrepresentable_removal_timeout_is_rejected() {
        let (inv, ips) = healthy_fleet(3);
        let cluster = FakeCluster::new(inv.build());
        for secs in [100_000_000_000_000_000, u64::MAX] {
            let mut info = host_group(&refs(&ips), 3);
            info.down_backends_removal_timeout_secs = secs;
            let err = scale_down(&cluster, &info, &ScaleDownSettings::default(), now())
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                ScaleError::Protocol(ProtocolError::DurationOutOfRange { value, .. }) if value == secs
            ));
        }
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_steady_state_changes_nothing() {
        let (inv, ips) = healthy_fleet(6);
        let cluster = FakeCluster::new(inv.build());
        let response = run(&cluster, &host_group(&refs(&ips), 6)).await;

        assert!(cluster.mutations().is_empty());
        assert_eq!(response.hosts.len(), 6);
        assert!(response.hosts.iter().all(|h| h.state == ScaleState::Healthy));
        // Oldest first.
        assert_eq!(response.hosts[0].private_ip, ips[0]);
        assert!(response.to_terminate.is_empty());
        assert!(response.transient_errors.is_empty());
    }

    #[tokio::test]
    async fn test_over_capacity_deactivates_oldest_machine() {
        let (inv, ips) = healthy_fleet(7);
        let cluster = FakeCluster::new(inv.build());
        let response = run(&cluster, &host_group(&refs(&ips), 6)).await;

        assert_eq!(
            cluster.mutations(),
            vec![
                "deactivate_drives uuid-0".to_string(),
                "deactivate_hosts HostId<0>,HostId<1>".to_string(),
                format!("forget {}", ips[0]),
            ]
        );
        // Still listed, now as deactivating, until it goes INACTIVE.
        assert_eq!(response.hosts.len(), 7);
        assert_eq!(response.hosts[0].private_ip, ips[0]);
        assert_eq!(response.hosts[0].state, ScaleState::Deactivating);
        assert_eq!(response.hosts[0].host_id, "HostId<0>");
    }

    #[tokio::test]
    async fn test_unhealthy_machine_is_removed_before_older_healthy_ones() {
        let (mut inv, mut ips) = healthy_fleet(6);
        let sick_ip = ip(6);
        let drive_host = inv.machine(&sick_ip, now() - Duration::days(1));
        inv.drive(&drive_host, "INACTIVE", true);
        ips.push(sick_ip.clone());
        let cluster = FakeCluster::new(inv.build());

        let response = run(&cluster, &host_group(&refs(&ips), 7)).await;

        // max(7 - 7, min(2 - 0, 1)) = 1: only the sick machine.
        let deactivated: Vec<String> = cluster
            .mutations()
            .into_iter()
            .filter(|c| c.starts_with("deactivate_hosts"))
            .collect();
        assert_eq!(deactivated.len(), 1);
        assert_eq!(response.hosts[0].private_ip, sick_ip);
        assert_eq!(response.hosts[0].state, ScaleState::Deactivating);
        assert!(cluster.mutations().contains(&format!("forget {sick_ip}")));
    }

    #[tokio::test]
    async fn test_already_deactivating_machine_is_not_reissued() {
        let (mut inv, mut ips) = healthy_fleet(6);
        let leaving = ip(6);
        inv.container(&leaving, "drives0", "DEACTIVATING", "UP", now() - Duration::days(60));
        ips.push(leaving.clone());
        let cluster = FakeCluster::new(inv.build());

        let response = run(&cluster, &host_group(&refs(&ips), 6)).await;

        // Target is 1 and the deactivating machine already accounts for it.
        assert!(cluster.mutations().is_empty());
        assert_eq!(response.hosts[0].private_ip, leaving);
        assert_eq!(response.hosts[0].state, ScaleState::Deactivating);
    }

    #[tokio::test]
    async fn test_inactive_machine_is_removed_and_terminated() {
        let (mut inv, mut ips) = healthy_fleet(6);
        let gone = ip(6);
        let drive_host = inv.container(&gone, "drives0", "INACTIVE", "UP", now() - Duration::days(40));
        inv.container(&gone, "compute0", "INACTIVE", "UP", now() - Duration::days(40));
        let uuid = inv.drive(&drive_host, "INACTIVE", false);
        ips.push(gone.clone());
        let cluster = FakeCluster::new(inv.build());

        let response = run(&cluster, &host_group(&refs(&ips), 6)).await;

        assert_eq!(
            cluster.mutations(),
            vec![
                format!("forget {gone}"),
                "remove_host HostId<12>".to_string(),
                "remove_host HostId<13>".to_string(),
                format!("remove_drives {uuid}"),
            ]
        );
        assert_eq!(response.to_terminate.len(), 1);
        assert_eq!(response.to_terminate[0].private_ip, gone);
        assert_eq!(response.hosts.len(), 6);
        assert!(response.hosts.iter().all(|h| h.private_ip != gone));
    }

    #[tokio::test]
    async fn test_failed_container_removal_keeps_instance() {
        let (mut inv, mut ips) = healthy_fleet(6);
        let gone = ip(6);
        inv.container(&gone, "drives0", "INACTIVE", "UP", now() - Duration::days(40));
        ips.push(gone.clone());
        let cluster = FakeCluster::new(inv.build()).failing("remove_host");

        let response = run(&cluster, &host_group(&refs(&ips), 6)).await;

        assert!(response.to_terminate.is_empty());
        assert_eq!(response.transient_errors.len(), 1);
        assert!(response.transient_errors[0].starts_with("removeInactive: HostId<12>"));
    }

    #[tokio::test]
    async fn test_orphaned_inactive_drives_are_removed() {
        let (mut inv, ips) = healthy_fleet(6);
        let orphan = inv.drive("HostId<-1>", "INACTIVE", false);
        inv.drive("HostId<-1>", "PHASING_IN", true);
        let cluster = FakeCluster::new(inv.build());

        run(&cluster, &host_group(&refs(&ips), 6)).await;

        assert_eq!(cluster.mutations(), vec![format!("remove_drives {orphan}")]);
    }

    #[tokio::test]
    async fn test_machine_down_too_long_outside_group_is_kicked_out() {
        let (mut inv, ips) = healthy_fleet(6);
        let stray = ip(9);
        let host = inv.container(&stray, "drives0", "ACTIVE", "DOWN", now() - Duration::days(10));
        inv.management_node(&host, "DOWN", Some(now() - Duration::hours(1)));
        let cluster = FakeCluster::new(inv.build());

        let response = run(&cluster, &host_group(&refs(&ips), 6)).await;

        assert_eq!(
            cluster.mutations(),
            vec![format!("deactivate_hosts {host}"), format!("forget {stray}")]
        );
        assert_eq!(response.hosts.len(), 6);
    }

    #[tokio::test]
    async fn test_recently_down_machine_outside_group_is_left_alone() {
        let (mut inv, ips) = healthy_fleet(6);
        let host = inv.container(&ip(9), "drives0", "ACTIVE", "DOWN", now() - Duration::days(10));
        inv.management_node(&host, "DOWN", Some(now() - Duration::minutes(5)));
        let cluster = FakeCluster::new(inv.build());

        run(&cluster, &host_group(&refs(&ips), 6)).await;
        assert!(cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_deactivation_failure_is_transient_and_cycle_continues() {
        let (inv, ips) = healthy_fleet(8);
        let cluster = FakeCluster::new(inv.build()).failing("deactivate_hosts HostId<0>");

        let response = run(&cluster, &host_group(&refs(&ips), 6)).await;

        let deactivations: Vec<String> = cluster
            .mutations()
            .into_iter()
            .filter(|c| c.starts_with("deactivate_hosts"))
            .collect();
        assert_eq!(deactivations.len(), 2);
        assert_eq!(response.transient_errors.len(), 1);
        assert!(response.transient_errors[0].starts_with("deactivateHost: "));
        assert_eq!(response.hosts[0].state, ScaleState::Healthy);
        assert_eq!(response.hosts[1].state, ScaleState::Deactivating);
    }

    #[tokio::test]
    async fn test_client_role_skips_drive_listing() {
        let (inv, ips) = healthy_fleet(2);
        let cluster = FakeCluster::new(inv.build());
        let mut info = host_group(&refs(&ips), 2);
        info.role = "client".into();

        run(&cluster, &info).await;
        assert_eq!(cluster.calls(), vec!["status", "hosts", "nodes"]);
    }
}
