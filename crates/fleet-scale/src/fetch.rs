//! Host group snapshot that feeds the scale-down stage.

use fleet_cloud::ScaleSetApi;
use fleet_core::config::ClusterConfig;
use fleet_core::{HgInstance, HostGroupInfoResponse, VERSION};
use fleet_state::ClusterStateStore;
use tracing::debug;

use crate::error::ScaleResult;

/// Instances with a known private IP, the desired size from the state blob
/// and the cluster credentials.
pub async fn fetch_host_group(
    cloud: &dyn ScaleSetApi,
    store: &ClusterStateStore,
    cluster: &ClusterConfig,
    down_backends_removal_timeout_secs: u64,
) -> ScaleResult<HostGroupInfoResponse> {
    let instances: Vec<HgInstance> = cloud
        .list_instances()
        .await?
        .into_iter()
        .filter_map(|i| {
            Some(HgInstance {
                private_ip: i.private_ip?,
                id: i.instance_id,
            })
        })
        .collect();
    let desired_capacity = store.read().await?.desired_size;
    debug!(instances = instances.len(), desired_capacity, "host group fetched");

    Ok(HostGroupInfoResponse {
        username: cluster.username.clone(),
        password: cluster.password.clone(),
        desired_capacity,
        backend_ips: instances.iter().map(|i| i.private_ip.clone()).collect(),
        instances,
        role: cluster.role.clone(),
        version: VERSION,
        down_backends_removal_timeout_secs,
    })
}
