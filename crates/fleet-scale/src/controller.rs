//! Wires the pipeline stages to their collaborators.

use std::sync::Arc;

use chrono::Utc;
use fleet_cloud::ScaleSetApi;
use fleet_cluster::ClusterConnector;
use fleet_core::{
    FleetConfig, HostGroupInfoResponse, RetryPolicy, ScaleResponse, TerminatedInstancesResponse,
    instance_id_from_vm_name,
};
use fleet_state::{ClusterStateStore, Resize};
use serde_json::Value;
use tracing::info;

use crate::capacity::{self, CapacityChange};
use crate::error::{ScaleError, ScaleResult};
use crate::fetch::fetch_host_group;
use crate::protection::{Protection, set_protection_with_reports};
use crate::scale_down::{ScaleDownSettings, scale_down};
use crate::terminate::{TerminateSettings, terminate};

/// Everything a pipeline stage needs, cheap to clone into handlers and loops.
#[derive(Clone)]
pub struct Controller {
    pub store: ClusterStateStore,
    pub cloud: Arc<dyn ScaleSetApi>,
    pub connector: Arc<dyn ClusterConnector>,
    pub config: Arc<FleetConfig>,
}

impl Controller {
    pub fn new(
        store: ClusterStateStore,
        cloud: Arc<dyn ScaleSetApi>,
        connector: Arc<dyn ClusterConnector>,
        config: Arc<FleetConfig>,
    ) -> Self {
        Self {
            store,
            cloud,
            connector,
            config,
        }
    }

    pub async fn fetch(&self) -> ScaleResult<HostGroupInfoResponse> {
        fetch_host_group(
            self.cloud.as_ref(),
            &self.store,
            &self.config.cluster,
            self.config.scale.down_backends_removal_timeout_secs,
        )
        .await
    }

    pub async fn scale_down(&self, info: &HostGroupInfoResponse) -> ScaleResult<ScaleResponse> {
        let cluster = self.connector.connect(info);
        let settings = ScaleDownSettings::from(&self.config.scale);
        scale_down(cluster.as_ref(), info, &settings, Utc::now()).await
    }

    /// Cluster status straight from the management API, through a fresh
    /// fail-over pool over the scale set's private IPs.
    pub async fn cluster_status(&self) -> ScaleResult<Value> {
        let info = self.fetch().await?;
        let cluster = self.connector.connect(&info);
        Ok(cluster.raw_status().await?)
    }

    pub async fn terminate(&self, scale: &ScaleResponse) -> ScaleResult<TerminatedInstancesResponse> {
        let settings = TerminateSettings::from(&self.config.scale);
        terminate(self.cloud.as_ref(), &self.store, scale, &settings, Utc::now()).await
    }

    /// Fetch, decide and terminate in one go.
    pub async fn run_scale_down_workflow(&self) -> ScaleResult<TerminatedInstancesResponse> {
        let info = self.fetch().await?;
        let scale = self.scale_down(&info).await?;
        let terminated = self.terminate(&scale).await?;
        for instance in &terminated.instances {
            info!(instance_id = %instance.instance_id, creation = ?instance.creation, "instance terminated");
        }
        Ok(terminated)
    }

    fn protection_policy(&self) -> RetryPolicy {
        let protection = &self.config.protection;
        RetryPolicy::new(protection.max_attempts, protection.sleep_interval())
    }

    /// Protect a newly joined VM, given as `<instance-name>:<hostname>`.
    pub async fn protect(&self, vm: &str) -> ScaleResult<Protection> {
        let (name, hostname) = vm
            .split_once(':')
            .ok_or_else(|| ScaleError::MalformedInstance(vm.to_string()))?;
        let instance_id = instance_id_from_vm_name(name);
        set_protection_with_reports(
            self.cloud.as_ref(),
            &self.store,
            instance_id,
            hostname,
            self.protection_policy(),
        )
        .await
    }

    /// Confirm protection for an instance that finished joining the cluster.
    pub async fn join_finalization(&self, name: &str) -> ScaleResult<Protection> {
        let instance_id = instance_id_from_vm_name(name);
        set_protection_with_reports(
            self.cloud.as_ref(),
            &self.store,
            instance_id,
            name,
            self.protection_policy(),
        )
        .await
    }

    pub async fn propagate_capacity(&self) -> ScaleResult<CapacityChange> {
        capacity::propagate_capacity(self.cloud.as_ref(), &self.store).await
    }

    pub async fn resize(&self, requested: usize) -> ScaleResult<Resize> {
        capacity::resize(
            self.cloud.as_ref(),
            &self.store,
            requested,
            self.config.cluster.min_cluster_size,
        )
        .await
    }
}
