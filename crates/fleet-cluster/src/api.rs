//! Typed management API used by the scale-down orchestrator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{HostGroupInfoResponse, HostId};
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{RpcError, RpcResult};
use crate::inventory::*;
use crate::pool::{EndpointBuilder, RpcPool};
use crate::rpc::{JrpcClient, RpcEndpoint};

/// Administrative operations on the storage cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn status(&self) -> RpcResult<SystemStatus>;
    async fn hosts(&self) -> RpcResult<HostList>;
    async fn drives(&self) -> RpcResult<DriveList>;
    async fn nodes(&self) -> RpcResult<NodeList>;
    async fn deactivate_drives(&self, uuids: &[String]) -> RpcResult<()>;
    async fn deactivate_hosts(&self, host_ids: &[HostId]) -> RpcResult<()>;
    async fn remove_drives(&self, uuids: &[String]) -> RpcResult<()>;
    async fn remove_host(&self, host_id: &HostId) -> RpcResult<()>;
    /// Stop routing calls through a backend that is leaving the cluster.
    async fn forget_backend(&self, ip: &str);

    /// The `status` reply as the cluster sent it.
    async fn raw_status(&self) -> RpcResult<Value> {
        let status = self.status().await?;
        serde_json::to_value(status).map_err(|e| RpcError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ClusterApi for RpcPool {
    async fn status(&self) -> RpcResult<SystemStatus> {
        self.call("status", &json!({})).await
    }

    /// Rejected unless it also decodes as a [`SystemStatus`].
    async fn raw_status(&self) -> RpcResult<Value> {
        let raw = self.call_raw("status", json!({})).await?;
        SystemStatus::deserialize(&raw).map_err(|e| RpcError::Decode(e.to_string()))?;
        Ok(raw)
    }

    async fn hosts(&self) -> RpcResult<HostList> {
        self.call("hosts_list", &json!({})).await
    }

    async fn drives(&self) -> RpcResult<DriveList> {
        self.call("disks_list", &json!({})).await
    }

    async fn nodes(&self) -> RpcResult<NodeList> {
        self.call("nodes_list", &json!({})).await
    }

    async fn deactivate_drives(&self, uuids: &[String]) -> RpcResult<()> {
        self.call_raw("cluster_deactivate_drives", json!({ "drive_uuids": uuids }))
            .await
            .map(|_| ())
    }

    async fn deactivate_hosts(&self, host_ids: &[HostId]) -> RpcResult<()> {
        let params = json!({
            "host_ids": host_ids,
            "skip_resource_validation": false,
        });
        self.call_raw("cluster_deactivate_hosts", params).await.map(|_| ())
    }

    async fn remove_drives(&self, uuids: &[String]) -> RpcResult<()> {
        self.call_raw("cluster_remove_drives", json!({ "drive_uuids": uuids }))
            .await
            .map(|_| ())
    }

    async fn remove_host(&self, host_id: &HostId) -> RpcResult<()> {
        let number = id_number(host_id)
            .ok_or_else(|| RpcError::Decode(format!("malformed host id {host_id}")))?;
        let params = json!({ "host_id": number, "no_wait": true });
        self.call_raw("cluster_remove_host", params).await.map(|_| ())
    }

    async fn forget_backend(&self, ip: &str) {
        self.drop_backend(ip).await;
    }
}

/// Opens a [`ClusterApi`] for one scale-down cycle.
pub trait ClusterConnector: Send + Sync {
    fn connect(&self, info: &HostGroupInfoResponse) -> Arc<dyn ClusterApi>;
}

/// Connects over JSON-RPC to the backends listed in the host group.
#[derive(Debug, Clone)]
pub struct RpcConnector {
    pub management_port: u16,
    pub timeout: Duration,
}

impl RpcConnector {
    pub fn new(management_port: u16, timeout: Duration) -> Self {
        Self {
            management_port,
            timeout,
        }
    }
}

impl ClusterConnector for RpcConnector {
    fn connect(&self, info: &HostGroupInfoResponse) -> Arc<dyn ClusterApi> {
        let mut ips = info.backend_ips.clone();
        ips.shuffle(&mut rand::thread_rng());
        debug!(backends = ips.len(), "opening management rpc pool");

        let port = self.management_port;
        let timeout = self.timeout;
        let username = info.username.clone();
        let password = info.password.clone();
        let builder: EndpointBuilder = Arc::new(move |ip: &str| {
            Arc::new(JrpcClient::new(
                format!("{ip}:{port}"),
                username.clone(),
                password.clone(),
                timeout,
            )) as Arc<dyn RpcEndpoint>
        });
        Arc::new(RpcPool::new(ips, builder))
    }
}
