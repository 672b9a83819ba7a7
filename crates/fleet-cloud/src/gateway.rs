//! HTTP client for the scale set gateway.
//!
//! The gateway fronts the platform's compute and network APIs for one
//! resource group. All calls are JSON over plain HTTP/1.1:
//!
//! | Call | Route |
//! |---|---|
//! | list VMs (instance view) | `GET  /scale-sets/{name}/vms` |
//! | primary NICs | `GET  /scale-sets/{name}/primary-nics` |
//! | deletion protection | `POST /scale-sets/{name}/vms/{id}/protection` |
//! | delete VM | `POST /scale-sets/{name}/vms/{id}/delete` |
//! | read capacity | `GET  /scale-sets/{name}` |
//! | update capacity | `POST /scale-sets/{name}/capacity` |

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::http::{self, JsonResponse};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ScaleSetApi;
use crate::error::{CloudError, CloudResult};
use crate::instance::{InstanceSummary, PrimaryNic, ScaleSetVm};

#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProtectionRequest {
    pub protect_from_scale_set_actions: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub force: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CapacityBody {
    pub capacity: usize,
}

/// [`ScaleSetApi`] over the gateway's HTTP interface.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    endpoint: String,
    scale_set: String,
    timeout: Duration,
}

impl GatewayClient {
    pub fn new(endpoint: impl Into<String>, scale_set: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            scale_set: scale_set.into(),
            timeout,
        }
    }

    fn path(&self, suffix: &str) -> String {
        format!("/scale-sets/{}{suffix}", self.scale_set)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, suffix: &str) -> CloudResult<T> {
        let resp = http::get(&self.endpoint, &self.path(suffix), None, self.timeout)
            .await
            .map_err(|e| CloudError::Transport(e.to_string()))?;
        let resp = check(resp)?;
        resp.json().map_err(|e| CloudError::Decode(e.to_string()))
    }

    async fn post<B: Serialize + Sync>(&self, suffix: &str, body: &B) -> CloudResult<()> {
        let resp = http::post_json(&self.endpoint, &self.path(suffix), None, body, self.timeout)
            .await
            .map_err(|e| CloudError::Transport(e.to_string()))?;
        check(resp).map(|_| ())
    }
}

/// Map a non-2xx gateway reply onto [`CloudError`].
fn check(resp: JsonResponse) -> CloudResult<JsonResponse> {
    if resp.status.is_success() {
        return Ok(resp);
    }
    let status = resp.status.as_u16();
    let body: GatewayError = resp.json().unwrap_or(GatewayError {
        code: String::new(),
        message: resp.text(),
    });
    match (status, body.code.as_str()) {
        (_, "AuthorizationFailed") => Err(CloudError::AuthorizationFailed(body.message)),
        (404, _) => Err(CloudError::NotFound(body.message)),
        _ => Err(CloudError::Api {
            status,
            code: body.code,
            message: body.message,
        }),
    }
}

#[async_trait]
impl ScaleSetApi for GatewayClient {
    async fn list_instances(&self) -> CloudResult<Vec<InstanceSummary>> {
        let vms: Vec<ScaleSetVm> = self.get_json("/vms").await?;
        let nics: Vec<PrimaryNic> = self.get_json("/primary-nics").await?;
        let ips: HashMap<String, String> = nics
            .into_iter()
            .map(|nic| (nic.instance_id, nic.private_ip))
            .collect();

        let instances: Vec<InstanceSummary> = vms
            .iter()
            .map(|vm| InstanceSummary::from_vm(vm, ips.get(&vm.instance_id).cloned()))
            .collect();
        debug!(scale_set = %self.scale_set, count = instances.len(), "listed scale set instances");
        Ok(instances)
    }

    async fn set_deletion_protection(&self, instance_id: &str, protect: bool) -> CloudResult<()> {
        info!(instance_id, protect, "setting deletion protection");
        self.post(
            &format!("/vms/{instance_id}/protection"),
            &ProtectionRequest {
                protect_from_scale_set_actions: protect,
            },
        )
        .await
    }

    async fn delete_instance(&self, instance_id: &str, force: bool) -> CloudResult<()> {
        info!(instance_id, force, "deleting instance");
        self.post(&format!("/vms/{instance_id}/delete"), &DeleteRequest { force })
            .await
    }

    async fn capacity(&self) -> CloudResult<usize> {
        let body: CapacityBody = self.get_json("").await?;
        Ok(body.capacity)
    }

    async fn set_capacity(&self, capacity: usize) -> CloudResult<()> {
        info!(scale_set = %self.scale_set, capacity, "updating scale set capacity");
        self.post("/capacity", &CapacityBody { capacity }).await
    }
}
