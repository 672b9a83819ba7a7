//! HTTP handlers.
//!
//! Pipeline stages return their records as-is; state and instance
//! endpoints wrap results in [`ApiResponse`].

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fleet_core::{HostGroupInfoResponse, Report, ScaleResponse, TerminatedInstancesResponse};
use fleet_scale::{ScaleError, summarize};
use fleet_state::StateError;
use serde::Deserialize;
use tracing::{info, warn};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Error mapping ──────────────────────────────────────────────

fn state_status(e: &StateError) -> StatusCode {
    match e {
        StateError::NotClusterized => StatusCode::CONFLICT,
        StateError::LeaseExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn scale_status(e: &ScaleError) -> StatusCode {
    match e {
        ScaleError::Protocol(_) | ScaleError::BelowMinimum { .. } | ScaleError::MalformedInstance(_) => {
            StatusCode::BAD_REQUEST
        }
        ScaleError::NotAllowed(_) => StatusCode::CONFLICT,
        ScaleError::State(e) => state_status(e),
        ScaleError::Cluster(_) | ScaleError::Cloud(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn scale_failure(e: ScaleError) -> Response {
    let status = scale_status(&e);
    warn!(status = status.as_u16(), error = %e, "request failed");
    error_response(&e.to_string(), status).into_response()
}

fn state_failure(e: StateError) -> Response {
    let status = state_status(&e);
    warn!(status = status.as_u16(), error = %e, "request failed");
    error_response(&e.to_string(), status).into_response()
}

// ── Pipeline ───────────────────────────────────────────────────

/// POST /fetch
pub async fn fetch(State(state): State<ApiState>) -> Response {
    match state.controller.fetch().await {
        Ok(info) => Json(info).into_response(),
        Err(e) => scale_failure(e),
    }
}

/// POST /scale_down
pub async fn scale_down(
    State(state): State<ApiState>,
    Json(info): Json<HostGroupInfoResponse>,
) -> Response {
    match state.controller.scale_down(&info).await {
        Ok(scale) => Json(scale).into_response(),
        Err(e) => scale_failure(e),
    }
}

/// POST /terminate
pub async fn terminate(State(state): State<ApiState>, Json(scale): Json<ScaleResponse>) -> Response {
    match state.controller.terminate(&scale).await {
        Ok(terminated) => Json(terminated).into_response(),
        Err(e) => scale_failure(e),
    }
}

/// POST /transient
pub async fn transient(Json(response): Json<TerminatedInstancesResponse>) -> Response {
    match summarize(&response) {
        Ok(report) => Json(report).into_response(),
        Err(e) => scale_failure(e),
    }
}

// ── Instances ──────────────────────────────────────────────────

/// POST /report
pub async fn report(State(state): State<ApiState>, Json(report): Json<Report>) -> Response {
    match state.controller.store.append_report(&report).await {
        Ok(()) => ApiResponse::ok("The report was added successfully").into_response(),
        Err(e) => state_failure(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ProtectRequest {
    pub vm: String,
}

/// POST /protect
pub async fn protect(State(state): State<ApiState>, Json(req): Json<ProtectRequest>) -> Response {
    match state.controller.protect(&req.vm).await {
        Ok(outcome) => ApiResponse::ok(outcome).into_response(),
        Err(e) => scale_failure(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

/// POST /join_finalization
pub async fn join_finalization(State(state): State<ApiState>, Json(req): Json<NameRequest>) -> Response {
    match state.controller.join_finalization(&req.name).await {
        Ok(outcome) => ApiResponse::ok(outcome).into_response(),
        Err(e) => scale_failure(e),
    }
}

// ── Clusterization ─────────────────────────────────────────────

/// POST /clusterize
pub async fn clusterize(State(state): State<ApiState>, Json(req): Json<NameRequest>) -> Response {
    match state.controller.store.add_instance_to_state(&req.name).await {
        Ok(registration) => ApiResponse::ok(registration).into_response(),
        Err(e) => state_failure(e),
    }
}

/// POST /clusterize_finalization
pub async fn clusterize_finalization(State(state): State<ApiState>) -> Response {
    match state.controller.store.commit_clusterized().await {
        Ok(committed) => ApiResponse::ok(committed).into_response(),
        Err(e) => state_failure(e),
    }
}

// ── Sizing ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ResizeRequest {
    #[serde(alias = "new_size")]
    pub value: usize,
}

/// POST /resize
pub async fn resize(State(state): State<ApiState>, Json(req): Json<ResizeRequest>) -> Response {
    info!(value = req.value, "resize requested");
    match state.controller.resize(req.value).await {
        Ok(resize) => ApiResponse::ok(resize).into_response(),
        Err(e) => scale_failure(e),
    }
}

// ── Status ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    #[default]
    Status,
    Progress,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusRequest {
    #[serde(rename = "type", default)]
    pub kind: StatusKind,
}

/// POST /status
pub async fn status(State(state): State<ApiState>, Json(req): Json<StatusRequest>) -> Response {
    match state.controller.store.read().await {
        Ok(cluster) => match req.kind {
            StatusKind::Status => ApiResponse::ok(cluster.status()).into_response(),
            StatusKind::Progress => ApiResponse::ok(cluster.reports()).into_response(),
        },
        Err(e) => state_failure(e),
    }
}

// ── Cluster ────────────────────────────────────────────────────

/// Management API method to relay. Only `status` is allowed.
#[derive(Debug, Deserialize)]
pub struct ClusterApiRequest {
    pub method: String,
}

/// POST /cluster_status
pub async fn cluster_status(State(state): State<ApiState>, Json(req): Json<ClusterApiRequest>) -> Response {
    if req.method != "status" {
        warn!(method = %req.method, "cluster api method refused");
        return error_response(&format!("unsupported cluster api method: {}", req.method), StatusCode::BAD_REQUEST)
            .into_response();
    }
    match state.controller.cluster_status().await {
        Ok(raw) => ApiResponse::ok(raw).into_response(),
        Err(e) => scale_failure(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use fleet_cloud::{CloudResult, InstanceSummary, ScaleSetApi};
    use fleet_cluster::*;
    use fleet_core::{FleetConfig, HostId};
    use fleet_scale::Controller;
    use fleet_state::{ClusterState, ClusterStateStore, RedbBackend};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::build_router;

    #[derive(Default)]
    struct FakeScaleSet {
        capacity: Mutex<usize>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ScaleSetApi for FakeScaleSet {
        async fn list_instances(&self) -> CloudResult<Vec<InstanceSummary>> {
            Ok(Vec::new())
        }

        async fn set_deletion_protection(&self, instance_id: &str, protect: bool) -> CloudResult<()> {
            self.calls.lock().unwrap().push(format!("protect {instance_id} {protect}"));
            Ok(())
        }

        async fn delete_instance(&self, instance_id: &str, _force: bool) -> CloudResult<()> {
            self.calls.lock().unwrap().push(format!("delete {instance_id}"));
            Ok(())
        }

        async fn capacity(&self) -> CloudResult<usize> {
            Ok(*self.capacity.lock().unwrap())
        }

        async fn set_capacity(&self, capacity: usize) -> CloudResult<()> {
            *self.capacity.lock().unwrap() = capacity;
            Ok(())
        }
    }

    /// A cluster whose I/O has not started yet.
    struct StoppedCluster;

    #[async_trait]
    impl ClusterApi for StoppedCluster {
        async fn status(&self) -> RpcResult<SystemStatus> {
            Ok(SystemStatus {
                io_status: "STOPPED".into(),
                upgrade: String::new(),
            })
        }
        async fn hosts(&self) -> RpcResult<HostList> {
            Ok(Default::default())
        }
        async fn drives(&self) -> RpcResult<DriveList> {
            Ok(Default::default())
        }
        async fn nodes(&self) -> RpcResult<NodeList> {
            Ok(Default::default())
        }
        async fn deactivate_drives(&self, _uuids: &[String]) -> RpcResult<()> {
            Ok(())
        }
        async fn deactivate_hosts(&self, _host_ids: &[HostId]) -> RpcResult<()> {
            Ok(())
        }
        async fn remove_drives(&self, _uuids: &[String]) -> RpcResult<()> {
            Ok(())
        }
        async fn remove_host(&self, _host_id: &HostId) -> RpcResult<()> {
            Ok(())
        }
        async fn forget_backend(&self, _ip: &str) {}
    }

    struct StoppedConnector;

    impl ClusterConnector for StoppedConnector {
        fn connect(&self, _info: &fleet_core::HostGroupInfoResponse) -> Arc<dyn ClusterApi> {
            Arc::new(StoppedCluster)
        }
    }

    async fn test_app(initial: usize) -> (axum::Router, Arc<FakeScaleSet>) {
        let backend = Arc::new(RedbBackend::open_in_memory().unwrap());
        let store = ClusterStateStore::new(backend, "state");
        store
            .init_if_absent(&ClusterState::new(initial, initial, initial))
            .await
            .unwrap();
        let cloud = Arc::new(FakeScaleSet::default());
        let mut config = FleetConfig::default();
        config.cluster.min_cluster_size = 2;
        let controller = Controller::new(store, cloud.clone(), Arc::new(StoppedConnector), Arc::new(config));
        (build_router(controller), cloud)
    }

    async fn post(app: &axum::Router, path: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn report_lands_in_progress_view() {
        let (app, _) = test_app(3).await;
        let (status, body) = post(
            &app,
            "/report",
            json!({"type": "progress", "hostname": "vm0", "message": "installing"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) = post(&app, "/status", json!({"type": "progress"})).await;
        assert_eq!(status, StatusCode::OK);
        let entry = body["data"]["progress"]["vm0"][0].as_str().unwrap();
        assert!(entry.ends_with(": installing"));
        assert_eq!(body["data"]["summary"]["clusterization_target"], 3);
    }

    #[tokio::test]
    async fn clusterize_until_target_then_requires_shutdown() {
        let (app, _) = test_app(2).await;

        let (_, body) = post(&app, "/clusterize", json!({"name": "vmss_0:vm0"})).await;
        assert_eq!(body["data"], json!({"result": "registered", "position": 1, "reached_target": false}));
        let (_, body) = post(&app, "/clusterize", json!({"name": "vmss_1:vm1"})).await;
        assert_eq!(body["data"]["reached_target"], true);

        let (status, body) = post(&app, "/clusterize_finalization", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["clusterized"], true);

        let (status, body) = post(&app, "/clusterize", json!({"name": "vmss_2:vm2"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["result"], "shutdown_required");
    }

    #[tokio::test]
    async fn resize_maps_errors_and_grows_capacity() {
        let (app, cloud) = test_app(2).await;

        let (status, _) = post(&app, "/resize", json!({"value": 1})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post(&app, "/resize", json!({"value": 4})).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);

        post(&app, "/clusterize_finalization", json!({})).await;
        let (status, body) = post(&app, "/resize", json!({"new_size": 4})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!({"old": 2, "new": 4}));
        assert_eq!(*cloud.capacity.lock().unwrap(), 4);

        let (status, _) = post(&app, "/resize", json!({"value": -1})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn scale_down_refused_while_io_stopped() {
        let (app, _) = test_app(3).await;
        let info = json!({
            "username": "admin",
            "password": "secret",
            "desired_capacity": 3,
            "instances": [],
            "backend_ips": ["10.0.0.1"],
            "role": "backend",
            "version": 1
        });
        let (status, body) = post(&app, "/scale_down", info).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("STOPPED"));
    }

    #[tokio::test]
    async fn scale_down_rejects_unrepresentable_removal_timeout() {
        let (app, _) = test_app(3).await;
        let info = json!({
            "username": "admin",
            "password": "secret",
            "desired_capacity": 3,
            "backend_ips": ["10.0.0.1"],
            "role": "backend",
            "version": 1,
            "down_backends_removal_timeout_secs": u64::MAX
        });
        let (status, body) = post(&app, "/scale_down", info).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("out of range"));
    }

    #[tokio::test]
    async fn cluster_status_relays_status_and_refuses_other_methods() {
        let (app, _) = test_app(3).await;

        let (status, body) = post(&app, "/cluster_status", json!({"method": "status"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["io_status"], "STOPPED");

        let (status, body) = post(&app, "/cluster_status", json!({"method": "hosts_list"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("hosts_list"));

        let (status, _) = post(&app, "/cluster_status", json!({})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn terminate_rejects_protocol_violations() {
        let (app, _) = test_app(3).await;
        let (status, _) = post(&app, "/terminate", json!({"version": 1, "hosts": []})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let host = json!({
            "instance_id": "0",
            "private_ip": "10.0.0.1",
            "state": "healthy",
            "added_time": "2024-06-01T12:00:00Z",
            "host_id": "HostId<0>"
        });
        let (status, _) = post(&app, "/terminate", json!({"version": 7, "hosts": [host]})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn transient_summarizes_errors() {
        let (app, _) = test_app(3).await;
        let (status, body) = post(&app, "/transient", json!({"version": 1, "instances": []})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("no transient errors"));

        let (_, body) = post(
            &app,
            "/transient",
            json!({"version": 1, "instances": [], "transient_errors": ["terminate: 0: denied"]}),
        )
        .await;
        assert_eq!(body, json!(["terminate: 0: denied"]));
    }

    #[tokio::test]
    async fn protect_parses_vm_reference() {
        let (app, cloud) = test_app(3).await;
        let (status, _) = post(&app, "/protect", json!({"vm": "no-hostname"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post(&app, "/protect", json!({"vm": "cluster-vmss_7:cluster-vm7"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "set");
        assert_eq!(*cloud.calls.lock().unwrap(), vec!["protect 7 true"]);
    }

    #[tokio::test]
    async fn status_defaults_to_sizes() {
        let (app, _) = test_app(3).await;
        let (status, body) = post(&app, "/status", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["data"],
            json!({"initial_size": 3, "desired_size": 3, "clusterized": false})
        );
    }
}
