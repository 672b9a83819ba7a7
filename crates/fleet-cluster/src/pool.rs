//! Fail-over pool of management endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{RpcError, RpcResult};
use crate::rpc::RpcEndpoint;

/// Builds an endpoint for a backend IP.
pub type EndpointBuilder = Arc<dyn Fn(&str) -> Arc<dyn RpcEndpoint> + Send + Sync>;

struct PoolState {
    ips: Vec<String>,
    clients: HashMap<String, Arc<dyn RpcEndpoint>>,
    active: Option<String>,
}

/// Calls the management API through whichever backend answers.
///
/// The active backend is tried first; on a transport-level failure the
/// remaining IPs are tried in pool order and the first one that answers
/// becomes active. JSON-RPC error replies are returned as-is.
pub struct RpcPool {
    builder: EndpointBuilder,
    state: Mutex<PoolState>,
}

impl RpcPool {
    /// `ips` are used in the given order; callers shuffle beforehand.
    pub fn new(ips: Vec<String>, builder: EndpointBuilder) -> Self {
        Self {
            builder,
            state: Mutex::new(PoolState {
                ips,
                clients: HashMap::new(),
                active: None,
            }),
        }
    }

    /// Stop using a backend (e.g. one that is being deactivated).
    pub async fn drop_backend(&self, ip: &str) {
        let mut state = self.state.lock().await;
        state.ips.retain(|candidate| candidate != ip);
        state.clients.remove(ip);
        if state.active.as_deref() == Some(ip) {
            state.active = None;
        }
        debug!(ip, remaining = state.ips.len(), "backend dropped from rpc pool");
    }

    /// Ordered candidates for the next call: active first, then the rest.
    async fn candidates(&self) -> Vec<(String, Arc<dyn RpcEndpoint>)> {
        let mut state = self.state.lock().await;
        let mut order: Vec<String> = Vec::with_capacity(state.ips.len());
        if let Some(active) = state.active.clone() {
            order.push(active);
        }
        for ip in &state.ips {
            if state.active.as_deref() != Some(ip.as_str()) {
                order.push(ip.clone());
            }
        }

        let mut out = Vec::with_capacity(order.len());
        for ip in order {
            let client = state
                .clients
                .entry(ip.clone())
                .or_insert_with(|| (self.builder)(&ip))
                .clone();
            out.push((ip, client));
        }
        out
    }

    pub async fn call_raw(&self, method: &str, params: Value) -> RpcResult<Value> {
        let candidates = self.candidates().await;
        if candidates.is_empty() {
            return Err(RpcError::NoBackends);
        }

        let tried = candidates.len();
        let mut last = None;
        for (ip, client) in candidates {
            match client.call(method, params.clone()).await {
                Ok(value) => {
                    let mut state = self.state.lock().await;
                    if state.active.as_deref() != Some(ip.as_str()) {
                        debug!(%ip, method, "rpc pool switched active backend");
                        state.active = Some(ip);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_failover() => {
                    warn!(%ip, method, error = %e, "backend failed, trying next");
                    let mut state = self.state.lock().await;
                    if state.active.as_deref() == Some(ip.as_str()) {
                        state.active = None;
                    }
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(RpcError::Exhausted {
            tried,
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    /// Typed call: serialize `params`, decode the result into `T`.
    pub async fn call<P, T>(&self, method: &str, params: &P) -> RpcResult<T>
    where
        P: Serialize + Sync,
        T: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|e| RpcError::Decode(e.to_string()))?;
        let value = self.call_raw(method, params).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Decode(format!("{method}: {e}")))
    }
}
