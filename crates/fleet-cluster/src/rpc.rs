//! JSON-RPC 2.0 client for a single backend's management endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::http::post_json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{RpcError, RpcResult};

const API_PATH: &str = "/api/v1";

/// Anything that can execute a JSON-RPC call.
#[async_trait]
pub trait RpcEndpoint: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> RpcResult<Value>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct LoginResult {
    access_token: String,
}

/// Authenticated client for `http://<address>/api/v1`.
///
/// Logs in lazily on first use and reuses the access token until the
/// backend rejects it.
pub struct JrpcClient {
    address: String,
    username: String,
    password: String,
    timeout: Duration,
    token: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl JrpcClient {
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: password.into(),
            timeout,
            token: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    async fn access_token(&self) -> RpcResult<String> {
        let mut token = self.token.lock().await;
        if let Some(existing) = token.as_ref() {
            return Ok(existing.clone());
        }

        let params = json!({
            "username": self.username,
            "password": self.password,
            "org": "Root",
        });
        let result = self
            .send("user_login", params, None)
            .await
            .map_err(|e| RpcError::Login {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;
        let login: LoginResult =
            serde_json::from_value(result).map_err(|e| RpcError::Login {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;
        debug!(address = %self.address, "logged in to management api");
        *token = Some(login.access_token.clone());
        Ok(login.access_token)
    }

    async fn send(&self, method: &str, params: Value, bearer: Option<&str>) -> RpcResult<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        let resp = post_json(&self.address, API_PATH, bearer, &request, self.timeout)
            .await
            .map_err(|e| RpcError::Transport {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;

        if resp.status.as_u16() == 401 {
            return Err(RpcError::Unauthorized(self.address.clone()));
        }
        if !resp.status.is_success() {
            return Err(RpcError::Transport {
                address: self.address.clone(),
                reason: format!("http {}: {}", resp.status, resp.text()),
            });
        }

        let body: JsonRpcResponse = resp.json().map_err(|e| RpcError::Decode(e.to_string()))?;
        if let Some(err) = body.error {
            return Err(RpcError::Remote {
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl RpcEndpoint for JrpcClient {
    async fn call(&self, method: &str, params: Value) -> RpcResult<Value> {
        let token = self.access_token().await?;
        match self.send(method, params, Some(&token)).await {
            Err(RpcError::Unauthorized(address)) => {
                // Stale token; log in again on the next call.
                *self.token.lock().await = None;
                Err(RpcError::Unauthorized(address))
            }
            other => other,
        }
    }
}
