//! Error types for the cluster management API client.

use thiserror::Error;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("transport error talking to {address}: {reason}")]
    Transport { address: String, reason: String },

    #[error("unauthorized by {0}")]
    Unauthorized(String),

    #[error("login to {address} failed: {reason}")]
    Login { address: String, reason: String },

    /// The backend answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("no backend ips to talk to")]
    NoBackends,

    #[error("all {tried} backends failed, last error: {last}")]
    Exhausted { tried: usize, last: String },
}

impl RpcError {
    /// Whether the pool should try the next backend.
    pub fn is_failover(&self) -> bool {
        matches!(
            self,
            RpcError::Transport { .. } | RpcError::Unauthorized(_) | RpcError::Login { .. }
        )
    }
}
