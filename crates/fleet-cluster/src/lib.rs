//! fleet-cluster — boundary to the storage cluster's management API.
//!
//! The management API is JSON-RPC 2.0 over HTTP on a fixed port of every
//! backend. Calls go through an [`RpcPool`] that walks the backend IPs in
//! randomized order, caches the last working connection, and fails over to
//! the next IP on transport errors.
//!
//! ```text
//! ClusterConnector ──▶ RpcPool ──▶ JrpcClient(ip₁) ─┐
//!   (per cycle)        (ClusterApi)  JrpcClient(ip₂) ─┼─▶ POST /api/v1
//!                                    JrpcClient(ipₙ) ─┘
//! ```

pub mod api;
pub mod error;
pub mod inventory;
pub mod pool;
pub mod rpc;

pub use api::{ClusterApi, ClusterConnector, RpcConnector};
pub use error::{RpcError, RpcResult};
pub use inventory::*;
pub use pool::RpcPool;
pub use rpc::{JrpcClient, RpcEndpoint};
