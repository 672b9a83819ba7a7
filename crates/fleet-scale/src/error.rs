//! Error types for the scaling pipeline.

use fleet_cloud::CloudError;
use fleet_cluster::RpcError;
use fleet_core::ProtocolError;
use fleet_state::StateError;
use thiserror::Error;

pub type ScaleResult<T> = Result<T, ScaleError>;

/// Errors that abort a pipeline stage.
///
/// Per-host failures inside a stage are not errors; they are collected as
/// transient errors and the stage carries on.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The cluster is in a state where scaling must not run.
    #[error("{0}")]
    NotAllowed(String),

    #[error("cluster rpc failed: {0}")]
    Cluster(#[from] RpcError),

    #[error("cloud call failed: {0}")]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("requested cluster size {requested} is below the minimum of {minimum}")]
    BelowMinimum { requested: usize, minimum: usize },

    #[error("malformed instance reference {0:?}, expected <instance-name>:<hostname>")]
    MalformedInstance(String),
}
