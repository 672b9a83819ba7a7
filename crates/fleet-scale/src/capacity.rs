//! Scale set capacity: propagation of the desired size, and resize.
//!
//! Capacity is only ever raised here. Scale-in happens through the
//! scale-down and terminate stages, which pick the instances to remove.

use fleet_cloud::ScaleSetApi;
use fleet_state::{ClusterStateStore, Resize};
use serde::Serialize;
use tracing::info;

use crate::error::{ScaleError, ScaleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CapacityChange {
    NotClusterized,
    Unchanged { capacity: usize },
    Raised { from: usize, to: usize },
}

async fn raise_capacity(cloud: &dyn ScaleSetApi, desired: usize) -> ScaleResult<CapacityChange> {
    let current = cloud.capacity().await?;
    if current >= desired {
        return Ok(CapacityChange::Unchanged { capacity: current });
    }
    cloud.set_capacity(desired).await?;
    info!(from = current, to = desired, "scale set capacity raised");
    Ok(CapacityChange::Raised { from: current, to: desired })
}

/// Raise the scale set capacity to the desired size once clusterized.
pub async fn propagate_capacity(
    cloud: &dyn ScaleSetApi,
    store: &ClusterStateStore,
) -> ScaleResult<CapacityChange> {
    let state = store.read().await?;
    if !state.clusterized {
        return Ok(CapacityChange::NotClusterized);
    }
    raise_capacity(cloud, state.desired_size).await
}

/// Persist a new desired size and grow the scale set right away if needed.
pub async fn resize(
    cloud: &dyn ScaleSetApi,
    store: &ClusterStateStore,
    requested: usize,
    min_cluster_size: usize,
) -> ScaleResult<Resize> {
    if requested < min_cluster_size {
        return Err(ScaleError::BelowMinimum {
            requested,
            minimum: min_cluster_size,
        });
    }
    let resize = store.set_desired_size(requested).await?;
    if resize.is_growing() {
        raise_capacity(cloud, resize.new).await?;
    }
    Ok(resize)
}
