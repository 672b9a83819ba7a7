//! ClusterStateStore — lease-guarded read-modify-write over the state blob.
//!
//! `lock` retries only on lease contention, with a fixed backoff and a
//! bounded number of attempts. Mutations go through [`ClusterStateStore::update`],
//! which releases the lease on every exit path and reports the mutation's
//! own outcome in preference to an unlock error. A failed unlock after a
//! committed write is only logged: the lease expires on its own.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_core::{Report, RetryPolicy, retry};
use tracing::{debug, error, info, warn};

use crate::backend::{LeaseId, StateBackend};
use crate::error::{StateError, StateResult};
use crate::types::*;

/// Whether a mutation's changes should be written back.
#[derive(Debug)]
pub enum Mutation<T> {
    Persist(T),
    Discard(T),
}

/// Shared handle to one cluster's state blob.
#[derive(Clone)]
pub struct ClusterStateStore {
    backend: Arc<dyn StateBackend>,
    resource: String,
    lease_duration: Duration,
    lease_retry: RetryPolicy,
}

impl ClusterStateStore {
    pub fn new(backend: Arc<dyn StateBackend>, resource: impl Into<String>) -> Self {
        Self {
            backend,
            resource: resource.into(),
            lease_duration: Duration::from_secs(60),
            lease_retry: RetryPolicy::new(1000, Duration::from_secs(1)),
        }
    }

    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    pub fn with_lease_retry(mut self, policy: RetryPolicy) -> Self {
        self.lease_retry = policy;
        self
    }

    // ── Primitives ─────────────────────────────────────────────────

    /// Acquire the lease, waiting out other holders within the retry budget.
    pub async fn lock(&self) -> StateResult<LeaseId> {
        let resource = self.resource.as_str();
        let result = retry(
            self.lease_retry,
            |e: &StateError| matches!(e, StateError::LeaseHeld(_)),
            |attempt, _| debug!(resource, attempt, "lease held, retrying"),
            || self.backend.acquire_lease(resource, self.lease_duration),
        )
        .await;

        match result {
            Err(StateError::LeaseHeld(_)) => Err(StateError::LeaseExhausted {
                resource: self.resource.clone(),
                attempts: self.lease_retry.max_retries + 1,
            }),
            other => other,
        }
    }

    pub async fn unlock(&self, lease: &LeaseId) -> StateResult<()> {
        self.backend.release_lease(&self.resource, lease).await
    }

    pub async fn read(&self) -> StateResult<ClusterState> {
        let bytes = self
            .backend
            .read_blob(&self.resource)
            .await?
            .ok_or_else(|| StateError::NotInitialized(self.resource.clone()))?;
        serde_json::from_slice(&bytes).map_err(|e| StateError::Deserialize(e.to_string()))
    }

    pub async fn write(&self, lease: &LeaseId, state: &ClusterState) -> StateResult<()> {
        let bytes = serde_json::to_vec(state).map_err(|e| StateError::Serialize(e.to_string()))?;
        self.backend.write_blob(&self.resource, lease, &bytes).await
    }

    /// Create the blob from `seed` if it does not exist. Returns true if created.
    pub async fn init_if_absent(&self, seed: &ClusterState) -> StateResult<bool> {
        let bytes = serde_json::to_vec(seed).map_err(|e| StateError::Serialize(e.to_string()))?;
        let created = self.backend.create_blob_if_absent(&self.resource, &bytes).await?;
        if created {
            info!(
                resource = %self.resource,
                initial_size = seed.initial_size,
                clusterization_target = seed.clusterization_target,
                "cluster state seeded"
            );
        }
        Ok(created)
    }

    /// Lock, read, apply `f`, write if asked to, and always unlock.
    pub async fn update<T, F>(&self, f: F) -> StateResult<T>
    where
        F: FnOnce(&mut ClusterState) -> StateResult<Mutation<T>>,
    {
        let lease = self.lock().await?;
        let result = self.apply_locked(&lease, f).await;
        let unlocked = self.unlock(&lease).await;

        match (result, unlocked) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(value), Err(unlock_err)) => {
                warn!(resource = %self.resource, error = %unlock_err, "unlocking state failed after commit, lease will expire");
                Ok(value)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(unlock_err)) => {
                error!(resource = %self.resource, error = %unlock_err, "unlocking state failed");
                Err(e)
            }
        }
    }

    async fn apply_locked<T, F>(&self, lease: &LeaseId, f: F) -> StateResult<T>
    where
        F: FnOnce(&mut ClusterState) -> StateResult<Mutation<T>>,
    {
        let mut state = self.read().await?;
        match f(&mut state)? {
            Mutation::Persist(value) => {
                self.write(lease, &state).await?;
                Ok(value)
            }
            Mutation::Discard(value) => Ok(value),
        }
    }

    // ── Operations ─────────────────────────────────────────────────

    /// Register a newly booted instance for bootstrap.
    ///
    /// Returns `ShutdownRequired` (not an error) when the initial size is
    /// already satisfied or the cluster has already been formed.
    pub async fn add_instance_to_state(&self, instance: &str) -> StateResult<Registration> {
        let registration = self
            .update(|state| {
                if state.instances.len() >= state.initial_size {
                    return Ok(Mutation::Discard(Registration::ShutdownRequired {
                        reason: "cluster size is already satisfied".to_string(),
                    }));
                }
                if state.clusterized {
                    return Ok(Mutation::Discard(Registration::ShutdownRequired {
                        reason: "cluster is already clusterized".to_string(),
                    }));
                }
                state.instances.push(instance.to_string());
                let position = state.instances.len();
                Ok(Mutation::Persist(Registration::Registered {
                    position,
                    reached_target: position == state.clusterization_target,
                }))
            })
            .await?;

        match &registration {
            Registration::Registered { position, reached_target } => {
                info!(instance, position, reached_target, "instance registered")
            }
            Registration::ShutdownRequired { reason } => {
                info!(instance, %reason, "instance registration refused")
            }
        }
        Ok(registration)
    }

    /// One-way transition to the formed cluster. Idempotent.
    pub async fn commit_clusterized(&self) -> StateResult<ClusterState> {
        let state = self
            .update(|state| {
                state.instances.clear();
                state.clusterized = true;
                Ok(Mutation::Persist(state.clone()))
            })
            .await?;
        info!(resource = %self.resource, "cluster marked clusterized");
        Ok(state)
    }

    pub async fn append_report(&self, report: &Report) -> StateResult<()> {
        let now = Utc::now();
        self.update(|state| {
            state.record_report(report, now);
            Ok(Mutation::Persist(()))
        })
        .await
    }

    /// Persist a new desired size. Only valid once clusterized.
    pub async fn set_desired_size(&self, desired: usize) -> StateResult<Resize> {
        let resize = self
            .update(|state| {
                if !state.clusterized {
                    return Err(StateError::NotClusterized);
                }
                let resize = Resize {
                    old: state.desired_size,
                    new: desired,
                };
                state.desired_size = desired;
                Ok(Mutation::Persist(resize))
            })
            .await?;
        info!(old = resize.old, new = resize.new, "desired size updated");
        Ok(resize)
    }
}
