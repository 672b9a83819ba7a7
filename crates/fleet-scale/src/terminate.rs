//! Termination reconciler.
//!
//! Reconciles a scale-down decision against the live scale set:
//!
//! 1. terminate instances the platform reports unhealthy and stopped
//! 2. delta = instances whose IP is not an accepted host, plus explicit removals
//! 3. protect every other instance from scale-in (zero retry budget)
//! 4. terminate delta instances that are explicit, or old enough and running
//!
//! Protection always happens before any delta instance is terminated.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use fleet_cloud::{CloudResult, InstanceSummary, ScaleSetApi};
use fleet_core::config::ScaleConfig;
use fleet_core::{RetryPolicy, ScaleResponse, TerminatedInstance, TerminatedInstancesResponse};
use fleet_state::ClusterStateStore;
use tracing::{debug, info};

use crate::error::ScaleResult;
use crate::protection::set_protection_with_reports;
use crate::transient::TransientErrors;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminateSettings {
    /// Minimum age before an instance that is not explicitly listed may go.
    pub grace_period: Duration,
}

impl Default for TerminateSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::minutes(30),
        }
    }
}

impl From<&ScaleConfig> for TerminateSettings {
    fn from(config: &ScaleConfig) -> Self {
        Self {
            grace_period: Duration::try_seconds(config.termination_grace_secs.max(0)).unwrap_or(Duration::MAX),
        }
    }
}

/// Clear protection, then force-delete.
async fn terminate_instance(cloud: &dyn ScaleSetApi, instance: &InstanceSummary) -> CloudResult<()> {
    cloud.set_deletion_protection(&instance.instance_id, false).await?;
    cloud.delete_instance(&instance.instance_id, true).await
}

fn terminated(instance: &InstanceSummary) -> TerminatedInstance {
    TerminatedInstance {
        instance_id: instance.instance_id.clone(),
        creation: instance.created_at,
    }
}

/// Why a delta instance is kept this cycle, if it is.
fn hold_reason(
    instance: &InstanceSummary,
    explicit: bool,
    now: DateTime<Utc>,
    grace: Duration,
) -> Option<&'static str> {
    if explicit {
        return None;
    }
    match instance.created_at {
        None => Some("creation time unknown, too new to judge"),
        Some(created) if now - created < grace => Some("inside grace period"),
        Some(_) if !instance.is_running_or_starting() => Some("not running"),
        Some(_) => None,
    }
}

pub async fn terminate(
    cloud: &dyn ScaleSetApi,
    store: &ClusterStateStore,
    scale: &ScaleResponse,
    settings: &TerminateSettings,
    now: DateTime<Utc>,
) -> ScaleResult<TerminatedInstancesResponse> {
    scale.validate()?;

    let mut errors = TransientErrors::from(scale.transient_errors.clone());
    let mut response = TerminatedInstancesResponse::default();
    let instances = cloud.list_instances().await?;
    info!(instances = instances.len(), explicit = scale.to_terminate.len(), "reconciling scale set");

    let mut unhealthy: HashSet<&str> = HashSet::new();
    for instance in instances.iter().filter(|i| i.is_unhealthy_and_stopped()) {
        unhealthy.insert(instance.instance_id.as_str());
        info!(instance_id = %instance.instance_id, "terminating unhealthy stopped instance");
        match terminate_instance(cloud, instance).await {
            Ok(()) => response.instances.push(terminated(instance)),
            Err(e) => errors.add("terminateUnhealthy", format!("{}: {e}", instance.instance_id)),
        }
    }

    let accepted: HashSet<&str> = scale.hosts.iter().map(|h| h.private_ip.as_str()).collect();
    let explicit: HashSet<&str> = scale.to_terminate.iter().map(|i| i.id.as_str()).collect();
    let (delta, keep): (Vec<&InstanceSummary>, Vec<&InstanceSummary>) = instances
        .iter()
        .filter(|i| !unhealthy.contains(i.instance_id.as_str()))
        .partition(|i| {
            explicit.contains(i.instance_id.as_str())
                || i.private_ip
                    .as_deref()
                    .is_some_and(|ip| !accepted.contains(ip))
        });
    debug!(delta = delta.len(), keep = keep.len(), "delta computed");

    for instance in keep {
        if instance.protected {
            continue;
        }
        let Some(hostname) = instance.computer_name.as_deref() else {
            continue;
        };
        if let Err(e) =
            set_protection_with_reports(cloud, store, &instance.instance_id, hostname, RetryPolicy::once()).await
        {
            errors.add("setDeletionProtection", format!("{}: {e}", instance.instance_id));
        }
    }

    for instance in delta {
        let is_explicit = explicit.contains(instance.instance_id.as_str());
        if let Some(reason) = hold_reason(instance, is_explicit, now, settings.grace_period) {
            info!(instance_id = %instance.instance_id, reason, "keeping delta instance for now");
            continue;
        }
        info!(instance_id = %instance.instance_id, explicit = is_explicit, "terminating instance");
        match terminate_instance(cloud, instance).await {
            Ok(()) => response.instances.push(terminated(instance)),
            Err(e) => errors.add("terminate", format!("{}: {e}", instance.instance_id)),
        }
    }

    response.transient_errors = errors.into_vec();
    Ok(response)
}
