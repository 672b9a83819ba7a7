//! Deletion protection with authorization retries and state reports.
//!
//! Right after an instance is created, the role assignment that lets the
//! controller protect it may not have propagated yet. Authorization
//! failures are retried within a caller-supplied budget; every step is
//! reported into the instance's log in the cluster state.

use std::sync::atomic::{AtomicU32, Ordering};

use fleet_cloud::{CloudError, ScaleSetApi};
use fleet_core::{Report, ReportType, RetryPolicy, retry};
use fleet_state::ClusterStateStore;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ScaleResult;

pub const PROTECTION_SET: &str = "Deletion protection was set successfully";
pub const PROTECTION_DEFERRED: &str =
    "Deletion protection set authorization isn't ready, will retry on next scale down workflow";

/// Result of a protection attempt that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protection {
    Set,
    /// Authorization not ready and no retry budget; the next cycle tries again.
    Deferred,
}

async fn report(store: &ClusterStateStore, kind: ReportType, hostname: &str, message: String) {
    let report = Report::new(kind, hostname, message);
    if let Err(e) = store.append_report(&report).await {
        warn!(hostname, error = %e, "failed to append report");
    }
}

/// Protect `instance_id` from scale-in, retrying on authorization errors.
///
/// With `policy.max_retries == 0` an authorization failure is reported and
/// returned as [`Protection::Deferred`]. Any other final failure is reported
/// as an error and returned.
pub async fn set_protection_with_reports(
    cloud: &dyn ScaleSetApi,
    store: &ClusterStateStore,
    instance_id: &str,
    hostname: &str,
    policy: RetryPolicy,
) -> ScaleResult<Protection> {
    info!(instance_id, hostname, "setting deletion protection");
    let counter = AtomicU32::new(0);
    let attempts = &counter;

    let result = retry(
        policy,
        CloudError::is_authorization_failed,
        |attempt, _| debug!(instance_id, attempt, "protection authorization not ready"),
        || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            match cloud.set_deletion_protection(instance_id, true).await {
                Err(e) if e.is_authorization_failed() && attempt < policy.max_retries => {
                    let message = format!(
                        "Deletion protection set authorization isn't ready, going to sleep for {:?}",
                        policy.backoff
                    );
                    report(store, ReportType::Debug, hostname, message).await;
                    Err(e)
                }
                other => other,
            }
        },
    )
    .await;

    match result {
        Ok(()) => {
            info!(instance_id, "deletion protection set");
            report(store, ReportType::Progress, hostname, PROTECTION_SET.to_string()).await;
            Ok(Protection::Set)
        }
        Err(e) if e.is_authorization_failed() && policy.max_retries == 0 => {
            info!(instance_id, "protection authorization not ready, deferring");
            report(store, ReportType::Debug, hostname, PROTECTION_DEFERRED.to_string()).await;
            Ok(Protection::Deferred)
        }
        Err(e) => {
            warn!(instance_id, error = %e, "failed to set deletion protection");
            report(store, ReportType::Error, hostname, e.to_string()).await;
            Err(e.into())
        }
    }
}
