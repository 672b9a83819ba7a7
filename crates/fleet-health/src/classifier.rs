//! Per-host health classification.
//!
//! Rules are evaluated in order and the first match wins. The clock is an
//! explicit argument, so the same snapshot and `now` always classify the
//! same way.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use fleet_core::ScaleState;
use serde::{Deserialize, Serialize};

use crate::host::{ContainerRole, HostInfo};

const DEACTIVATING_STATES: &[&str] = &["DEACTIVATING", "REMOVING", "INACTIVE"];
const UNREACHABLE_STATUSES: &[&str] = &["DOWN", "DEGRADED"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// How long a management node may stay DOWN before its host is unhealthy.
    pub unhealthy_deactivate_timeout: Duration,
    /// Grace after a host is added before INACTIVE drives count against it.
    pub drive_settle_window: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            unhealthy_deactivate_timeout: Duration::minutes(120),
            drive_settle_window: Duration::minutes(5),
        }
    }
}

impl Thresholds {
    /// Negative values clamp to zero, values past chrono's range saturate.
    pub fn new(unhealthy_deactivate_timeout_mins: i64, drive_settle_window_mins: i64) -> Self {
        Self {
            unhealthy_deactivate_timeout: saturating_minutes(unhealthy_deactivate_timeout_mins),
            drive_settle_window: saturating_minutes(drive_settle_window_mins),
        }
    }
}

fn saturating_minutes(mins: i64) -> Duration {
    Duration::try_minutes(mins.max(0)).unwrap_or(Duration::MAX)
}

/// The rule that decided a host's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    AllDrivesBeingRemoved,
    LifecycleState,
    ManagementDown,
    UnhealthyDrives,
    Healthy,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rule::AllDrivesBeingRemoved => "all drives being removed",
            Rule::LifecycleState => "lifecycle state",
            Rule::ManagementDown => "management node down",
            Rule::UnhealthyDrives => "unhealthy drives",
            Rule::Healthy => "healthy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub state: ScaleState,
    pub rule: Rule,
}

impl Classification {
    fn new(state: ScaleState, rule: Rule) -> Self {
        Self { state, rule }
    }
}

pub fn classify(host: &HostInfo, now: DateTime<Utc>, thresholds: &Thresholds) -> Classification {
    if host.container_role == ContainerRole::Drive && host.all_drives_being_removed() {
        return Classification::new(ScaleState::Deactivating, Rule::AllDrivesBeingRemoved);
    }
    if host.is_state(DEACTIVATING_STATES) {
        return Classification::new(ScaleState::Deactivating, Rule::LifecycleState);
    }
    if host.is_status(UNREACHABLE_STATUSES)
        && host.management_down_longer_than(now, thresholds.unhealthy_deactivate_timeout)
    {
        return Classification::new(ScaleState::Unhealthy, Rule::ManagementDown);
    }
    if host.unhealthy_drive_count(now, thresholds.drive_settle_window) > 0
        || host.any_drive_being_removed()
    {
        return Classification::new(ScaleState::Unhealthy, Rule::UnhealthyDrives);
    }
    Classification::new(ScaleState::Healthy, Rule::Healthy)
}

/// Classify every host in place, returning the decisions in input order.
pub fn classify_hosts(
    hosts: &mut [HostInfo],
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> Vec<Classification> {
    hosts
        .iter_mut()
        .map(|host| {
            let decision = classify(host, now, thresholds);
            host.scale_state = decision.state;
            decision
        })
        .collect()
}
