//! Persisted cluster state and the views derived from it.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use fleet_core::{Report, ReportType};
use serde::{Deserialize, Serialize};

/// Per-host, append-only message logs keyed by hostname.
pub type ReportLog = BTreeMap<String, Vec<String>>;

/// The single shared state blob of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub initial_size: usize,
    pub desired_size: usize,
    /// Registered `<instance-name>:<hostname>` entries, in registration order.
    #[serde(default)]
    pub instances: Vec<String>,
    #[serde(default)]
    pub clusterized: bool,
    pub clusterization_target: usize,
    #[serde(default)]
    pub progress: ReportLog,
    #[serde(default)]
    pub errors: ReportLog,
    #[serde(default)]
    pub debug: ReportLog,
}

impl ClusterState {
    pub fn new(initial_size: usize, clusterization_target: usize, desired_size: usize) -> Self {
        Self {
            initial_size,
            desired_size,
            instances: Vec::new(),
            clusterized: false,
            clusterization_target,
            progress: ReportLog::new(),
            errors: ReportLog::new(),
            debug: ReportLog::new(),
        }
    }

    /// Append a report to the matching log as `"<RFC3339 UTC>: <message>"`.
    pub fn record_report(&mut self, report: &Report, at: DateTime<Utc>) {
        let log = match report.kind {
            ReportType::Progress => &mut self.progress,
            ReportType::Error => &mut self.errors,
            ReportType::Debug => &mut self.debug,
        };
        let stamp = at.to_rfc3339_opts(SecondsFormat::Secs, true);
        log.entry(report.hostname.clone())
            .or_default()
            .push(format!("{stamp}: {}", report.message));
    }

    pub fn status(&self) -> ClusterStatus {
        ClusterStatus {
            initial_size: self.initial_size,
            desired_size: self.desired_size,
            clusterized: self.clusterized,
        }
    }

    pub fn reports(&self) -> ClusterReports {
        let clusterization_instance = if self.clusterization_target > 0 {
            self.instances
                .get(self.clusterization_target - 1)
                .map(|entry| hostname_of(entry).to_string())
                .unwrap_or_default()
        } else {
            String::new()
        };
        ClusterReports {
            ready_for_clusterization: self.instances.clone(),
            progress: self.progress.clone(),
            errors: self.errors.clone(),
            debug: self.debug.clone(),
            summary: ClusterizationSummary {
                ready_for_clusterization: self.instances.len(),
                clusterization_target: self.clusterization_target,
                clusterized: self.clusterized,
                clusterization_instance,
            },
        }
    }
}

/// Hostname part of a `<instance-name>:<hostname>` registration entry.
pub fn hostname_of(entry: &str) -> &str {
    entry.split_once(':').map(|(_, host)| host).unwrap_or(entry)
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Registration {
    Registered {
        /// 1-based position in registration order.
        position: usize,
        /// This registration brought the count to the clusterization target.
        reached_target: bool,
    },
    /// The caller is redundant and must self-terminate rather than retry.
    ShutdownRequired { reason: String },
}

/// Desired size before and after a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resize {
    pub old: usize,
    pub new: usize,
}

impl Resize {
    pub fn is_growing(&self) -> bool {
        self.new > self.old
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub initial_size: usize,
    pub desired_size: usize,
    pub clusterized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterizationSummary {
    pub ready_for_clusterization: usize,
    pub clusterization_target: usize,
    pub clusterized: bool,
    /// Hostname of the instance whose registration reached the target.
    pub clusterization_instance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterReports {
    pub ready_for_clusterization: Vec<String>,
    pub progress: ReportLog,
    pub errors: ReportLog,
    pub debug: ReportLog,
    pub summary: ClusterizationSummary,
}
