//! Non-fatal failures collected across a pipeline cycle.

use std::fmt::Display;

use fleet_core::TerminatedInstancesResponse;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ScaleResult;

/// Accumulates per-host failures so one bad host never stalls a cycle.
///
/// Entries read `"<context>: <error>"`, where `context` names the step
/// that failed (`deactivateHost`, `removeDrive`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransientErrors {
    errors: Vec<String>,
}

impl TransientErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, context: &str, err: impl Display) {
        warn!(context, error = %err, "transient error");
        self.errors.push(format!("{context}: {err}"));
    }

    pub fn into_vec(self) -> Vec<String> {
        self.errors
    }
}

impl From<Vec<String>> for TransientErrors {
    fn from(errors: Vec<String>) -> Self {
        Self { errors }
    }
}

/// What `/transient` reports for a terminate result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransientReport {
    Clean(String),
    Errors(Vec<String>),
}

pub const NO_TRANSIENT_ERRORS: &str = "no transient errors";

/// Surface the transient errors of a finished cycle.
pub fn summarize(response: &TerminatedInstancesResponse) -> ScaleResult<TransientReport> {
    response.check_version()?;
    if response.transient_errors.is_empty() {
        return Ok(TransientReport::Clean(NO_TRANSIENT_ERRORS.to_string()));
    }
    Ok(TransientReport::Errors(response.transient_errors.clone()))
}
