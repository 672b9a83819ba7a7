//! Raw platform VM view and its neutral summary.

use chrono::{DateTime, Utc};
use fleet_core::InstanceId;
use serde::{Deserialize, Serialize};

/// One status entry of a VM's instance view (`PowerState/running`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceViewStatus {
    pub code: String,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// Scale set VM as listed by the platform with `expand=instanceView`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSetVm {
    pub instance_id: InstanceId,
    pub name: String,
    #[serde(default)]
    pub computer_name: Option<String>,
    #[serde(default)]
    pub protect_from_scale_set_actions: Option<bool>,
    #[serde(default)]
    pub statuses: Vec<InstanceViewStatus>,
    /// Application health extension status (`HealthState/unhealthy`).
    #[serde(default)]
    pub health_code: Option<String>,
}

/// Primary network interface of a scale set VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryNic {
    pub instance_id: InstanceId,
    pub private_ip: String,
}

/// Platform-neutral view of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub instance_id: InstanceId,
    pub name: String,
    pub computer_name: Option<String>,
    pub private_ip: Option<String>,
    /// `running`, `starting`, `stopped`, `deallocated`, ...
    pub power_state: Option<String>,
    /// `healthy` / `unhealthy`, when a health probe is configured.
    pub health: Option<String>,
    /// When provisioning succeeded.
    pub created_at: Option<DateTime<Utc>>,
    pub protected: bool,
}

impl InstanceSummary {
    pub fn from_vm(vm: &ScaleSetVm, private_ip: Option<String>) -> Self {
        let status_suffix = |prefix: &str| {
            vm.statuses
                .iter()
                .find_map(|s| s.code.strip_prefix(prefix).map(str::to_string))
        };
        let created_at = vm
            .statuses
            .iter()
            .find(|s| s.code == "ProvisioningState/succeeded")
            .and_then(|s| s.time);

        Self {
            instance_id: vm.instance_id.clone(),
            name: vm.name.clone(),
            computer_name: vm.computer_name.clone(),
            private_ip,
            power_state: status_suffix("PowerState/"),
            health: vm
                .health_code
                .as_deref()
                .map(|code| code.strip_prefix("HealthState/").unwrap_or(code).to_string()),
            created_at,
            protected: vm.protect_from_scale_set_actions.unwrap_or(false),
        }
    }

    pub fn is_running_or_starting(&self) -> bool {
        matches!(self.power_state.as_deref(), Some("running" | "starting"))
    }

    /// Reported unhealthy by the platform and already stopped.
    pub fn is_unhealthy_and_stopped(&self) -> bool {
        self.health.as_deref() == Some("unhealthy") && self.power_state.as_deref() == Some("stopped")
    }
}
