//! fleet-cloud — boundary to the cloud platform's VM scale set.
//!
//! The core never sees platform SDK types. [`ScaleSetApi`] speaks in
//! [`InstanceSummary`] values, produced by [`InstanceSummary::from_vm`] from
//! the platform's raw VM view at this boundary.

pub mod error;
pub mod gateway;
pub mod instance;

pub use error::{CloudError, CloudResult};
pub use gateway::GatewayClient;
pub use instance::{InstanceSummary, InstanceViewStatus, PrimaryNic, ScaleSetVm};

use async_trait::async_trait;

/// Operations on one scale set.
#[async_trait]
pub trait ScaleSetApi: Send + Sync {
    /// All instances with instance view, joined with their primary NIC IPs.
    async fn list_instances(&self) -> CloudResult<Vec<InstanceSummary>>;

    /// Toggle protection from scale-set-initiated removal.
    async fn set_deletion_protection(&self, instance_id: &str, protect: bool) -> CloudResult<()>;

    async fn delete_instance(&self, instance_id: &str, force: bool) -> CloudResult<()>;

    async fn capacity(&self) -> CloudResult<usize>;

    async fn set_capacity(&self, capacity: usize) -> CloudResult<()>;
}
