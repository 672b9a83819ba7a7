//! fleet-health — per-host health classification.
//!
//! Every scale-down cycle rebuilds [`HostInfo`] values from a fresh
//! inventory snapshot and grades each one as Healthy, Unhealthy or
//! Deactivating. Classification is a pure function of the snapshot and an
//! explicit `now`, so identical inputs always produce identical grades.
//!
//! Rules, first match wins:
//!
//! 1. drive container whose drives are all being removed → Deactivating
//! 2. lifecycle DEACTIVATING / REMOVING / INACTIVE → Deactivating
//! 3. DOWN or DEGRADED with a management node down past the timeout → Unhealthy
//! 4. a drive INACTIVE past the settle window, or any drive being removed → Unhealthy
//! 5. otherwise → Healthy

pub mod classifier;
pub mod host;

pub use classifier::{Classification, Rule, Thresholds, classify, classify_hosts};
pub use fleet_core::ScaleState;
pub use host::{ContainerRole, Drive, HostInfo, Node, build_hosts};
