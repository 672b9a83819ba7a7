//! fleet-core — shared building blocks for the fleet lifecycle controller.
//!
//! - [`types`]: protocol records exchanged between the fetch, scale-down,
//!   terminate and transient stages, all stamped with [`VERSION`].
//! - [`config`]: `fleet.toml` parsing with per-field defaults.
//! - [`retry`]: bounded retry helper shared by lease acquisition and
//!   deletion-protection authorization polling.
//! - [`http`]: minimal JSON-over-HTTP/1 client used at the collaborator
//!   boundaries.

pub mod config;
pub mod http;
pub mod retry;
pub mod types;

pub use config::FleetConfig;
pub use retry::{RetryPolicy, retry};
pub use types::*;
