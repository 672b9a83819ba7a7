//! fleet-scale — the decide → terminate pipeline and capacity management.
//!
//! ```text
//! fetch ──▶ HostGroupInfoResponse
//!             │
//!             ▼
//!       scale_down ──▶ ScaleResponse ──▶ terminate ──▶ TerminatedInstancesResponse
//!   (classify, order,                 (protect members,         │
//!    deactivate/remove)                terminate delta)         ▼
//!                                                         transient summary
//! ```
//!
//! Stages exchange versioned records so they can also be invoked one at a
//! time over HTTP. A single scheduler per cluster is assumed to drive the
//! scale-down cycle; registration and reports are serialized separately by
//! the state lease.

pub mod capacity;
pub mod controller;
pub mod error;
pub mod fetch;
pub mod periodic;
pub mod protection;
pub mod scale_down;
pub mod target;
pub mod terminate;
pub mod transient;

#[cfg(test)]
mod fakes;

pub use capacity::{CapacityChange, propagate_capacity, resize};
pub use controller::Controller;
pub use error::{ScaleError, ScaleResult};
pub use fetch::fetch_host_group;
pub use protection::{Protection, set_protection_with_reports};
pub use scale_down::{ScaleDownSettings, scale_down};
pub use target::{MAX_UNHEALTHY_DEACTIVATIONS, calculate_deactivate_target, calculate_deactivate_target_with};
pub use terminate::{TerminateSettings, terminate};
pub use transient::{NO_TRANSIENT_ERRORS, TransientErrors, TransientReport, summarize};
