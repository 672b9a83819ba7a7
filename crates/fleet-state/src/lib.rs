//! fleet-state — lease-coordinated cluster state store.
//!
//! A single JSON blob per cluster holds the bootstrap registrations, sizing,
//! the clusterized flag, and per-host report logs. Writers run in independent
//! processes, so every read-modify-write happens under a time-boxed lease.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐  lock / read / write / unlock  ┌──────────────────┐
//! │ ClusterStateStore  │ ─────────────────────────────▶ │  StateBackend    │
//! │  registration      │                                │  (RedbBackend)   │
//! │  clusterize        │                                │   blobs  table   │
//! │  reports / resize  │                                │   leases table   │
//! └────────────────────┘                                └──────────────────┘
//! ```
//!
//! The lease is always released through [`ClusterStateStore::update`], on
//! every exit path, including failures inside the mutation.

pub mod backend;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use backend::{LeaseId, RedbBackend, StateBackend};
pub use error::{StateError, StateResult};
pub use store::{ClusterStateStore, Mutation};
pub use types::*;
