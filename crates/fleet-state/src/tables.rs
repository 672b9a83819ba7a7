//! redb table definitions for the cluster state store.
//!
//! Both tables are keyed by resource name (one resource per cluster).

use redb::TableDefinition;

/// JSON-serialized `ClusterState` blobs.
pub const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");

/// JSON-serialized `LeaseRecord`s guarding the blobs.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");
