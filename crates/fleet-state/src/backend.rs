//! Storage backends for the state blob and its lease.
//!
//! The lease is a time-boxed exclusive token on a resource. Acquiring it
//! fails fast with [`StateError::LeaseHeld`] while another holder's lease is
//! live; an expired lease can be taken over. Blob writes are rejected unless
//! the caller presents the live lease.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Opaque lease token returned by [`StateBackend::acquire_lease`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseId(pub String);

impl LeaseId {
    fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared storage holding one blob per resource plus its lease.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Take the lease, or fail with `LeaseHeld` if a live lease exists.
    async fn acquire_lease(&self, resource: &str, duration: Duration) -> StateResult<LeaseId>;

    /// Release a lease previously returned by `acquire_lease`.
    async fn release_lease(&self, resource: &str, lease: &LeaseId) -> StateResult<()>;

    async fn read_blob(&self, resource: &str) -> StateResult<Option<Vec<u8>>>;

    /// Overwrite the blob. Requires the caller to hold the live lease.
    async fn write_blob(&self, resource: &str, lease: &LeaseId, value: &[u8]) -> StateResult<()>;

    /// Create the blob unless it already exists. Returns true if created.
    async fn create_blob_if_absent(&self, resource: &str, value: &[u8]) -> StateResult<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    lease_id: LeaseId,
    expires_at_ms: i64,
}

impl LeaseRecord {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms > now_ms
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// redb-backed [`StateBackend`].
///
/// Lease check-and-set happens inside a single write transaction, and redb
/// serializes write transactions, so two acquirers can never both succeed.
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open (or create) a persistent backend at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let backend = Self { db: Arc::new(db) };
        backend.ensure_tables()?;
        debug!(?path, "state backend opened");
        Ok(backend)
    }

    /// Create an ephemeral in-memory backend (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(map_err!(Open))?;
        let backend = Self { db: Arc::new(db) };
        backend.ensure_tables()?;
        debug!("in-memory state backend opened");
        Ok(backend)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(BLOBS).map_err(map_err!(Table))?;
        txn.open_table(LEASES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn lease_of(table: &impl ReadableTable<&'static str, &'static [u8]>, resource: &str) -> StateResult<Option<LeaseRecord>> {
        match table.get(resource).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: LeaseRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl StateBackend for RedbBackend {
    async fn acquire_lease(&self, resource: &str, duration: Duration) -> StateResult<LeaseId> {
        let now = now_ms();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let lease_id;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            if let Some(existing) = Self::lease_of(&table, resource)? {
                if existing.is_live(now) {
                    return Err(StateError::LeaseHeld(resource.to_string()));
                }
                debug!(resource, lease_id = %existing.lease_id, "taking over expired lease");
            }
            let record = LeaseRecord {
                lease_id: LeaseId::generate(),
                expires_at_ms: now + duration.as_millis() as i64,
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(resource, value.as_slice())
                .map_err(map_err!(Write))?;
            lease_id = record.lease_id;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(resource, %lease_id, "lease acquired");
        Ok(lease_id)
    }

    async fn release_lease(&self, resource: &str, lease: &LeaseId) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            match Self::lease_of(&table, resource)? {
                Some(existing) if existing.lease_id == *lease => {
                    table.remove(resource).map_err(map_err!(Write))?;
                }
                _ => return Err(StateError::LeaseMismatch(resource.to_string())),
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(resource, lease_id = %lease, "lease released");
        Ok(())
    }

    async fn read_blob(&self, resource: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
        Ok(table
            .get(resource)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec()))
    }

    async fn write_blob(&self, resource: &str, lease: &LeaseId, value: &[u8]) -> StateResult<()> {
        let now = now_ms();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let leases = txn.open_table(LEASES).map_err(map_err!(Table))?;
            match Self::lease_of(&leases, resource)? {
                Some(existing) if existing.lease_id == *lease && existing.is_live(now) => {}
                _ => return Err(StateError::LeaseMismatch(resource.to_string())),
            }
        }
        {
            let mut blobs = txn.open_table(BLOBS).map_err(map_err!(Table))?;
            blobs.insert(resource, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(resource, bytes = value.len(), "state blob written");
        Ok(())
    }

    async fn create_blob_if_absent(&self, resource: &str, value: &[u8]) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let created;
        {
            let mut blobs = txn.open_table(BLOBS).map_err(map_err!(Table))?;
            created = blobs.get(resource).map_err(map_err!(Read))?.is_none();
            if created {
                blobs.insert(resource, value).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(resource, created, "state blob seeded");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOURCE: &str = "state";

    #[tokio::test]
    async fn test_second_acquire_is_rejected_while_live() {
        let backend = RedbBackend::open_in_memory().unwrap();
        let lease = backend
            .acquire_lease(RESOURCE, Duration::from_secs(60))
            .await
            .unwrap();

        let err = backend
            .acquire_lease(RESOURCE, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::LeaseHeld(_)));

        backend.release_lease(RESOURCE, &lease).await.unwrap();
        backend
            .acquire_lease(RESOURCE, Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let backend = RedbBackend::open_in_memory().unwrap();
        let stale = backend.acquire_lease(RESOURCE, Duration::ZERO).await.unwrap();
        let fresh = backend
            .acquire_lease(RESOURCE, Duration::from_secs(60))
            .await
            .unwrap();
        assert_ne!(stale, fresh);

        let err = backend.release_lease(RESOURCE, &stale).await.unwrap_err();
        assert!(matches!(err, StateError::LeaseMismatch(_)));
    }

    #[tokio::test]
    async fn test_write_requires_live_lease() {
        let backend = RedbBackend::open_in_memory().unwrap();
        backend.create_blob_if_absent(RESOURCE, b"{}").await.unwrap();

        let bogus = LeaseId("nope".to_string());
        let err = backend.write_blob(RESOURCE, &bogus, b"[]").await.unwrap_err();
        assert!(matches!(err, StateError::LeaseMismatch(_)));

        let lease = backend
            .acquire_lease(RESOURCE, Duration::from_secs(60))
            .await
            .unwrap();
        backend.write_blob(RESOURCE, &lease, b"[]").await.unwrap();
        assert_eq!(backend.read_blob(RESOURCE).await.unwrap().unwrap(), b"[]");
    }

    #[tokio::test]
    async fn test_create_if_absent_keeps_existing_blob() {
        let backend = RedbBackend::open_in_memory().unwrap();
        assert!(backend.read_blob(RESOURCE).await.unwrap().is_none());
        assert!(backend.create_blob_if_absent(RESOURCE, b"first").await.unwrap());
        assert!(!backend.create_blob_if_absent(RESOURCE, b"second").await.unwrap());
        assert_eq!(backend.read_blob(RESOURCE).await.unwrap().unwrap(), b"first");
    }
}
