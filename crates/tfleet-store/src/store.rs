use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// A held lock on a state object's sidecar `<key>.lock` object.
///
/// Dropping this handle does not release the lock — call [`StateStoreClient::release`]
/// explicitly. Release is idempotent.
#[derive(Debug, Clone)]
pub struct LockHandle {
    pub key: String,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// Object-store operations consumed by the Unit Executor and Audit Logger.
///
/// One lock per `state_key`; two units with different keys never contend.
#[async_trait]
pub trait StateStoreClient: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, bytes: &[u8], encrypt: bool) -> Result<(), StoreError>;

    /// Server-side copy; O(1) with respect to object size from the caller's perspective.
    async fn copy(&self, src_key: &str, dst_key: &str, encrypt: bool) -> Result<(), StoreError>;

    async fn list_versions(&self, key: &str) -> Result<Vec<(String, DateTime<Utc>)>, StoreError>;

    /// Acquire the sidecar lock via conditional-create semantics. Returns
    /// `StoreError::LockBusy` if another owner currently holds it.
    async fn acquire_lock(
        &self,
        key: &str,
        owner_id: &str,
        ttl: std::time::Duration,
    ) -> Result<LockHandle, StoreError>;

    /// Idempotent: releasing an already-released or expired lock is not an error.
    async fn release(&self, handle: LockHandle) -> Result<(), StoreError>;
}
