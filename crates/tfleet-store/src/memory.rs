use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{LockHandle, StateStoreClient};

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    versions: Vec<(String, DateTime<Utc>)>,
}

#[derive(Debug, Clone)]
struct HeldLock {
    owner_id: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<String, Entry>,
    locks: HashMap<String, HeldLock>,
}

/// In-memory implementation of [`StateStoreClient`], for tests.
///
/// All data is lost on process exit. Locks expire by wall-clock TTL checked on
/// every [`acquire_lock`](StateStoreClient::acquire_lock) call, rather than a
/// conditional-write against a real object store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateStoreClient {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStateStoreClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStoreClient for InMemoryStateStoreClient {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.objects.get(key).map(|e| e.bytes.clone()))
    }

    async fn put(&self, key: &str, bytes: &[u8], _encrypt: bool) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let version_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let entry = guard.objects.entry(key.to_string()).or_insert_with(|| Entry {
            bytes: Vec::new(),
            versions: Vec::new(),
        });
        entry.bytes = bytes.to_vec();
        entry.versions.push((version_id, now));
        Ok(())
    }

    async fn copy(&self, src_key: &str, dst_key: &str, encrypt: bool) -> Result<(), StoreError> {
        let bytes = self
            .get(src_key)
            .await?
            .ok_or_else(|| StoreError::NotFound(src_key.to_string()))?;
        self.put(dst_key, &bytes, encrypt).await
    }

    async fn list_versions(&self, key: &str) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.objects.get(key).map(|e| e.versions.clone()).unwrap_or_default())
    }

    async fn acquire_lock(
        &self,
        key: &str,
        owner_id: &str,
        ttl: std::time::Duration,
    ) -> Result<LockHandle, StoreError> {
        let mut guard = self.inner.write().await;
        let now = Utc::now();

        if let Some(existing) = guard.locks.get(key) {
            if existing.expires_at > now {
                return Err(StoreError::LockBusy {
                    key: key.to_string(),
                    holder: existing.owner_id.clone(),
                });
            }
        }

        let expires_at = now
            + chrono::Duration::from_std(ttl)
                .map_err(|e| StoreError::Internal(format!("invalid lock ttl: {e}")))?;
        guard.locks.insert(
            key.to_string(),
            HeldLock { owner_id: owner_id.to_string(), acquired_at: now, expires_at },
        );

        Ok(LockHandle { key: key.to_string(), owner_id: owner_id.to_string(), acquired_at: now })
    }

    async fn release(&self, handle: LockHandle) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if let Some(existing) = guard.locks.get(&handle.key) {
            if existing.owner_id == handle.owner_id {
                guard.locks.remove(&handle.key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = InMemoryStateStoreClient::new();
        store.put("object-store/acc1/region-1/proj-a/state", b"hello", true).await.unwrap();
        let got = store.get("object-store/acc1/region-1/proj-a/state").await.unwrap();
        assert_eq!(got, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn copy_duplicates_bytes_at_new_key() {
        let store = InMemoryStateStoreClient::new();
        store.put("src", b"payload", true).await.unwrap();
        store.copy("src", "backups/src.20260101-000000.backup", true).await.unwrap();
        let got = store.get("backups/src.20260101-000000.backup").await.unwrap();
        assert_eq!(got, Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn second_lock_acquisition_is_busy() {
        let store = InMemoryStateStoreClient::new();
        let ttl = std::time::Duration::from_secs(60);
        let _handle = store.acquire_lock("key", "owner-a", ttl).await.unwrap();
        let err = store.acquire_lock("key", "owner-b", ttl).await.unwrap_err();
        assert!(matches!(err, StoreError::LockBusy { .. }));
    }

    #[tokio::test]
    async fn release_allows_reacquisition() {
        let store = InMemoryStateStoreClient::new();
        let ttl = std::time::Duration::from_secs(60);
        let handle = store.acquire_lock("key", "owner-a", ttl).await.unwrap();
        store.release(handle).await.unwrap();
        let second = store.acquire_lock("key", "owner-b", ttl).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let store = InMemoryStateStoreClient::new();
        let ttl = std::time::Duration::from_secs(60);
        let handle = store.acquire_lock("key", "owner-a", ttl).await.unwrap();
        store.release(handle.clone()).await.unwrap();
        store.release(handle).await.unwrap();
    }
}
