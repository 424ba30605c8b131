use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use tracing::warn;

use tfleet_domain::AuditRecord;

use crate::error::StoreError;
use crate::store::StateStoreClient;

/// Append-only, encrypted audit record writer.
///
/// Every envelope is `nonce(12 bytes) || AES-256-GCM ciphertext` of the
/// canonical JSON encoding of an [`AuditRecord`]. Bodies are always the
/// unredacted raw text — audit records are written before redaction.
pub struct AuditLogger {
    store: Arc<dyn StateStoreClient>,
    cipher: Aes256Gcm,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn StateStoreClient>, key: &[u8; 32]) -> Self {
        Self { store, cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)) }
    }

    /// Write one terminal-outcome record. A failure is logged via
    /// `tracing::warn!` and reported to the caller as `false` so it can flag
    /// `audit_degraded = true` on the unit's outcome — it never fails the
    /// enclosing operation.
    pub async fn append(&self, record: &AuditRecord) -> bool {
        let key = audit_key(record);

        let envelope = match self.encrypt(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, %key, "failed to encrypt audit record");
                return false;
            }
        };

        match self.store.put(&key, &envelope, false).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, %key, "failed to persist audit record");
                false
            }
        }
    }

    fn encrypt(&self, record: &AuditRecord) -> Result<Vec<u8>, StoreError> {
        let plaintext = serde_json::to_vec(record)?;
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|e| StoreError::Crypto(e.to_string()))?;

        let mut envelope = nonce_bytes.to_vec();
        envelope.extend(ciphertext);
        Ok(envelope)
    }

    /// Decrypt an envelope previously written by [`append`](Self::append).
    pub fn decrypt(&self, envelope: &[u8]) -> Result<AuditRecord, StoreError> {
        if envelope.len() < 12 {
            return Err(StoreError::Crypto("audit envelope shorter than nonce".to_string()));
        }
        let (nonce_bytes, ciphertext) = envelope.split_at(12);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| StoreError::Crypto(e.to_string()))?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// `audit/{account_name}/{project}/{action}-{yyyymmdd-hhmmss}.json`
fn audit_key(record: &AuditRecord) -> String {
    format!(
        "audit/{}/{}/{}-{}.json",
        record.unit.account_name,
        record.unit.project,
        record.action,
        record.timestamp.format("%Y%m%d-%H%M%S"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStateStoreClient;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::BTreeSet;
    use tfleet_domain::{Action, AuditResult, DeploymentUnit, ServiceKind, StateKey, UnitMetadata};

    fn sample_record() -> AuditRecord {
        let services = BTreeSet::from([ServiceKind::ObjectStore]);
        let unit = DeploymentUnit {
            source_path: "store/proj-a/proj-a.conf".into(),
            project: "proj-a".into(),
            account_name: "acc1".into(),
            region: "region-1".into(),
            state_key: StateKey::derive(&services, "acc1", "region-1", "proj-a"),
            services,
            metadata: UnitMetadata::default(),
            resource_names: vec!["b1".into()],
            workspace_path: None,
        };
        AuditRecord {
            timestamp: Utc::now(),
            action: Action::Apply,
            unit,
            result: AuditResult { success: true, output: "terraform apply output".into() },
            backup_key: None,
            orchestrator_version: "0.1.0".into(),
        }
    }

    #[tokio::test]
    async fn append_then_decrypt_round_trips() {
        let store = Arc::new(InMemoryStateStoreClient::new());
        let key = [7u8; 32];
        let logger = AuditLogger::new(store.clone(), &key);
        let record = sample_record();

        assert!(logger.append(&record).await);

        let k = audit_key(&record);
        let envelope = store.get(&k).await.unwrap().unwrap();
        let decrypted = logger.decrypt(&envelope).unwrap();
        assert_eq!(decrypted.result.output, record.result.output);
        assert_eq!(decrypted.unit.state_key, record.unit.state_key);
    }

    #[tokio::test]
    async fn wrong_key_fails_to_decrypt() {
        let store = Arc::new(InMemoryStateStoreClient::new());
        let record = sample_record();
        let logger = AuditLogger::new(store.clone(), &[1u8; 32]);
        logger.append(&record).await;

        let k = audit_key(&record);
        let envelope = store.get(&k).await.unwrap().unwrap();

        let other = AuditLogger::new(store, &[2u8; 32]);
        assert!(other.decrypt(&envelope).is_err());
    }

    struct FailingStore;

    #[async_trait]
    impl StateStoreClient for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }
        async fn put(&self, _key: &str, _bytes: &[u8], _encrypt: bool) -> Result<(), StoreError> {
            Err(StoreError::Internal("disk full".into()))
        }
        async fn copy(&self, _src: &str, _dst: &str, _encrypt: bool) -> Result<(), StoreError> {
            Err(StoreError::Internal("disk full".into()))
        }
        async fn list_versions(&self, _key: &str) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
            Ok(vec![])
        }
        async fn acquire_lock(
            &self,
            key: &str,
            owner_id: &str,
            _ttl: std::time::Duration,
        ) -> Result<crate::store::LockHandle, StoreError> {
            Ok(crate::store::LockHandle { key: key.into(), owner_id: owner_id.into(), acquired_at: Utc::now() })
        }
        async fn release(&self, _handle: crate::store::LockHandle) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_write_returns_false_without_panicking() {
        let logger = AuditLogger::new(Arc::new(FailingStore), &[9u8; 32]);
        let ok = logger.append(&sample_record()).await;
        assert!(!ok);
    }
}
