use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ServerSideEncryption;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;
use crate::store::{LockHandle, StateStoreClient};

/// Configuration for the S3-backed state object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3StateStoreConfig {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default = "default_sse")]
    pub server_side_encryption: bool,
    #[serde(default)]
    pub kms_key_id: Option<String>,
}

fn default_sse() -> bool {
    true
}

/// S3-backed implementation of [`StateStoreClient`].
///
/// Every key is prefixed with the configured `prefix` (if any); locks are
/// sidecar objects at `<key>.lock` created with `If-None-Match: *` so two
/// concurrent acquisitions race safely at the object store layer.
pub struct S3StateStoreClient {
    client: Client,
    bucket: String,
    prefix: String,
    config: S3StateStoreConfig,
}

impl S3StateStoreClient {
    pub async fn new(config: S3StateStoreConfig) -> Result<Self, StoreError> {
        if config.bucket.trim().is_empty() {
            return Err(StoreError::Internal("bucket must be set".to_string()));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let shared_config = loader.load().await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = &config.endpoint {
            s3_builder = s3_builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            s3_builder = s3_builder.force_path_style(true);
        }

        let prefix = config
            .prefix
            .clone()
            .map(|p| p.trim_matches('/').to_string())
            .unwrap_or_default();

        Ok(Self {
            client: Client::from_conf(s3_builder.build()),
            bucket: config.bucket.clone(),
            prefix,
            config,
        })
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }
}

#[async_trait]
impl StateStoreClient for S3StateStoreClient {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let full_key = self.full_key(key);
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StoreError::Internal(format!("read object body '{full_key}': {e}")))?
                    .into_bytes();
                Ok(Some(bytes.to_vec()))
            }
            Err(e) => {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    Ok(None)
                } else {
                    Err(StoreError::Internal(format!("get_object '{full_key}': {e}")))
                }
            }
        }
    }

    async fn put(&self, key: &str, bytes: &[u8], encrypt: bool) -> Result<(), StoreError> {
        let full_key = self.full_key(key);
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .body(ByteStream::from(bytes.to_vec()));

        if encrypt && self.config.server_side_encryption {
            req = req.server_side_encryption(ServerSideEncryption::Aes256);
            if let Some(kms_key_id) = &self.config.kms_key_id {
                req = req.ssekms_key_id(kms_key_id);
            }
        }

        req.send()
            .await
            .map_err(|e| StoreError::Internal(format!("put_object '{full_key}': {e}")))?;
        Ok(())
    }

    async fn copy(&self, src_key: &str, dst_key: &str, encrypt: bool) -> Result<(), StoreError> {
        let full_src = format!("{}/{}", self.bucket, self.full_key(src_key));
        let full_dst = self.full_key(dst_key);

        let mut req = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(&full_src)
            .key(&full_dst);

        if encrypt && self.config.server_side_encryption {
            req = req.server_side_encryption(ServerSideEncryption::Aes256);
        }

        req.send()
            .await
            .map_err(|e| StoreError::Internal(format!("copy_object '{full_src}' -> '{full_dst}': {e}")))?;
        Ok(())
    }

    async fn list_versions(&self, key: &str) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let full_key = self.full_key(key);
        let output = self
            .client
            .list_object_versions()
            .bucket(&self.bucket)
            .prefix(&full_key)
            .send()
            .await
            .map_err(|e| StoreError::Internal(format!("list_object_versions '{full_key}': {e}")))?;

        let mut versions = Vec::new();
        for v in output.versions() {
            let Some(version_id) = v.version_id() else { continue };
            let Some(last_modified) = v.last_modified() else { continue };
            let millis = last_modified.to_millis().unwrap_or_default();
            let Some(timestamp) = DateTime::<Utc>::from_timestamp_millis(millis) else { continue };
            versions.push((version_id.to_string(), timestamp));
        }
        Ok(versions)
    }

    async fn acquire_lock(
        &self,
        key: &str,
        owner_id: &str,
        ttl: std::time::Duration,
    ) -> Result<LockHandle, StoreError> {
        let lock_key = self.full_key(&format!("{key}.lock"));
        let now = Utc::now();
        let payload = serde_json::json!({
            "owner_id": owner_id,
            "acquired_at": now,
            "ttl_secs": ttl.as_secs(),
        });
        let body = serde_json::to_vec(&payload)?;

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&lock_key)
            .if_none_match("*")
            .body(ByteStream::from(body))
            .send()
            .await;

        match result {
            Ok(_) => Ok(LockHandle { key: key.to_string(), owner_id: owner_id.to_string(), acquired_at: now }),
            Err(e) => {
                let holder = self
                    .get(&format!("{key}.lock"))
                    .await
                    .ok()
                    .flatten()
                    .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
                    .and_then(|v| v.get("owner_id").and_then(|o| o.as_str()).map(String::from))
                    .unwrap_or_else(|| "unknown".to_string());
                warn!(%key, error = %e, "lock acquisition conflict");
                Err(StoreError::LockBusy { key: key.to_string(), holder })
            }
        }
    }

    async fn release(&self, handle: LockHandle) -> Result<(), StoreError> {
        let lock_key = self.full_key(&format!("{}.lock", handle.key));
        match self.client.delete_object().bucket(&self.bucket).key(&lock_key).send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(key = %handle.key, error = %e, "lock release failed (treated as idempotent no-op)");
                Ok(())
            }
        }
    }
}
