//! The log manager (component 4.L): a map from log identifier to a live
//! [`LogInstance`], with lazy restore and client-upgrade-on-first-write.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use tlog_blob::{BlobClient, DelegatedBlobClient, ReadOnlyGatewayClient};
use tlog_crypto::CheckpointSigner;
use tlog_index::CidIndex;
use tlog_storage::StateStore;

use crate::error::{validate_log_id, ManagerError};
use crate::instance::LogInstance;

/// Origin prefix used to build a log's checkpoint origin line
/// (`{prefix}/{space_id}`).
const ORIGIN_PREFIX: &str = "tlog";

/// Owns every log this node currently serves, keyed by space identifier.
pub struct LogManager {
    base_dir: PathBuf,
    signer: Arc<CheckpointSigner>,
    blob_base_url: String,
    ipfs_gateway_url: String,
    logs: DashMap<String, Arc<LogInstance>>,
}

impl LogManager {
    /// Builds a manager rooted at `base_dir` (spec §6: `{base}/logs/{spaceId}/log.db`).
    /// `blob_base_url` targets the delegated-write backend; `ipfs_gateway_url`
    /// backs read-only restores before any write has authenticated.
    pub fn new(
        base_dir: impl Into<PathBuf>,
        signer: Arc<CheckpointSigner>,
        blob_base_url: impl Into<String>,
        ipfs_gateway_url: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            base_dir: base_dir.into(),
            signer,
            blob_base_url: blob_base_url.into(),
            ipfs_gateway_url: ipfs_gateway_url.into(),
            logs: DashMap::new(),
        })
    }

    fn origin(&self, space_id: &str) -> String {
        format!("{ORIGIN_PREFIX}://{}/{space_id}", self.signer.signer_id())
    }

    /// `tlog/create`: creates a fresh log's state row and inserts a
    /// delegated-write instance (there is no read-only phase for a log
    /// that doesn't exist yet).
    pub async fn create_log(&self, space_id: &str) -> Result<Arc<LogInstance>, ManagerError> {
        validate_log_id(space_id)?;
        let store = Arc::new(StateStore::open(&self.base_dir, space_id).await.map_err(ManagerError::LogCreationFailed)?);
        store.create_log(now_ms()).await.map_err(ManagerError::LogCreationFailed)?;
        let index = Arc::new(
            CidIndex::rehydrate(store.clone())
                .await
                .map_err(ManagerError::LogCreationFailed)?,
        );
        let client: Arc<dyn BlobClient> = Arc::new(DelegatedBlobClient::new(self.blob_base_url.clone()));
        let instance = LogInstance::new(space_id, self.origin(space_id), store, index, self.signer.clone(), client);
        self.logs.insert(space_id.to_string(), instance.clone());
        Ok(instance)
    }

    /// Returns the live instance for `space_id`, lazily restoring it from
    /// the state store (read-only) on a cache miss (spec §4.L).
    pub async fn get_or_restore(&self, space_id: &str) -> Result<Arc<LogInstance>, ManagerError> {
        validate_log_id(space_id)?;
        if let Some(existing) = self.logs.get(space_id) {
            return Ok(existing.clone());
        }

        let store = Arc::new(
            StateStore::open(&self.base_dir, space_id)
                .await
                .map_err(|_| ManagerError::LogNotFound)?,
        );
        store.get_log_state().await.map_err(ManagerError::LogCreationFailed)?.ok_or(ManagerError::LogNotFound)?;
        let index = Arc::new(
            CidIndex::rehydrate(store.clone())
                .await
                .map_err(ManagerError::LogCreationFailed)?,
        );
        let client: Arc<dyn BlobClient> = Arc::new(ReadOnlyGatewayClient::new(self.ipfs_gateway_url.clone()));
        let instance = LogInstance::new(space_id, self.origin(space_id), store, index, self.signer.clone(), client);

        // Another task may have restored (or created) the same log between
        // the miss above and this insert; keep whichever won the race so
        // every caller converges on one instance.
        Ok(self
            .logs
            .entry(space_id.to_string())
            .or_insert(instance)
            .clone())
    }

    /// Restores (if needed) and upgrades `space_id`'s instance to a
    /// delegated-write client authenticated by the caller's token's
    /// backend credentials. Idempotent: a second upgrade is a no-op.
    pub async fn get_or_restore_for_write(&self, space_id: &str) -> Result<Arc<LogInstance>, ManagerError> {
        let instance = match self.get_or_restore(space_id).await {
            Ok(instance) => instance,
            Err(ManagerError::LogNotFound) => self.create_log(space_id).await?,
            Err(e) => return Err(e),
        };
        if !instance.is_upgraded() {
            let client: Arc<dyn BlobClient> = Arc::new(DelegatedBlobClient::new(self.blob_base_url.clone()));
            instance.upgrade(client);
        }
        Ok(instance)
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> Arc<CheckpointSigner> {
        Arc::new(CheckpointSigner::generate("node-a").expect("generate"))
    }

    #[tokio::test]
    async fn creating_a_log_inserts_an_already_upgraded_instance() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = LogManager::new(dir.path(), signer(), "https://blob.example", "https://ipfs.io");
        let instance = manager.create_log("did:key:zA").await.expect("create");
        assert!(instance.is_upgraded());
    }

    #[tokio::test]
    async fn restoring_an_unknown_log_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = LogManager::new(dir.path(), signer(), "https://blob.example", "https://ipfs.io");
        let err = manager.get_or_restore("did:key:zUnknown").await.unwrap_err();
        assert!(matches!(err, ManagerError::LogNotFound));
    }

    #[tokio::test]
    async fn restoring_an_existing_log_starts_read_only_until_upgraded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = LogManager::new(dir.path(), signer(), "https://blob.example", "https://ipfs.io");
        manager.create_log("did:key:zA").await.expect("create");

        // Force a fresh manager so the log is genuinely restored, not reused
        // from the in-memory map.
        let manager2 = LogManager::new(dir.path(), signer(), "https://blob.example", "https://ipfs.io");
        let restored = manager2.get_or_restore("did:key:zA").await.expect("restore");
        assert!(!restored.is_upgraded());

        let upgraded = manager2.get_or_restore_for_write("did:key:zA").await.expect("upgrade");
        assert!(upgraded.is_upgraded());
    }

    #[tokio::test]
    async fn rejects_malformed_log_identifiers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = LogManager::new(dir.path(), signer(), "https://blob.example", "https://ipfs.io");
        let err = manager.create_log("a/b").await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidLogId(_)));
    }
}
