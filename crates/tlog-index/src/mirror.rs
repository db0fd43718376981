//! The content-addressed path index (component 4.B): a thread-safe
//! path→content-id mirror, fail-closed to the state store on every `Set`.

use dashmap::DashMap;
use tlog_storage::StateStore;
use tlog_types::error::StorageError;
use tlog_types::ContentId;

/// In-memory mirror of a log's path→content-id mapping, backed by 4.A.
///
/// The mirror is never ahead of the store for individual `set` calls: an
/// error from the store propagates before the mirror is updated. `Delete`
/// on a missing path is a no-op; `delete_prefix` updates the mirror first
/// and best-effort propagates to the store (spec §4.B).
pub struct CidIndex {
    map: DashMap<String, ContentId>,
    store: std::sync::Arc<StateStore>,
}

impl CidIndex {
    /// Rehydrates the mirror from the state store (spec §3 "Ownership":
    /// on restart the mirror is rehydrated from the store).
    pub async fn rehydrate(store: std::sync::Arc<StateStore>) -> Result<Self, StorageError> {
        let entries = store.get_cid_index().await?;
        let map = DashMap::new();
        for (path, id) in entries {
            map.insert(path, id);
        }
        Ok(Self { map, store })
    }

    /// `Get(path)`.
    pub fn get(&self, path: &str) -> Option<ContentId> {
        self.map.get(path).map(|entry| *entry)
    }

    /// `Set(path, id)`: writes through to the store first, then the mirror.
    pub async fn set(&self, path: &str, id: ContentId) -> Result<(), StorageError> {
        self.store.set_cid(path, id).await?;
        self.map.insert(path.to_string(), id);
        Ok(())
    }

    /// `Delete(path)`: removes exactly this key from the mirror, then
    /// best-effort from the store; no-op if absent. Distinct from
    /// `DeletePrefix`: `tile_path`/`entry_bundle_path` render partial
    /// widths as bare unpadded decimals (`.p/1`, `.p/10`, `.p/100`, …), so a
    /// prefix scan on one width's exact path would also match every other
    /// width sharing that prefix.
    pub async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.map.remove(path);
        if let Err(e) = self.store.delete_cid(path).await {
            tracing::warn!(path, error = %e, "best-effort store delete failed after mirror update");
        }
        Ok(())
    }

    /// `DeletePrefix(prefix)`: mirror first, store best-effort (spec §4.B).
    /// Returns the number of entries removed from the mirror.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let removed: Vec<String> = self
            .map
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        for key in &removed {
            self.map.remove(key);
        }
        if let Err(e) = self.store.delete_cids_with_prefix(prefix).await {
            tracing::warn!(prefix, error = %e, "best-effort store prefix delete failed after mirror update");
        }
        Ok(removed.len() as u64)
    }

    /// Whether `path` is currently present in the mirror.
    pub fn contains(&self, path: &str) -> bool {
        self.map.contains_key(path)
    }

    /// A point-in-time copy of the full path→content-id mapping, consumed
    /// by the index-CAR persister (spec §4.I).
    pub fn snapshot(&self) -> std::collections::BTreeMap<String, ContentId> {
        self.map.iter().map(|entry| (entry.key().clone(), *entry.value())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn index() -> (CidIndex, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::open(dir.path(), "did:key:zA").await.expect("open");
        store.create_log(0).await.expect("create");
        let index = CidIndex::rehydrate(std::sync::Arc::new(store)).await.expect("rehydrate");
        (index, dir)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (index, _dir) = index().await;
        let id = ContentId::of(b"hello");
        index.set("tile/0/x000/000", id).await.expect("set");
        assert_eq!(index.get("tile/0/x000/000"), Some(id));
    }

    #[tokio::test]
    async fn delete_removes_exact_key_only() {
        let (index, _dir) = index().await;
        let width_1 = ContentId::of(b"width-1");
        let width_10 = ContentId::of(b"width-10");
        let width_100 = ContentId::of(b"width-100");
        index.set("tile/0/x000/000.p/1", width_1).await.expect("set");
        index.set("tile/0/x000/000.p/10", width_10).await.expect("set");
        index.set("tile/0/x000/000.p/100", width_100).await.expect("set");

        index.delete("tile/0/x000/000.p/1").await.expect("delete");

        assert!(!index.contains("tile/0/x000/000.p/1"));
        assert!(index.contains("tile/0/x000/000.p/10"));
        assert!(index.contains("tile/0/x000/000.p/100"));
    }

    #[tokio::test]
    async fn delete_of_missing_path_is_a_no_op() {
        let (index, _dir) = index().await;
        index.delete("tile/0/x000/000.p/1").await.expect("delete");
        assert!(!index.contains("tile/0/x000/000.p/1"));
    }

    #[tokio::test]
    async fn delete_prefix_clears_matching_entries_only() {
        let (index, _dir) = index().await;
        let full = ContentId::of(b"full");
        let partial = ContentId::of(b"partial");
        index.set("tile/entries/x000/000", full).await.expect("set");
        index
            .set("tile/entries/x000/000.p/3", partial)
            .await
            .expect("set");
        let removed = index
            .delete_prefix("tile/entries/x000/000.p/")
            .await
            .expect("delete prefix");
        assert_eq!(removed, 1);
        assert!(index.contains("tile/entries/x000/000"));
        assert!(!index.contains("tile/entries/x000/000.p/3"));
    }

    #[tokio::test]
    async fn snapshot_reflects_current_entries() {
        let (index, _dir) = index().await;
        let id = ContentId::of(b"hello");
        index.set("checkpoint", id).await.expect("set");
        let snap = index.snapshot();
        assert_eq!(snap.get("checkpoint"), Some(&id));
        assert_eq!(snap.len(), 1);
    }

    #[tokio::test]
    async fn rehydrate_restores_prior_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = std::sync::Arc::new(
            StateStore::open(dir.path(), "did:key:zA").await.expect("open"),
        );
        store.create_log(0).await.expect("create");
        let id = ContentId::of(b"persisted");
        store.set_cid("checkpoint", id).await.expect("set");

        let index = CidIndex::rehydrate(store).await.expect("rehydrate");
        assert_eq!(index.get("checkpoint"), Some(id));
    }
}
