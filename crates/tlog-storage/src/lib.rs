#![deny(missing_docs)]
//! The per-log relational state store (spec §4.A): tree size+root,
//! path→content-id, revocations, index-persist metadata, and GC progress,
//! backed by one `rusqlite` database file per log.

mod pool;
mod schema;
mod store;

pub use store::StateStore;

#[cfg(test)]
mod tests {
    use super::*;
    use tlog_types::ContentId;

    async fn open_store() -> (StateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::open(dir.path(), "did:key:zA").await.expect("open");
        (store, dir)
    }

    #[tokio::test]
    async fn create_log_is_idempotent() {
        let (store, _dir) = open_store().await;
        store.create_log(1000).await.expect("create");
        store.create_log(2000).await.expect("create again");
        let state = store.get_log_state().await.expect("get").expect("exists");
        assert_eq!(state.tree_size, 0);
        assert_eq!(state.created_at_ms, 1000);
    }

    #[tokio::test]
    async fn set_and_get_tree_state() {
        let (store, _dir) = open_store().await;
        store.create_log(0).await.expect("create");
        store.set_tree_state(3, [9u8; 32], 10).await.expect("set");
        let state = store.get_log_state().await.expect("get").expect("exists");
        assert_eq!(state.tree_size, 3);
        assert_eq!(state.root, [9u8; 32]);
    }

    #[tokio::test]
    async fn cid_index_round_trips() {
        let (store, _dir) = open_store().await;
        store.create_log(0).await.expect("create");
        let id = ContentId::of(b"hello");
        store.set_cid("tile/entries/x000/000", id).await.expect("set");
        let index = store.get_cid_index().await.expect("get");
        assert_eq!(index.get("tile/entries/x000/000"), Some(&id));
    }

    #[tokio::test]
    async fn delete_cids_with_prefix_removes_partials_only() {
        let (store, _dir) = open_store().await;
        store.create_log(0).await.expect("create");
        let full = ContentId::of(b"full");
        let partial = ContentId::of(b"partial");
        store.set_cid("tile/entries/x000/000", full).await.expect("set");
        store
            .set_cid("tile/entries/x000/000.p/3", partial)
            .await
            .expect("set");
        let removed = store
            .delete_cids_with_prefix("tile/entries/x000/000.p/")
            .await
            .expect("delete");
        assert_eq!(removed, 1);
        let index = store.get_cid_index().await.expect("get");
        assert!(index.contains_key("tile/entries/x000/000"));
        assert!(!index.contains_key("tile/entries/x000/000.p/3"));
    }

    #[tokio::test]
    async fn revocation_is_idempotent() {
        let (store, _dir) = open_store().await;
        store.create_log(0).await.expect("create");
        let token_cid = ContentId::of(b"token");
        store.add_revocation(token_cid, 5).await.expect("add");
        store.add_revocation(token_cid, 6).await.expect("add again");
        let revocations = store.get_revocations().await.expect("get");
        assert_eq!(revocations.len(), 1);
        assert!(store.is_revoked(token_cid).await.expect("check"));
    }

    #[tokio::test]
    async fn gc_progress_defaults_to_zero() {
        let (store, _dir) = open_store().await;
        store.create_log(0).await.expect("create");
        let progress = store.get_gc_progress().await.expect("get");
        assert_eq!(progress.from_size, 0);
        store
            .set_gc_progress(tlog_types::GcProgress { from_size: 768 })
            .await
            .expect("set");
        let progress = store.get_gc_progress().await.expect("get");
        assert_eq!(progress.from_size, 768);
    }
}
