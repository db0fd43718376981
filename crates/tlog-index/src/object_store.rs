//! The object store layer (component 4.D): three path-addressed primitives
//! bridging the tile layer to the content-addressed blob backend (4.C),
//! with an LRU byte cache and a dirty-signal callback for the index-CAR
//! persister (4.I).

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use tlog_blob::BlobClient;
use tlog_crypto::CapabilityToken;
use tlog_types::{BlobError, ContentId};

use crate::mirror::CidIndex;

/// Default LRU capacity for cached blob bytes (spec §4.D: "capacity ≈10 000").
const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Bridges path-addressed tile storage to the content-addressed backend.
///
/// Write concurrency is unrestricted: no serialization across paths (spec
/// §4.D). The cache is internally synchronized.
pub struct ObjectStore {
    client: Arc<dyn BlobClient>,
    index: Arc<CidIndex>,
    cache: Mutex<LruCache<ContentId, Arc<Vec<u8>>>>,
    on_dirty: Box<dyn Fn() + Send + Sync>,
}

impl ObjectStore {
    /// Builds an object store over `client`, mirroring writes through
    /// `index`. `on_dirty` fires after every successful write that changes
    /// the index (feeds the index-CAR persister's dirty signal, 4.I).
    pub fn new(
        client: Arc<dyn BlobClient>,
        index: Arc<CidIndex>,
        on_dirty: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            client,
            index,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).expect("nonzero capacity"),
            )),
            on_dirty: Box::new(on_dirty),
        }
    }

    fn cache_put(&self, id: ContentId, bytes: Arc<Vec<u8>>) {
        self.cache.lock().expect("object store cache poisoned").put(id, bytes);
    }

    fn cache_get(&self, id: &ContentId) -> Option<Arc<Vec<u8>>> {
        self.cache.lock().expect("object store cache poisoned").get(id).cloned()
    }

    /// `setObject(path, bytes)`: uploads via 4.C, caches the bytes under the
    /// returned content-id, writes the mapping, and fires the dirty
    /// callback. Requires a capability token in the call context.
    pub async fn set_object(
        &self,
        space_id: &str,
        path: &str,
        bytes: Vec<u8>,
        token: Option<&CapabilityToken>,
    ) -> Result<ContentId, BlobError> {
        let token = token.ok_or(BlobError::NoCapability)?;
        let id = self.client.upload_blob(space_id, bytes.clone(), token).await?;
        self.cache_put(id, Arc::new(bytes));
        self.index
            .set(path, id)
            .await
            .map_err(|e| BlobError::Unavailable(e.to_string()))?;
        (self.on_dirty)();
        Ok(id)
    }

    /// `setObjectIfNoneMatch(path, bytes)`: succeeds `(true, Some(id))` iff
    /// `path` is absent both before the upload and when the mapping is
    /// written; otherwise `(false, None)` and the uploaded blob is left
    /// unreferenced. Used for immutable-by-policy writes (entry bundles).
    pub async fn set_object_if_none_match(
        &self,
        space_id: &str,
        path: &str,
        bytes: Vec<u8>,
        token: Option<&CapabilityToken>,
    ) -> Result<(bool, Option<ContentId>), BlobError> {
        if self.index.contains(path) {
            return Ok((false, None));
        }
        let token = token.ok_or(BlobError::NoCapability)?;
        let id = self.client.upload_blob(space_id, bytes.clone(), token).await?;
        if self.index.contains(path) {
            return Ok((false, None));
        }
        self.cache_put(id, Arc::new(bytes));
        self.index
            .set(path, id)
            .await
            .map_err(|e| BlobError::Unavailable(e.to_string()))?;
        (self.on_dirty)();
        Ok((true, Some(id)))
    }

    /// `getObject(path)`: serves from the LRU cache if hot, otherwise
    /// fetches through 4.C and caches the result. Not-found if `path` is
    /// absent from the mirror.
    pub async fn get_object(&self, path: &str) -> Result<Arc<Vec<u8>>, BlobError> {
        let id = self.index.get(path).ok_or(BlobError::NotFound)?;
        if let Some(bytes) = self.cache_get(&id) {
            return Ok(bytes);
        }
        let bytes = Arc::new(self.client.fetch_blob(id).await?);
        self.cache_put(id, bytes.clone());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tlog_crypto::{Ability, TokenClaims};
    use tlog_storage::StateStore;

    struct FakeBlobClient {
        fetch_calls: AtomicUsize,
    }

    #[async_trait]
    impl BlobClient for FakeBlobClient {
        async fn upload_blob(
            &self,
            _space_id: &str,
            bytes: Vec<u8>,
            _token: &CapabilityToken,
        ) -> Result<ContentId, BlobError> {
            Ok(ContentId::of(&bytes))
        }

        async fn upload_car(
            &self,
            _space_id: &str,
            bytes: Vec<u8>,
            _token: &CapabilityToken,
        ) -> Result<ContentId, BlobError> {
            Ok(ContentId::of(&bytes))
        }

        async fn fetch_blob(&self, content_id: ContentId) -> Result<Vec<u8>, BlobError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(content_id.to_cid_string().into_bytes())
        }

        async fn remove_blob(
            &self,
            _space_id: &str,
            _digest: ContentId,
            _token: &CapabilityToken,
        ) -> Result<(), BlobError> {
            Ok(())
        }
    }

    fn token() -> CapabilityToken {
        CapabilityToken {
            claims: TokenClaims {
                issuer: "did:key:zSpace".to_string(),
                audience: "did:key:zService".to_string(),
                space_id: "did:key:zSpace".to_string(),
                abilities: Ability::WRITE_SET.to_vec(),
                expires_at_ms: None,
            },
            signature: Vec::new(),
            issuer_public_key: Vec::new(),
            proof: None,
        }
    }

    async fn store() -> (ObjectStore, Arc<AtomicUsize>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let state_store = StateStore::open(dir.path(), "did:key:zSpace").await.expect("open");
        state_store.create_log(0).await.expect("create");
        let index = Arc::new(
            CidIndex::rehydrate(Arc::new(state_store)).await.expect("rehydrate"),
        );
        let client = Arc::new(FakeBlobClient {
            fetch_calls: AtomicUsize::new(0),
        });
        let dirty_count = Arc::new(AtomicUsize::new(0));
        let dirty_count_cb = dirty_count.clone();
        let os = ObjectStore::new(client, index, move || {
            dirty_count_cb.fetch_add(1, Ordering::SeqCst);
        });
        (os, dirty_count, dir)
    }

    #[tokio::test]
    async fn set_object_requires_a_token() {
        let (os, _dirty, _dir) = store().await;
        let err = os
            .set_object("did:key:zSpace", "checkpoint", b"hi".to_vec(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::NoCapability));
    }

    #[tokio::test]
    async fn set_object_then_get_object_round_trips_from_cache() {
        let (os, dirty, _dir) = store().await;
        let t = token();
        let id = os
            .set_object("did:key:zSpace", "checkpoint", b"hello".to_vec(), Some(&t))
            .await
            .expect("set");
        assert_eq!(dirty.load(Ordering::SeqCst), 1);
        let bytes = os.get_object("checkpoint").await.expect("get");
        assert_eq!(*bytes, b"hello".to_vec());
        assert_eq!(id, ContentId::of(b"hello"));
    }

    #[tokio::test]
    async fn get_object_on_unknown_path_is_not_found() {
        let (os, _dirty, _dir) = store().await;
        let err = os.get_object("nope").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound));
    }

    #[tokio::test]
    async fn set_object_if_none_match_refuses_second_writer() {
        let (os, _dirty, _dir) = store().await;
        let t = token();
        let (first, id) = os
            .set_object_if_none_match(
                "did:key:zSpace",
                "tile/entries/x000/000.p/3",
                b"bundle".to_vec(),
                Some(&t),
            )
            .await
            .expect("set");
        assert!(first);
        assert!(id.is_some());

        let (second, id) = os
            .set_object_if_none_match(
                "did:key:zSpace",
                "tile/entries/x000/000.p/3",
                b"bundle-again".to_vec(),
                Some(&t),
            )
            .await
            .expect("set");
        assert!(!second);
        assert!(id.is_none());
    }
}
