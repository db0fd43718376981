//! A single log's wired-together driver: object store, tile resource
//! store, append pipeline, batcher, persister, and garbage collector,
//! all sharing one path→content-id mirror.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tlog_blob::BlobClient;
use tlog_crypto::CheckpointSigner;
use tlog_gc::GarbageCollector;
use tlog_index::{CidIndex, ObjectStore};
use tlog_pipeline::AppendPipeline;
use tlog_persist::Persister;
use tlog_queue::{BatchConfig, EntryBatcher};
use tlog_storage::StateStore;
use tlog_tree::ResourceStore;
use tlog_types::DEFAULT_BATCH_MAX_SIZE;

struct Wiring {
    resources: Arc<ResourceStore>,
    pipeline: Arc<AppendPipeline>,
    batcher: Arc<EntryBatcher>,
    persister: Arc<Persister>,
    gc: Arc<GarbageCollector>,
    client: Arc<dyn BlobClient>,
}

/// One log's live driver (spec §4.L: `{appender, reader, driver,
/// spaceIdentifier}`). Starts wired against a read-only client; [`upgrade`]
/// swaps in a delegated-write client on the first authenticated write.
///
/// [`upgrade`]: LogInstance::upgrade
pub struct LogInstance {
    space_id: String,
    origin: String,
    store: Arc<StateStore>,
    index: Arc<CidIndex>,
    signer: Arc<CheckpointSigner>,
    wiring: RwLock<Wiring>,
    upgraded: AtomicBool,
}

impl LogInstance {
    /// Builds a fresh instance wired against `client` (read-only at first
    /// restore, delegated at creation time).
    pub fn new(
        space_id: impl Into<String>,
        origin: impl Into<String>,
        store: Arc<StateStore>,
        index: Arc<CidIndex>,
        signer: Arc<CheckpointSigner>,
        client: Arc<dyn BlobClient>,
    ) -> Arc<Self> {
        let space_id = space_id.into();
        let origin = origin.into();
        let wiring = build_wiring(&space_id, &origin, store.clone(), index.clone(), signer.clone(), client);
        Arc::new(Self {
            space_id,
            origin,
            store,
            index,
            signer,
            wiring: RwLock::new(wiring),
            upgraded: AtomicBool::new(false),
        })
    }

    /// This instance's space identifier.
    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    /// The tile/bundle resource store (4.E), for the unauthenticated tile
    /// and checkpoint HTTP routes.
    pub fn resources(&self) -> Arc<ResourceStore> {
        self.wiring.read().expect("instance wiring poisoned").resources.clone()
    }

    /// The append batcher (4.G) `tlog/append` enqueues into.
    pub fn batcher(&self) -> Arc<EntryBatcher> {
        self.wiring.read().expect("instance wiring poisoned").batcher.clone()
    }

    /// The append pipeline (4.H), for the `index_cid` optimistic-concurrency check.
    pub fn pipeline(&self) -> Arc<AppendPipeline> {
        self.wiring.read().expect("instance wiring poisoned").pipeline.clone()
    }

    /// The garbage collector (4.J) `tlog/gc` drives.
    pub fn gc(&self) -> Arc<GarbageCollector> {
        self.wiring.read().expect("instance wiring poisoned").gc.clone()
    }

    /// The index-CAR persister (4.I) backing this log's dirty signal.
    pub fn persister(&self) -> Arc<Persister> {
        self.wiring.read().expect("instance wiring poisoned").persister.clone()
    }

    /// The blob backend client currently wired in (read-only until
    /// [`upgrade`](Self::upgrade)). Needed directly by `tlog/revoke`'s
    /// `FetchToken(blobFetcher, contentId)` step (spec §4.K), which has no
    /// other path-addressed entry point into the object store.
    pub fn client(&self) -> Arc<dyn BlobClient> {
        self.wiring.read().expect("instance wiring poisoned").client.clone()
    }

    /// The state store (4.A) backing this log.
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// The path→content-id mirror (4.B) backing this log.
    pub fn index(&self) -> &Arc<CidIndex> {
        &self.index
    }

    /// Whether this instance has already upgraded to a delegated-write client.
    pub fn is_upgraded(&self) -> bool {
        self.upgraded.load(Ordering::SeqCst)
    }

    /// Upgrades the driver to a delegated-write client derived from the
    /// caller's token, rebuilding the object store/pipeline/batcher/GC/
    /// persister wiring around it. A no-op once already upgraded: later
    /// writes reuse the same instance (spec §4.L, "subsequent writes reuse
    /// the same driver instance").
    ///
    /// Rebuilding discards any entries still queued in the read-only
    /// instance's batcher; in practice that queue is always empty, since a
    /// read-only client can never have accepted an append to queue.
    pub fn upgrade(self: &Arc<Self>, client: Arc<dyn BlobClient>) {
        if self.upgraded.swap(true, Ordering::SeqCst) {
            return;
        }
        let new_wiring = build_wiring(
            &self.space_id,
            &self.origin,
            self.store.clone(),
            self.index.clone(),
            self.signer.clone(),
            client,
        );
        *self.wiring.write().expect("instance wiring poisoned") = new_wiring;
    }
}

fn build_wiring(
    space_id: &str,
    origin: &str,
    store: Arc<StateStore>,
    index: Arc<CidIndex>,
    signer: Arc<CheckpointSigner>,
    client: Arc<dyn BlobClient>,
) -> Wiring {
    let persister = Persister::new(space_id, index.clone(), client.clone(), store.clone());
    let persister_for_dirty = persister.clone();
    let objects = Arc::new(ObjectStore::new(client.clone(), index.clone(), move || {
        persister_for_dirty.mark_dirty()
    }));
    let resources = Arc::new(ResourceStore::new(objects));
    let pipeline = AppendPipeline::new(
        space_id.to_string(),
        origin.to_string(),
        resources.clone(),
        store.clone(),
        signer,
        persister.clone(),
    );
    let batcher = EntryBatcher::new(
        BatchConfig { max_size: DEFAULT_BATCH_MAX_SIZE, max_age: std::time::Duration::ZERO },
        pipeline.flush_fn(),
    );
    let gc = GarbageCollector::new(space_id, index, client.clone(), store);
    Wiring { resources, pipeline, batcher, persister, gc, client }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use tlog_crypto::CapabilityToken;
    use tlog_types::{BlobError, ContentId};

    struct MemoryBlobClient {
        blobs: StdMutex<HashMap<ContentId, Vec<u8>>>,
    }

    impl MemoryBlobClient {
        fn new() -> Arc<Self> {
            Arc::new(Self { blobs: StdMutex::new(HashMap::new()) })
        }
    }

    #[async_trait]
    impl BlobClient for MemoryBlobClient {
        async fn upload_blob(
            &self,
            _space_id: &str,
            bytes: Vec<u8>,
            _token: &CapabilityToken,
        ) -> Result<ContentId, BlobError> {
            let id = ContentId::of(&bytes);
            self.blobs.lock().expect("lock").insert(id, bytes);
            Ok(id)
        }

        async fn upload_car(
            &self,
            _space_id: &str,
            bytes: Vec<u8>,
            _token: &CapabilityToken,
        ) -> Result<ContentId, BlobError> {
            let id = ContentId::of(&bytes);
            self.blobs.lock().expect("lock").insert(id, bytes);
            Ok(id)
        }

        async fn fetch_blob(&self, content_id: ContentId) -> Result<Vec<u8>, BlobError> {
            self.blobs.lock().expect("lock").get(&content_id).cloned().ok_or(BlobError::NotFound)
        }

        async fn remove_blob(
            &self,
            _space_id: &str,
            digest: ContentId,
            _token: &CapabilityToken,
        ) -> Result<(), BlobError> {
            self.blobs.lock().expect("lock").remove(&digest);
            Ok(())
        }
    }

    async fn fixture() -> (Arc<LogInstance>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(StateStore::open(dir.path(), "did:key:zSpace").await.expect("open"));
        store.create_log(0).await.expect("create");
        let index = Arc::new(CidIndex::rehydrate(store.clone()).await.expect("rehydrate"));
        let signer = Arc::new(CheckpointSigner::generate("node-a").expect("generate"));
        let client: Arc<dyn BlobClient> = MemoryBlobClient::new();
        let instance = LogInstance::new("did:key:zSpace", "tlog://node-a/did:key:zSpace", store, index, signer, client);
        (instance, dir)
    }

    #[tokio::test]
    async fn a_fresh_instance_starts_unupgraded() {
        let (instance, _dir) = fixture().await;
        assert!(!instance.is_upgraded());
        assert_eq!(instance.space_id(), "did:key:zSpace");
    }

    #[tokio::test]
    async fn upgrading_swaps_the_wiring_and_flips_the_flag() {
        let (instance, _dir) = fixture().await;
        let old_resources = Arc::as_ptr(&instance.resources());

        let client: Arc<dyn BlobClient> = MemoryBlobClient::new();
        instance.upgrade(client);

        assert!(instance.is_upgraded());
        let new_resources = Arc::as_ptr(&instance.resources());
        assert_ne!(old_resources, new_resources);
    }

    #[tokio::test]
    async fn a_second_upgrade_is_a_no_op() {
        let (instance, _dir) = fixture().await;

        let client_a: Arc<dyn BlobClient> = MemoryBlobClient::new();
        instance.upgrade(client_a);
        let resources_after_first = Arc::as_ptr(&instance.resources());

        let client_b: Arc<dyn BlobClient> = MemoryBlobClient::new();
        instance.upgrade(client_b);
        let resources_after_second = Arc::as_ptr(&instance.resources());

        assert_eq!(resources_after_first, resources_after_second);
    }

    #[tokio::test]
    async fn accessors_expose_the_full_wiring() {
        let (instance, _dir) = fixture().await;
        let _ = instance.resources();
        let _ = instance.batcher();
        let _ = instance.pipeline();
        let _ = instance.gc();
        let _ = instance.persister();
        let _ = instance.client();
        let _ = instance.store();
        let _ = instance.index();
    }
}
