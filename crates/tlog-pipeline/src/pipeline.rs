//! The per-log flush contract (component 4.H), invoked by the
//! entry-queue/batcher (4.G) on a detached task once a batch is full.
//!
//! Steps (spec §4.H, run under a per-log async mutex so awaits inside the
//! critical section don't block other logs):
//!
//! 1. Read the current tree size from 4.A.
//! 2. Hand the batch's raw entries to the integrator (4.F), which assigns
//!    absolute indices implicitly by appending them in order.
//! 3. Extend the tree (4.F runs entry-bundle writes in parallel internally).
//! 4. Persist `(newSize, newRoot)` via 4.A.
//! 5. Sign and publish a checkpoint for `(newSize, newRoot)`.
//! 6. Broadcast assigned indices to callers.
//! 7. Trigger index-CAR persistence (4.I) on a detached task, carrying the
//!    batch's capability token.
//!
//! Any failure before step 6 fails the whole batch uniformly; nothing is
//! broadcast and the batcher notifies every caller of the same error.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex as AsyncMutex;

use tlog_crypto::{CapabilityToken, CheckpointSigner};
use tlog_persist::Persister;
use tlog_queue::{AppendOutcome, FlushFn, FlushResult, QueuedEntry};
use tlog_storage::StateStore;
use tlog_tree::ResourceStore;
use tlog_types::error::{PipelineError, StorageError};

/// Runs the append flush contract for one log.
pub struct AppendPipeline {
    space_id: String,
    origin: String,
    resources: Arc<ResourceStore>,
    store: Arc<StateStore>,
    signer: Arc<CheckpointSigner>,
    persister: Arc<Persister>,
    lock: AsyncMutex<()>,
}

impl AppendPipeline {
    /// Builds a pipeline for one log. `origin` is the checkpoint origin
    /// line (service prefix + log identifier).
    pub fn new(
        space_id: impl Into<String>,
        origin: impl Into<String>,
        resources: Arc<ResourceStore>,
        store: Arc<StateStore>,
        signer: Arc<CheckpointSigner>,
        persister: Arc<Persister>,
    ) -> Arc<Self> {
        Arc::new(Self {
            space_id: space_id.into(),
            origin: origin.into(),
            resources,
            store,
            signer,
            persister,
            lock: AsyncMutex::new(()),
        })
    }

    /// Adapts this pipeline into a [`FlushFn`] an `EntryBatcher` (4.G) can
    /// dispatch batches to.
    pub fn flush_fn(self: &Arc<Self>) -> FlushFn {
        let this = self.clone();
        Arc::new(move |batch: Vec<QueuedEntry>| -> BoxFuture<'static, FlushResult> {
            let this = this.clone();
            Box::pin(async move { this.flush(batch).await })
        })
    }

    /// The optimistic-concurrency precondition behind `tlog/append`'s
    /// `index_cid` field: the caller's expected head must match the log's
    /// current index-CAR root (both absent is the no-index-yet case).
    pub async fn check_expected_head(&self, expected: Option<&str>) -> Result<(), PipelineError> {
        let (actual_cid, _tree_size) = self.store.get_head().await?;
        let actual = actual_cid.map(|id| id.to_cid_string());
        if expected.map(str::to_string) != actual {
            return Err(PipelineError::HeadMismatch {
                expected: expected.unwrap_or("<none>").to_string(),
                actual: actual.unwrap_or_else(|| "<none>".to_string()),
            });
        }
        Ok(())
    }

    async fn flush(self: Arc<Self>, batch: Vec<QueuedEntry>) -> FlushResult {
        let _guard = self.lock.lock().await;
        match self.flush_locked(&batch).await {
            Ok((outcomes, token)) => {
                for (entry, outcome) in batch.into_iter().zip(outcomes) {
                    entry.respond(Ok(outcome));
                }
                if let Some(token) = token {
                    let persister = self.persister.clone();
                    tokio::spawn(async move {
                        persister.trigger(token);
                    });
                }
                Ok(())
            }
            Err(error) => Err((error, batch)),
        }
    }

    async fn flush_locked(
        &self,
        batch: &[QueuedEntry],
    ) -> Result<(Vec<AppendOutcome>, Option<CapabilityToken>), PipelineError> {
        let state = self
            .store
            .get_log_state()
            .await?
            .ok_or(PipelineError::LogNotFound)?;
        let from_size = state.tree_size;

        let entries: Vec<Vec<u8>> = batch.iter().map(|queued| queued.entry.clone()).collect();
        let token = batch.iter().find_map(|queued| queued.token.clone());

        let result =
            tlog_tree::extend(&self.resources, &self.space_id, from_size, &entries, token.as_ref())
                .await?;

        self.store
            .set_tree_state(result.new_size, result.new_root, now_ms())
            .await?;

        // At-least-once: a retry here is harmless, since checkpoints for
        // the same (size, root) are interchangeable regardless of which
        // signature line wins.
        let checkpoint = self
            .signer
            .sign(&self.origin, result.new_size, &result.new_root)
            .map_err(|error| {
                PipelineError::Persistence(StorageError::Backend(format!("checkpoint signing: {error}")))
            })?;
        self.resources
            .put_checkpoint(&self.space_id, checkpoint.to_bytes(), token.as_ref())
            .await?;

        let outcomes = (0..entries.len())
            .map(|i| AppendOutcome {
                index: from_size + i as u64,
                tree_size: result.new_size,
            })
            .collect();
        Ok((outcomes, token))
    }
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use tlog_blob::BlobClient;
    use tlog_crypto::{Ability, TokenClaims};
    use tlog_index::{CidIndex, ObjectStore};
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

    async fn fixture() -> (Arc<AppendPipeline>, Arc<ResourceStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(StateStore::open(dir.path(), "did:key:zSpace").await.expect("open"));
        store.create_log(0).await.expect("create");
        let index = Arc::new(CidIndex::rehydrate(store.clone()).await.expect("rehydrate"));
        let client: Arc<dyn BlobClient> = MemoryBlobClient::new();
        let persister = Persister::new("did:key:zSpace", index.clone(), client.clone(), store.clone());
        let persister_for_dirty = persister.clone();
        let objects = Arc::new(ObjectStore::new(client, index, move || persister_for_dirty.mark_dirty()));
        let resources = Arc::new(ResourceStore::new(objects));
        let signer = Arc::new(CheckpointSigner::generate("node-a").expect("generate"));
        let pipeline = AppendPipeline::new(
            "did:key:zSpace",
            "tlog://node-a/did:key:zSpace",
            resources.clone(),
            store,
            signer,
            persister,
        );
        (pipeline, resources, dir)
    }

    #[tokio::test]
    async fn flushes_a_batch_and_assigns_sequential_indices() {
        let (pipeline, _resources, _dir) = fixture().await;
        let flush = pipeline.flush_fn();

        let (e0, rx0) = QueuedEntry::new(b"one".to_vec(), Some(token()));
        let (e1, rx1) = QueuedEntry::new(b"two".to_vec(), Some(token()));
        flush(vec![e0, e1]).await.expect("flush succeeds");

        let outcome0 = rx0.await.expect("recv").expect("ok");
        let outcome1 = rx1.await.expect("recv").expect("ok");
        assert_eq!(outcome0.index, 0);
        assert_eq!(outcome1.index, 1);
        assert_eq!(outcome0.tree_size, 2);
        assert_eq!(outcome1.tree_size, 2);
    }

    #[tokio::test]
    async fn a_second_batch_continues_from_the_prior_tree_size() {
        let (pipeline, _resources, _dir) = fixture().await;
        let flush = pipeline.flush_fn();

        let (e0, rx0) = QueuedEntry::new(b"one".to_vec(), Some(token()));
        flush(vec![e0]).await.expect("flush succeeds");
        rx0.await.expect("recv").expect("ok");

        let (e1, rx1) = QueuedEntry::new(b"two".to_vec(), Some(token()));
        flush(vec![e1]).await.expect("flush succeeds");
        let outcome1 = rx1.await.expect("recv").expect("ok");
        assert_eq!(outcome1.index, 1);
        assert_eq!(outcome1.tree_size, 2);
    }

    #[tokio::test]
    async fn check_expected_head_matches_absent_head_on_a_fresh_log() {
        let (pipeline, _resources, _dir) = fixture().await;
        assert!(pipeline.check_expected_head(None).await.is_ok());
        let err = pipeline.check_expected_head(Some("bogus")).await.unwrap_err();
        assert!(matches!(err, PipelineError::HeadMismatch { .. }));
    }

    #[tokio::test]
    async fn publishes_a_checkpoint_signed_for_the_new_root() {
        let (pipeline, resources, _dir) = fixture().await;
        let flush = pipeline.flush_fn();
        let (e0, rx0) = QueuedEntry::new(b"one".to_vec(), Some(token()));
        flush(vec![e0]).await.expect("flush succeeds");
        rx0.await.expect("recv").expect("ok");

        let bytes = resources
            .get_checkpoint()
            .await
            .expect("get checkpoint")
            .expect("checkpoint published");
        assert!(!bytes.is_empty());
    }
}
