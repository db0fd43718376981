//! Scheduling for the index-CAR persister (component 4.I).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tlog_blob::BlobClient;
use tlog_crypto::CapabilityToken;
use tlog_index::CidIndex;
use tlog_storage::StateStore;
use tlog_telemetry::maintenance_metrics;
use tlog_types::entities::IndexPersistMeta;
use tlog_types::error::PersistError;
use tlog_types::DEFAULT_PERSIST_MIN_INTERVAL_SECS;

use crate::dag::{encode_car, package_index};

struct State {
    in_progress: bool,
    dirty: bool,
    pending_context: Option<CapabilityToken>,
    last_started: Option<Instant>,
    version: u64,
}

/// Packages the path→content-id mirror into a directory DAG and uploads it
/// through the blob backend's `uploadCAR` operation, rate-limited and
/// single-flight per log.
pub struct Persister {
    space_id: String,
    index: Arc<CidIndex>,
    client: Arc<dyn BlobClient>,
    store: Arc<StateStore>,
    min_interval: Duration,
    state: Mutex<State>,
}

impl Persister {
    /// Builds a persister for one log. `min_interval` gates how often a new
    /// upload may start (spec §4.I, §5: default 10s).
    pub fn new(
        space_id: impl Into<String>,
        index: Arc<CidIndex>,
        client: Arc<dyn BlobClient>,
        store: Arc<StateStore>,
    ) -> Arc<Self> {
        Self::with_min_interval(
            space_id,
            index,
            client,
            store,
            Duration::from_secs(DEFAULT_PERSIST_MIN_INTERVAL_SECS),
        )
    }

    /// As [`Persister::new`], with an explicit rate-limit interval (for tests).
    pub fn with_min_interval(
        space_id: impl Into<String>,
        index: Arc<CidIndex>,
        client: Arc<dyn BlobClient>,
        store: Arc<StateStore>,
        min_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            space_id: space_id.into(),
            index,
            client,
            store,
            min_interval,
            state: Mutex::new(State {
                in_progress: false,
                dirty: false,
                pending_context: None,
                last_started: None,
                version: 0,
            }),
        })
    }

    /// The dirty signal from 4.D: marks the index changed. Carries no
    /// capability, so on its own it cannot start an upload — it only
    /// ensures a later `trigger` (or the post-upload recheck) knows a
    /// fresh persist is owed.
    pub fn mark_dirty(&self) {
        self.state.lock().expect("persister state poisoned").dirty = true;
    }

    /// Triggered by the append pipeline after a successful flush (spec
    /// §4.H step 7), carrying the request's capability token on a detached
    /// context. Preserves the *earliest* pending context: a trigger arriving
    /// mid-persist does not overwrite one already waiting.
    pub fn trigger(self: &Arc<Self>, token: CapabilityToken) {
        {
            let mut state = self.state.lock().expect("persister state poisoned");
            state.dirty = true;
            if state.pending_context.is_none() {
                state.pending_context = Some(token);
            }
        }
        self.maybe_start();
    }

    fn maybe_start(self: &Arc<Self>) {
        let token = {
            let mut state = self.state.lock().expect("persister state poisoned");
            if state.in_progress || !state.dirty {
                return;
            }
            if let Some(last) = state.last_started {
                if last.elapsed() < self.min_interval {
                    // The pending context survives the window; nothing to
                    // do until a later trigger (or the post-upload recheck)
                    // calls maybe_start again past the deadline.
                    return;
                }
            }
            let Some(token) = state.pending_context.take() else {
                return;
            };
            state.in_progress = true;
            state.dirty = false;
            state.last_started = Some(Instant::now());
            token
        };
        let this = self.clone();
        tokio::spawn(async move {
            this.run(token).await;
        });
    }

    async fn run(self: Arc<Self>, token: CapabilityToken) {
        let result = self.upload(&token).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        maintenance_metrics().inc_index_persists(&self.space_id, outcome);

        let mut state = self.state.lock().expect("persister state poisoned");
        state.in_progress = false;
        match result {
            Ok(()) => {
                if state.dirty {
                    // The index changed again during the upload; schedule a follow-up.
                    if state.pending_context.is_none() {
                        state.pending_context = Some(token);
                    }
                } else {
                    state.pending_context = None;
                }
            }
            Err(error) => {
                tracing::warn!(space_id = %self.space_id, error = %error, "index CAR persist failed");
                state.dirty = true;
                if state.pending_context.is_none() {
                    state.pending_context = Some(token);
                }
            }
        }
        drop(state);
        self.maybe_start();
    }

    async fn upload(&self, token: &CapabilityToken) -> Result<(), PersistError> {
        let paths = self.index.snapshot();
        let packaged = package_index(&paths);
        let bytes = encode_car(&packaged);
        maintenance_metrics().set_index_persist_bytes(&self.space_id, bytes.len() as u64);

        let root_cid = self.client.upload_car(&self.space_id, bytes, token).await?;

        let mut state = self.state.lock().expect("persister state poisoned");
        state.version += 1;
        let version = state.version;
        drop(state);

        self.store
            .set_index_persistence(IndexPersistMeta {
                root_cid,
                version,
                entry_count: packaged.entry_count,
                last_upload_ms: now_ms(),
            })
            .await?;
        Ok(())
    }

    /// Whether an upload is currently in flight (test/diagnostic use).
    pub fn in_progress(&self) -> bool {
        self.state.lock().expect("persister state poisoned").in_progress
    }

    /// Whether the index has unpersisted changes (test/diagnostic use).
    pub fn is_dirty(&self) -> bool {
        self.state.lock().expect("persister state poisoned").dirty
    }

    /// Whether a capability token is queued for the next run (test/diagnostic use).
    pub fn has_pending_context(&self) -> bool {
        self.state.lock().expect("persister state poisoned").pending_context.is_some()
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
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tlog_crypto::{Ability, TokenClaims};
    use tlog_types::{BlobError, ContentId};

    struct FakeClient {
        uploads: AtomicUsize,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl BlobClient for FakeClient {
        async fn upload_blob(&self, _s: &str, bytes: Vec<u8>, _t: &CapabilityToken) -> Result<ContentId, BlobError> {
            Ok(ContentId::of(&bytes))
        }

        async fn upload_car(&self, _s: &str, bytes: Vec<u8>, _t: &CapabilityToken) -> Result<ContentId, BlobError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(BlobError::Unavailable("simulated".into()));
            }
            Ok(ContentId::of(&bytes))
        }

        async fn fetch_blob(&self, _content_id: ContentId) -> Result<Vec<u8>, BlobError> {
            Err(BlobError::NotFound)
        }

        async fn remove_blob(&self, _s: &str, _digest: ContentId, _t: &CapabilityToken) -> Result<(), BlobError> {
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

    async fn fixture(
        min_interval: Duration,
    ) -> (Arc<Persister>, Arc<FakeClient>, Arc<CidIndex>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(StateStore::open(dir.path(), "did:key:zSpace").await.expect("open"));
        store.create_log(0).await.expect("create");
        let index = Arc::new(CidIndex::rehydrate(store.clone()).await.expect("rehydrate"));
        let client = Arc::new(FakeClient {
            uploads: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        });
        let persister = Persister::with_min_interval(
            "did:key:zSpace",
            index.clone(),
            client.clone() as Arc<dyn BlobClient>,
            store,
            min_interval,
        );
        (persister, client, index, dir)
    }

    async fn wait_until_idle(p: &Persister) {
        for _ in 0..200 {
            if !p.in_progress() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("persister never became idle");
    }

    #[tokio::test]
    async fn trigger_uploads_and_clears_dirty() {
        let (p, client, index, _dir) = fixture(Duration::ZERO).await;
        index.set("checkpoint", ContentId::of(b"a")).await.expect("set");
        p.trigger(token());
        wait_until_idle(&p).await;
        assert_eq!(client.uploads.load(Ordering::SeqCst), 1);
        assert!(!p.is_dirty());
        assert!(!p.has_pending_context());
    }

    #[tokio::test]
    async fn second_trigger_during_upload_keeps_a_pending_context_for_a_follow_up() {
        let (p, client, index, _dir) = fixture(Duration::from_secs(60)).await;
        index.set("checkpoint", ContentId::of(b"a")).await.expect("set");
        p.trigger(token());
        // Arrives before the in-flight run completes.
        p.mark_dirty();
        wait_until_idle(&p).await;
        assert_eq!(client.uploads.load(Ordering::SeqCst), 1);
        assert!(p.is_dirty());
    }

    #[tokio::test]
    async fn failed_upload_keeps_dirty_and_pending_context_for_retry() {
        let (p, client, index, _dir) = fixture(Duration::from_secs(60)).await;
        index.set("checkpoint", ContentId::of(b"a")).await.expect("set");
        client.fail_next.store(true, Ordering::SeqCst);
        p.trigger(token());
        wait_until_idle(&p).await;
        assert_eq!(client.uploads.load(Ordering::SeqCst), 1);
        assert!(p.is_dirty());
        assert!(p.has_pending_context());
    }

    #[tokio::test]
    async fn rate_limit_defers_a_second_run_until_the_window_closes() {
        let (p, client, index, _dir) = fixture(Duration::from_millis(50)).await;
        index.set("checkpoint", ContentId::of(b"a")).await.expect("set");
        p.trigger(token());
        wait_until_idle(&p).await;
        assert_eq!(client.uploads.load(Ordering::SeqCst), 1);

        // A trigger arriving inside the rate-limit window does not start a
        // second run immediately.
        index.set("checkpoint-2", ContentId::of(b"b")).await.expect("set");
        p.trigger(token());
        assert!(p.is_dirty() || p.in_progress());

        tokio::time::sleep(Duration::from_millis(80)).await;
        p.trigger(token());
        wait_until_idle(&p).await;
        assert_eq!(client.uploads.load(Ordering::SeqCst), 2);
    }
}
