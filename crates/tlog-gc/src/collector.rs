//! Sweeps partial-tile leftovers behind sealed bundles (component 4.J).
//!
//! A bundle (and the level-0 tile covering the same leaves) is *sealed*
//! once the tree has grown past it: every `.p/<W>` object recorded for it
//! while it was still filling up is now dead weight. Once a tile is the
//! right child of its parent, the parent's own left half is fixed too, so
//! the sweep climbs the rightmost spine of sealed ancestors cleaning each
//! one's partials along the way.

use std::sync::Arc;
use std::sync::Mutex;

use tlog_blob::BlobClient;
use tlog_crypto::CapabilityToken;
use tlog_index::CidIndex;
use tlog_storage::StateStore;
use tlog_telemetry::maintenance_metrics;
use tlog_types::entities::GcProgress;
use tlog_types::error::GcError;
use tlog_types::{DEFAULT_GC_MAX_BUNDLES, TILE_WIDTH};
use tlog_types::path::{entry_bundle_path, tile_path};

/// Outcome of one [`GarbageCollector::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcReport {
    /// Number of sealed bundles fully attempted this run.
    pub bundles_processed: u64,
    /// Number of partial blobs actually removed.
    pub blobs_removed: u64,
    /// The new GC cursor (a tree size; the next run resumes from here).
    pub new_from_size: u64,
}

/// The level-0 tile position for `bundle_index`, plus every ancestor
/// reached by climbing while the current position is its parent's right
/// child. The walk stops at the first left child it reaches, since that
/// node's sibling (and thus its parent) need not be sealed yet.
fn ancestor_positions(bundle_index: u64) -> Vec<(u32, u64)> {
    let mut positions = vec![(0u32, bundle_index)];
    let mut level = 0u32;
    let mut index = bundle_index;
    while index % 2 == 1 {
        level += 1;
        index /= 2;
        positions.push((level, index));
    }
    positions
}

/// Deletes the partial-tile and partial-bundle remnants behind bundles
/// that have since sealed, through the blob backend (4.C) and the
/// path→content-id mirror (4.B). At most one run is active per log at a
/// time (the `inProgress` flag); a run is delegation-gated upstream
/// (requires a direct capability from the space owner — spec §7) before
/// [`GarbageCollector::run`] is ever called.
pub struct GarbageCollector {
    space_id: String,
    index: Arc<CidIndex>,
    client: Arc<dyn BlobClient>,
    store: Arc<StateStore>,
    in_progress: Mutex<bool>,
}

impl GarbageCollector {
    /// Builds a collector for one log.
    pub fn new(
        space_id: impl Into<String>,
        index: Arc<CidIndex>,
        client: Arc<dyn BlobClient>,
        store: Arc<StateStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            space_id: space_id.into(),
            index,
            client,
            store,
            in_progress: Mutex::new(false),
        })
    }

    /// Whether a run is currently active for this log.
    pub fn in_progress(&self) -> bool {
        *self.in_progress.lock().expect("gc state poisoned")
    }

    /// Runs one sweep, starting from the stored GC cursor and processing
    /// at most `max_bundles` sealed bundles (spec default 100). The token
    /// is forwarded to every `removeBlob` call; the caller is responsible
    /// for having already checked it carries a direct grant.
    pub async fn run(
        self: &Arc<Self>,
        max_bundles: usize,
        token: &CapabilityToken,
    ) -> Result<GcReport, GcError> {
        {
            let mut in_progress = self.in_progress.lock().expect("gc state poisoned");
            if *in_progress {
                return Err(GcError::AlreadyInProgress);
            }
            *in_progress = true;
        }
        let result = self.run_locked(max_bundles, token).await;
        *self.in_progress.lock().expect("gc state poisoned") = false;
        result
    }

    async fn run_locked(
        &self,
        max_bundles: usize,
        token: &CapabilityToken,
    ) -> Result<GcReport, GcError> {
        let progress = self.store.get_gc_progress().await?;
        let tree_size = match self.store.get_log_state().await? {
            Some(state) => state.tree_size,
            None => 0,
        };

        let mut bundle_index = progress.from_size / TILE_WIDTH;
        let mut bundles_processed = 0u64;
        let mut blobs_removed = 0u64;

        while bundles_processed < max_bundles as u64 && (bundle_index + 1) * TILE_WIDTH <= tree_size
        {
            for (level, index) in ancestor_positions(bundle_index) {
                blobs_removed += self.clean_tile_partials(level, index, token).await;
            }
            blobs_removed += self.clean_bundle_partials(bundle_index, token).await;

            bundle_index += 1;
            bundles_processed += 1;
        }

        let new_from_size = bundle_index * TILE_WIDTH;
        self.store
            .set_gc_progress(GcProgress { from_size: new_from_size })
            .await?;
        maintenance_metrics().inc_gc_runs(&self.space_id);
        maintenance_metrics().inc_gc_bundles_swept(&self.space_id, bundles_processed);

        Ok(GcReport { bundles_processed, blobs_removed, new_from_size })
    }

    async fn clean_tile_partials(&self, level: u32, index: u64, token: &CapabilityToken) -> u64 {
        let mut removed = 0;
        for width in 1u16..=255 {
            let path = tile_path(level as u64, index, width);
            removed += self.remove_if_present(&path, token).await;
        }
        removed
    }

    async fn clean_bundle_partials(&self, bundle_index: u64, token: &CapabilityToken) -> u64 {
        let mut removed = 0;
        for width in 1u16..=255 {
            let path = entry_bundle_path(bundle_index, width);
            removed += self.remove_if_present(&path, token).await;
        }
        removed
    }

    async fn remove_if_present(&self, path: &str, token: &CapabilityToken) -> u64 {
        let Some(id) = self.index.get(path) else {
            return 0;
        };
        match self.client.remove_blob(&self.space_id, id, token).await {
            Ok(()) => {
                if let Err(error) = self.index.delete(path).await {
                    tracing::warn!(path, %error, "gc: index cleanup failed after blob removal");
                }
                1
            }
            Err(error) => {
                // Best-effort: partial objects left behind are harmless
                // (they're never referenced by a checkpoint), so a single
                // failed delete doesn't stop the sweep.
                tracing::warn!(path, %error, "gc: blob removal failed, will retry next sweep");
                0
            }
        }
    }
}

/// The spec's default cap on sealed bundles processed per run.
pub const DEFAULT_MAX_BUNDLES: usize = DEFAULT_GC_MAX_BUNDLES;
