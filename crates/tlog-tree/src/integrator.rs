//! The Merkle integrator (component 4.F): extends the tree by a batch of
//! new leaves, threading the entry-bundle update in parallel, and writes
//! every dirty tile/bundle back through the resource store (4.E).
//!
//! Computation and validation happen entirely before any write: a failure
//! at any step aborts the integration atomically and nothing reaches 4.D
//! (spec §4.F, "Failures in any step abort the integration atomically").

use std::collections::HashMap;

use futures::future::try_join_all;

use tlog_crypto::CapabilityToken;
use tlog_types::error::IntegrationError;

use crate::bucket::buckets;
use crate::hash::{empty_root, leaf_hash, node_hash, root_from_peaks, stored_node_count, Hash};
use crate::resource_store::ResourceStore;
use crate::tile::WIDTH;

/// The outcome of extending the tree by one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationResult {
    /// The tree size after the batch.
    pub new_size: u64,
    /// The Merkle root at `new_size`.
    pub new_root: Hash,
}

/// Extends the tree from `from_size` by `entries`, one leaf per entry, each
/// already length-framed for the entry bundle encoding.
///
/// Runs tile integration and entry-bundle writing concurrently, matching
/// spec §4.F's "entry-bundle update runs in parallel to integration."
pub async fn extend(
    resources: &ResourceStore,
    space_id: &str,
    from_size: u64,
    entries: &[Vec<u8>],
    token: Option<&CapabilityToken>,
) -> Result<IntegrationResult, IntegrationError> {
    if entries.is_empty() {
        let root = current_root(resources, from_size).await?;
        return Ok(IntegrationResult { new_size: from_size, new_root: root });
    }

    let leaves: Vec<Hash> = entries.iter().map(|e| leaf_hash(e)).collect();
    let new_size = from_size + leaves.len() as u64;

    let (dirty_tiles, new_root) = compute_dirty_tiles(resources, from_size, new_size, &leaves).await?;
    let dirty_bundles = compute_dirty_bundles(resources, from_size, new_size, entries).await?;

    let tile_writes = dirty_tiles.into_iter().map(|(level, index, partial, hashes)| {
        resources.put_tile(space_id, level, index, partial, &hashes, token)
    });
    let bundle_writes = dirty_bundles.into_iter().map(|(index, partial, items)| {
        resources.put_entry_bundle(space_id, index, partial, &items, token)
    });

    try_join_all(tile_writes).await?;
    try_join_all(bundle_writes).await?;

    Ok(IntegrationResult { new_size, new_root })
}

/// Recomputes the root at `size` with no new leaves to integrate, by
/// re-fetching the existing peak tiles.
pub async fn current_root(resources: &ResourceStore, size: u64) -> Result<Hash, IntegrationError> {
    if size == 0 {
        return Ok(empty_root());
    }
    let peaks = fetch_peaks(resources, size, size).await?;
    root_from_peaks(size, |level, index| peak_lookup(&peaks, level, index, size))
}

/// Fetches the hash of every "peak" node (the rightmost defined node at
/// each level whose bit is set in `size`), as they stood at `as_of_size`.
async fn fetch_peaks(
    resources: &ResourceStore,
    size: u64,
    as_of_size: u64,
) -> Result<HashMap<(u32, u64), Hash>, IntegrationError> {
    let mut peaks = HashMap::new();
    for level in 0..64u32 {
        if (size >> level) & 1 == 0 {
            if size >> (level + 1) == 0 {
                break;
            }
            continue;
        }
        let index = stored_node_count(level, size) - 1;
        let hash = fetch_stored_node(resources, level, index, as_of_size).await?;
        peaks.insert((level, index), hash);
        if size >> (level + 1) == 0 {
            break;
        }
    }
    Ok(peaks)
}

fn peak_lookup(
    peaks: &HashMap<(u32, u64), Hash>,
    level: u32,
    index: u64,
    size: u64,
) -> Result<Hash, IntegrationError> {
    peaks.get(&(level, index)).copied().ok_or_else(|| IntegrationError::Inconsistent {
        from_size: size,
        reason: format!("missing peak at level {level} index {index}"),
    })
}

/// Fetches one previously-stored node hash, computing which tile (full or
/// partial) holds it as of a tree of `size` leaves.
async fn fetch_stored_node(
    resources: &ResourceStore,
    level: u32,
    index: u64,
    size: u64,
) -> Result<Hash, IntegrationError> {
    let count = stored_node_count(level, size);
    let tile_index = index / WIDTH as u64;
    let last_tile_index = (count - 1) / WIDTH as u64;
    let partial = if tile_index < last_tile_index {
        0
    } else {
        let width = count - last_tile_index * WIDTH as u64;
        if width as usize == WIDTH { 0 } else { width as u16 }
    };
    let tile = resources.get_tile(level, tile_index, partial).await?.ok_or_else(|| {
        IntegrationError::Inconsistent {
            from_size: size,
            reason: format!("missing tile at level {level} index {tile_index} (partial {partial})"),
        }
    })?;
    let offset = (index - tile_index * WIDTH as u64) as usize;
    tile.get(offset).copied().ok_or_else(|| IntegrationError::Inconsistent {
        from_size: size,
        reason: format!("tile at level {level} index {tile_index} too short for offset {offset}"),
    })
}

/// Returns the hash at `(level, index)`, from `fresh` if this pass just
/// computed it, otherwise by fetching the tile that held it before the
/// batch (`from_size`).
async fn node_at(
    resources: &ResourceStore,
    fresh: &HashMap<(u32, u64), Hash>,
    level: u32,
    index: u64,
    from_size: u64,
) -> Result<Hash, IntegrationError> {
    if let Some(hash) = fresh.get(&(level, index)) {
        return Ok(*hash);
    }
    fetch_stored_node(resources, level, index, from_size).await
}

/// Computes every newly-defined node hash from `from_size` to `new_size`,
/// groups them into their dirty tiles (preloading any tile that was
/// partially filled before this batch), and returns the new root alongside
/// the tiles to write: `(level, tile_index, partial, hashes)`.
async fn compute_dirty_tiles(
    resources: &ResourceStore,
    from_size: u64,
    new_size: u64,
    leaves: &[Hash],
) -> Result<(Vec<(u32, u64, u16, Vec<Hash>)>, Hash), IntegrationError> {
    let mut fresh: HashMap<(u32, u64), Hash> = HashMap::new();
    let mut dirty: Vec<(u32, u64, u16, Vec<Hash>)> = Vec::new();

    let mut level: u32 = 0;
    loop {
        let old_count = stored_node_count(level, from_size);
        let new_count = stored_node_count(level, new_size);
        if old_count == new_count {
            break;
        }

        for idx in old_count..new_count {
            let hash = if level == 0 {
                leaves[(idx - from_size) as usize]
            } else {
                let left = node_at(resources, &fresh, level - 1, idx * 2, from_size).await?;
                let right = node_at(resources, &fresh, level - 1, idx * 2 + 1, from_size).await?;
                node_hash(&left, &right)
            };
            fresh.insert((level, idx), hash);
        }

        for bucket in buckets(old_count, new_count) {
            let mut hashes = if bucket.needs_preload {
                resources
                    .get_tile(level, bucket.index, (old_count - bucket.index * WIDTH as u64) as u16)
                    .await?
                    .ok_or_else(|| IntegrationError::Inconsistent {
                        from_size,
                        reason: format!("expected partial tile at level {level} index {}", bucket.index),
                    })?
            } else {
                Vec::new()
            };
            for idx in bucket.new_range.clone() {
                hashes.push(fresh[&(level, idx)]);
            }
            let width = hashes.len();
            let partial = if width == WIDTH { 0 } else { width as u16 };
            dirty.push((level, bucket.index, partial, hashes));
        }

        level += 1;
    }

    let peaks = fetch_peaks_with_fresh(resources, new_size, from_size, &fresh).await?;
    let new_root = root_from_peaks(new_size, |level, index| peak_lookup(&peaks, level, index, new_size))?;

    Ok((dirty, new_root))
}

/// Like [`fetch_peaks`], but serves a peak out of `fresh` first when this
/// batch computed it.
async fn fetch_peaks_with_fresh(
    resources: &ResourceStore,
    size: u64,
    as_of_size: u64,
    fresh: &HashMap<(u32, u64), Hash>,
) -> Result<HashMap<(u32, u64), Hash>, IntegrationError> {
    let mut peaks = HashMap::new();
    if size == 0 {
        return Ok(peaks);
    }
    for level in 0..64u32 {
        if (size >> level) & 1 == 0 {
            if size >> (level + 1) == 0 {
                break;
            }
            continue;
        }
        let index = stored_node_count(level, size) - 1;
        let hash = if let Some(h) = fresh.get(&(level, index)) {
            *h
        } else {
            fetch_stored_node(resources, level, index, as_of_size).await?
        };
        peaks.insert((level, index), hash);
        if size >> (level + 1) == 0 {
            break;
        }
    }
    Ok(peaks)
}

async fn compute_dirty_bundles(
    resources: &ResourceStore,
    from_size: u64,
    new_size: u64,
    entries: &[Vec<u8>],
) -> Result<Vec<(u64, u16, Vec<Vec<u8>>)>, IntegrationError> {
    let mut dirty = Vec::new();
    for bucket in buckets(from_size, new_size) {
        let mut items = if bucket.needs_preload {
            resources
                .get_entry_bundle(bucket.index, (from_size - bucket.index * WIDTH as u64) as u16)
                .await?
                .ok_or_else(|| IntegrationError::Inconsistent {
                    from_size,
                    reason: format!("expected partial entry bundle at index {}", bucket.index),
                })?
        } else {
            Vec::new()
        };
        for idx in bucket.new_range.clone() {
            items.push(entries[(idx - from_size) as usize].clone());
        }
        let width = items.len();
        let partial = if width == WIDTH { 0 } else { width as u16 };
        dirty.push((bucket.index, partial, items));
    }
    Ok(dirty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use proptest::prelude::*;
    use tlog_blob::BlobClient;
    use tlog_crypto::{Ability, TokenClaims};
    use tlog_index::{CidIndex, ObjectStore};
    use tlog_types::ContentId;

    struct MemoryBlobClient {
        blobs: std::sync::Mutex<HashMap<ContentId, Vec<u8>>>,
    }

    impl MemoryBlobClient {
        fn new() -> Self {
            Self { blobs: std::sync::Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl BlobClient for MemoryBlobClient {
        async fn upload_blob(
            &self,
            _space_id: &str,
            bytes: Vec<u8>,
            _token: &CapabilityToken,
        ) -> Result<ContentId, tlog_types::BlobError> {
            let id = ContentId::of(&bytes);
            self.blobs.lock().expect("poisoned").insert(id, bytes);
            Ok(id)
        }

        async fn upload_car(
            &self,
            space_id: &str,
            bytes: Vec<u8>,
            token: &CapabilityToken,
        ) -> Result<ContentId, tlog_types::BlobError> {
            self.upload_blob(space_id, bytes, token).await
        }

        async fn fetch_blob(&self, content_id: ContentId) -> Result<Vec<u8>, tlog_types::BlobError> {
            self.blobs
                .lock()
                .expect("poisoned")
                .get(&content_id)
                .cloned()
                .ok_or(tlog_types::BlobError::NotFound)
        }

        async fn remove_blob(
            &self,
            _space_id: &str,
            _digest: ContentId,
            _token: &CapabilityToken,
        ) -> Result<(), tlog_types::BlobError> {
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

    async fn resource_store() -> (ResourceStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let state_store = tlog_storage::StateStore::open(dir.path(), "did:key:zSpace")
            .await
            .expect("open");
        state_store.create_log(0).await.expect("create");
        let index = Arc::new(CidIndex::rehydrate(Arc::new(state_store)).await.expect("rehydrate"));
        let client: Arc<dyn BlobClient> = Arc::new(MemoryBlobClient::new());
        let objects = Arc::new(ObjectStore::new(client, index, || {}));
        (ResourceStore::new(objects), dir)
    }

    fn entries(n: u64) -> Vec<Vec<u8>> {
        (0..n).map(|i| format!("entry-{i}").into_bytes()).collect()
    }

    /// Hand-computes the root for a set of leaves the same way `hash::root_from_peaks`
    /// does, but directly from the leaf hashes, as an independent check on `extend`.
    fn expected_root(leaves: &[Hash]) -> Hash {
        fn build(leaves: &[Hash]) -> Hash {
            match leaves.len() {
                0 => empty_root(),
                1 => leaves[0],
                n => {
                    let split = largest_pow2_less_than(n);
                    node_hash(&build(&leaves[..split]), &build(&leaves[split..]))
                }
            }
        }
        fn largest_pow2_less_than(n: usize) -> usize {
            let mut k = 1;
            while k * 2 < n {
                k *= 2;
            }
            k
        }
        build(leaves)
    }

    #[tokio::test]
    async fn extend_from_empty_matches_hand_computed_root() {
        let (resources, _dir) = resource_store().await;
        let batch = entries(5);
        let leaves: Vec<Hash> = batch.iter().map(|e| leaf_hash(e)).collect();

        let result = extend(&resources, "did:key:zSpace", 0, &batch, Some(&token()))
            .await
            .expect("extend");

        assert_eq!(result.new_size, 5);
        assert_eq!(result.new_root, expected_root(&leaves));
    }

    #[tokio::test]
    async fn extend_in_two_batches_matches_a_single_batch() {
        let (resources, _dir) = resource_store().await;
        let t = token();

        let first = entries(3);
        let r1 = extend(&resources, "did:key:zSpace", 0, &first, Some(&t)).await.expect("extend 1");
        assert_eq!(r1.new_size, 3);

        let second = entries(7);
        let second = second[3..].to_vec();
        let r2 = extend(&resources, "did:key:zSpace", 3, &second, Some(&t)).await.expect("extend 2");
        assert_eq!(r2.new_size, 7);

        let all: Vec<Hash> = entries(7).iter().map(|e| leaf_hash(e)).collect();
        assert_eq!(r2.new_root, expected_root(&all));
    }

    #[tokio::test]
    async fn current_root_matches_the_root_returned_by_extend() {
        let (resources, _dir) = resource_store().await;
        let t = token();
        let batch = entries(9);
        let result = extend(&resources, "did:key:zSpace", 0, &batch, Some(&t)).await.expect("extend");

        let recomputed = current_root(&resources, result.new_size).await.expect("current_root");
        assert_eq!(recomputed, result.new_root);
    }

    #[tokio::test]
    async fn extend_with_no_entries_returns_current_root_unchanged() {
        let (resources, _dir) = resource_store().await;
        let t = token();
        let batch = entries(4);
        let result = extend(&resources, "did:key:zSpace", 0, &batch, Some(&t)).await.expect("extend");

        let again = extend(&resources, "did:key:zSpace", result.new_size, &[], Some(&t))
            .await
            .expect("extend empty");
        assert_eq!(again.new_size, result.new_size);
        assert_eq!(again.new_root, result.new_root);
    }

    #[tokio::test]
    async fn entry_bundles_round_trip_through_the_resource_store() {
        let (resources, _dir) = resource_store().await;
        let t = token();
        let batch = entries(300);
        let result = extend(&resources, "did:key:zSpace", 0, &batch, Some(&t)).await.expect("extend");
        assert_eq!(result.new_size, 300);

        let first_bundle = resources.get_entry_bundle(0, 0).await.expect("get").expect("present");
        assert_eq!(first_bundle.len(), 256);
        assert_eq!(first_bundle[0], batch[0]);

        let second_bundle = resources.get_entry_bundle(1, 44).await.expect("get").expect("present");
        assert_eq!(second_bundle.len(), 44);
        assert_eq!(second_bundle[0], batch[256]);
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("current-thread runtime")
            .block_on(fut)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        // Splitting the same entry sequence into two successive batches
        // (instead of one) must fold to the same root: the compact-range
        // merge is associative over where the batch boundary falls.
        #[test]
        fn splitting_a_batch_does_not_change_the_final_root(n in 1usize..60, split_frac in 0.0f64..1.0) {
            let split = ((n as f64) * split_frac) as usize;
            let all = entries(n as u64);

            let single_root = block_on(async {
                let (resources, _dir) = resource_store().await;
                extend(&resources, "did:key:zSpace", 0, &all, Some(&token()))
                    .await
                    .expect("extend")
                    .new_root
            });

            let split_root = block_on(async {
                let (resources, _dir) = resource_store().await;
                let t = token();
                let r1 = extend(&resources, "did:key:zSpace", 0, &all[..split], Some(&t))
                    .await
                    .expect("extend first half");
                let r2 = extend(&resources, "did:key:zSpace", r1.new_size, &all[split..], Some(&t))
                    .await
                    .expect("extend second half");
                r2.new_root
            });

            prop_assert_eq!(single_root, split_root);
        }
    }
}
