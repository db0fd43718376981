//! The tile/bundle resource store (component 4.E): translates
//! `(level, index, partial)` and `(bundleIndex, partial)` into paths and
//! delegates bytes to the object store (4.D); also reads/writes the
//! `checkpoint` path.

use std::sync::Arc;

use tlog_crypto::CapabilityToken;
use tlog_index::ObjectStore;
use tlog_types::error::IntegrationError;
use tlog_types::{path, BlobError};

use crate::bundle::{decode_bundle, encode_bundle};
use crate::hash::Hash;
use crate::tile::{decode_tile, encode_tile};

/// Bridges `(level, index, partial)`/`(bundleIndex, partial)` addressing to
/// the path-addressed object store.
pub struct ResourceStore {
    objects: Arc<ObjectStore>,
}

impl ResourceStore {
    /// Wraps an object store (4.D) for tile-tiles-shaped reads and writes.
    pub fn new(objects: Arc<ObjectStore>) -> Self {
        Self { objects }
    }

    /// Reads a tile, tolerating absence (the integrator treats a missing
    /// tile at a not-yet-created position as an empty starting buffer).
    pub async fn get_tile(
        &self,
        level: u32,
        index: u64,
        partial: u16,
    ) -> Result<Option<Vec<Hash>>, IntegrationError> {
        let p = path::tile_path(level as u64, index, partial);
        match self.objects.get_object(&p).await {
            Ok(bytes) => Ok(Some(decode_tile(&bytes)?)),
            Err(BlobError::NotFound) => Ok(None),
            Err(e) => Err(IntegrationError::Store(e.to_string())),
        }
    }

    /// Writes a tile at its (possibly partial) path. Every partial width
    /// occupies a distinct path, so this is always a fresh write.
    pub async fn put_tile(
        &self,
        space_id: &str,
        level: u32,
        index: u64,
        partial: u16,
        hashes: &[Hash],
        token: Option<&CapabilityToken>,
    ) -> Result<(), IntegrationError> {
        let p = path::tile_path(level as u64, index, partial);
        let bytes = encode_tile(hashes);
        self.objects
            .set_object(space_id, &p, bytes, token)
            .await
            .map_err(|e| IntegrationError::Store(e.to_string()))?;
        Ok(())
    }

    /// Reads an entry bundle, tolerating absence.
    pub async fn get_entry_bundle(
        &self,
        index: u64,
        partial: u16,
    ) -> Result<Option<Vec<Vec<u8>>>, IntegrationError> {
        let p = path::entry_bundle_path(index, partial);
        match self.objects.get_object(&p).await {
            Ok(bytes) => Ok(Some(decode_bundle(&bytes)?)),
            Err(BlobError::NotFound) => Ok(None),
            Err(e) => Err(IntegrationError::Store(e.to_string())),
        }
    }

    /// Writes an entry bundle using `setObjectIfNoneMatch`: entry bundles
    /// are immutable-by-policy once written at a given path (spec §4.D).
    pub async fn put_entry_bundle(
        &self,
        space_id: &str,
        index: u64,
        partial: u16,
        entries: &[Vec<u8>],
        token: Option<&CapabilityToken>,
    ) -> Result<(), IntegrationError> {
        let p = path::entry_bundle_path(index, partial);
        let bytes = encode_bundle(entries);
        self.objects
            .set_object_if_none_match(space_id, &p, bytes, token)
            .await
            .map_err(|e| IntegrationError::Store(e.to_string()))?;
        Ok(())
    }

    /// Reads the published checkpoint, tolerating absence (no checkpoint
    /// has ever been published for this log).
    pub async fn get_checkpoint(&self) -> Result<Option<Vec<u8>>, IntegrationError> {
        match self.objects.get_object("checkpoint").await {
            Ok(bytes) => Ok(Some(bytes.as_ref().clone())),
            Err(BlobError::NotFound) => Ok(None),
            Err(e) => Err(IntegrationError::Store(e.to_string())),
        }
    }

    /// Publishes a new checkpoint body at the `checkpoint` path.
    pub async fn put_checkpoint(
        &self,
        space_id: &str,
        bytes: Vec<u8>,
        token: Option<&CapabilityToken>,
    ) -> Result<(), IntegrationError> {
        self.objects
            .set_object(space_id, "checkpoint", bytes, token)
            .await
            .map_err(|e| IntegrationError::Store(e.to_string()))?;
        Ok(())
    }
}
