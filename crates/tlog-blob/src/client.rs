//! The backend blob client abstraction (spec §6, "Backend blob client").
//!
//! One trait, four operations, so the object store (4.D) and the index-CAR
//! persister (4.I) are written against a capability-agnostic interface and
//! never reach for a concrete client directly (spec §9, "Polymorphism over
//! capability sets").

use async_trait::async_trait;
use tlog_crypto::CapabilityToken;
use tlog_types::{BlobError, ContentId};

/// A backend that can store and retrieve content-addressed blobs on behalf
/// of one or more spaces.
#[async_trait]
pub trait BlobClient: Send + Sync {
    /// Uploads a single blob and blocks until it is confirmed stored.
    ///
    /// Confirmation means a full allocate→PUT→conclude round trip plus a
    /// receipt poll; the returned content-id is safe to record in the
    /// path→content-id index immediately.
    async fn upload_blob(
        &self,
        space_id: &str,
        bytes: Vec<u8>,
        token: &CapabilityToken,
    ) -> Result<ContentId, BlobError>;

    /// Uploads a CAR (Content Addressable aRchive) file, returning the
    /// content-id of its root block.
    async fn upload_car(
        &self,
        space_id: &str,
        car_bytes: Vec<u8>,
        token: &CapabilityToken,
    ) -> Result<ContentId, BlobError>;

    /// Fetches a blob's bytes by content-id. Read access needs no token.
    async fn fetch_blob(&self, content_id: ContentId) -> Result<Vec<u8>, BlobError>;

    /// Removes a blob by its multihash digest.
    async fn remove_blob(
        &self,
        space_id: &str,
        digest: ContentId,
        token: &CapabilityToken,
    ) -> Result<(), BlobError>;
}
