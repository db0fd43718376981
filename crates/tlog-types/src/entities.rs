//! Per-log entities persisted by the state store (spec §3).

use serde::{Deserialize, Serialize};

use crate::cid::ContentId;

/// A log's durable, mutable summary: tree size, root, and timestamps.
///
/// Tree size is nondecreasing; `root` always equals the Merkle root of the
/// first `size` leaves (spec invariant 1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogState {
    /// Opaque tenant-space identifier (e.g. a DID-like string).
    pub space_id: String,
    /// Unix-epoch milliseconds at which the log row was first created.
    pub created_at_ms: i64,
    /// Unix-epoch milliseconds of the last successful append.
    pub updated_at_ms: i64,
    /// Current tree size (count of integrated leaves).
    pub tree_size: u64,
    /// Current Merkle root.
    pub root: [u8; 32],
}

/// A signed `(origin, size, root)` statement, published at the `checkpoint` path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    /// Stable origin string derived from the service prefix and the log identifier.
    pub origin: String,
    /// Tree size this checkpoint commits to.
    pub size: u64,
    /// Merkle root this checkpoint commits to.
    pub root: [u8; 32],
    /// One or more `origin signer-id base64(signature)` lines.
    pub signatures: Vec<String>,
}

impl Checkpoint {
    /// The canonical unsigned body: `"{origin}\n{size}\n{root_b64}\n"`, matching
    /// the tlog-tiles checkpoint text format that signatures are computed over.
    pub fn signed_body(origin: &str, size: u64, root: &[u8; 32]) -> String {
        use base64::Engine;
        let root_b64 = base64::engine::general_purpose::STANDARD.encode(root);
        format!("{origin}\n{size}\n{root_b64}\n")
    }

    /// Serializes the full checkpoint (body + signature lines) to the bytes
    /// published at the `checkpoint` path.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Self::signed_body(&self.origin, self.size, &self.root).into_bytes();
        out.push(b'\n');
        for line in &self.signatures {
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        out
    }
}

/// One revocation record: the content-id of a revoked capability token, and when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Revocation {
    /// Content-id of the revoked token blob.
    pub token_cid: ContentId,
    /// Unix-epoch milliseconds at which the revocation was recorded.
    pub revoked_at_ms: i64,
}

/// Metadata about the most recently uploaded index-CAR package (spec §3, 4.I).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexPersistMeta {
    /// Content-id of the root of the packaged directory DAG.
    pub root_cid: ContentId,
    /// Monotonically increasing version counter for this log's index CAR.
    pub version: u64,
    /// Number of path→content-id entries packaged at upload time.
    pub entry_count: u64,
    /// Unix-epoch milliseconds of the upload.
    pub last_upload_ms: i64,
}

/// The garbage collector's sweep cursor: the tree size already attempted (spec §3, 4.J).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GcProgress {
    /// Tree size up to which partial-bundle cleanup has been attempted.
    pub from_size: u64,
}
