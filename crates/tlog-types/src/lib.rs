#![deny(missing_docs)]

//! # tlog-types
//!
//! Foundational data structures, constants, and error types shared by every
//! crate in the tlog workspace. As the base crate, `tlog-types` has minimal
//! dependencies and is itself a dependency of nearly everything else, so that
//! a single canonical definition of `Log`, `Checkpoint`, `ContentId`, and the
//! error hierarchy exists across the service.

/// Width of one Merkle tile / entry bundle, in leaves (fixed by the tlog-tiles layout).
pub const TILE_WIDTH: u64 = 256;

/// Default append-batch flush threshold (spec §4.G, §5).
pub const DEFAULT_BATCH_MAX_SIZE: usize = 256;

/// Default LRU blob-cache capacity per log (spec §4.D, §5).
pub const DEFAULT_BLOB_CACHE_CAPACITY: usize = 10_000;

/// Default rate-limit interval between index-CAR persists (spec §4.I).
pub const DEFAULT_PERSIST_MIN_INTERVAL_SECS: u64 = 10;

/// Default maximum number of bundles processed per garbage-collection run (spec §4.J).
pub const DEFAULT_GC_MAX_BUNDLES: usize = 100;

/// Default page size for `tlog/read` (spec §6).
pub const DEFAULT_READ_LIMIT: u64 = 100;

/// Path at which a log's signed checkpoint is published (spec §3, §6).
pub const CHECKPOINT_PATH: &str = "checkpoint";

/// Suffix appended to a space identifier to name its companion revocation log (spec §3).
pub const REVOCATION_LOG_SUFFIX: &str = "#revocations";

/// Entities: `Log`, `Checkpoint`, `Revocation`, GC progress, index-CAR metadata.
pub mod entities;
/// The canonical error hierarchy, with stable short codes for every variant.
pub mod error;
/// Content-addressed identifiers (CIDv1, raw codec, SHA-256).
pub mod cid;
/// Tile/bundle path construction and parsing (tlog-tiles layout).
pub mod path;

pub use cid::ContentId;
pub use entities::{Checkpoint, GcProgress, IndexPersistMeta, LogState, Revocation};
pub use error::{
    BlobError, CapabilityError, ErrorCode, GcError, IntegrationError, PersistError, PipelineError,
    StorageError, TlogError,
};

/// A crate-wide `Result` alias defaulting to [`TlogError`].
pub type Result<T, E = TlogError> = std::result::Result<T, E>;
