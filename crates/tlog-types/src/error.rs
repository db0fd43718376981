//! The canonical error hierarchy for the tlog service.
//!
//! Each component family gets its own `thiserror` enum with a stable,
//! machine-readable code via [`ErrorCode`]; [`TlogError`] unifies them so
//! the gateway has a single type to turn into an HTTP/JSON response
//! (spec §7).

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error,
/// used verbatim as the RPC failure-case name (spec §6 tables).
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors from the per-log relational state store (component 4.A).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying SQLite backend returned an error.
    #[error("state store backend error: {0}")]
    Backend(String),
    /// No row exists for the requested log.
    #[error("log not found")]
    NotFound,
    /// A value in the store could not be decoded.
    #[error("state store decode error: {0}")]
    Decode(String),
    /// The connection pool could not hand out a handle before its wait bound elapsed.
    #[error("state store pool exhausted")]
    PoolExhausted,
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "PERSISTENCE_BACKEND_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Decode(_) => "PERSISTENCE_DECODE_ERROR",
            Self::PoolExhausted => "PERSISTENCE_POOL_EXHAUSTED",
        }
    }
}

/// Errors from the content-addressed blob backend client (component 4.C).
#[derive(Debug, Error)]
pub enum BlobError {
    /// The capability token presented does not authorize this operation.
    #[error("no capability for this operation")]
    NoCapability,
    /// The path or content-id requested is not known.
    #[error("blob not found")]
    NotFound,
    /// The backend was unreachable or returned a transient failure.
    #[error("blob backend unavailable: {0}")]
    Unavailable(String),
    /// The client attempted a write against a read-only backend.
    #[error("backend is read-only")]
    ReadOnly,
    /// The operation's context was cancelled or timed out.
    #[error("cancelled or timed out")]
    CancelledOrTimeout,
}

impl ErrorCode for BlobError {
    fn code(&self) -> &'static str {
        match self {
            Self::NoCapability => "NO_CAPABILITY",
            Self::NotFound => "NOT_FOUND",
            Self::Unavailable(_) => "BACKEND_UNAVAILABLE",
            Self::ReadOnly => "READ_ONLY",
            Self::CancelledOrTimeout => "CANCELLED_OR_TIMEOUT",
        }
    }
}

/// Errors from Merkle tree integration (component 4.F). Per spec §7 these
/// must never occur for a well-formed state; surfaced as a fatal,
/// request-scoped error, never a process abort.
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// A tile needed to reconstruct the compact range at `fromSize` was missing or malformed.
    #[error("could not reconstruct compact range at size {from_size}: {reason}")]
    Inconsistent {
        /// The tree size the integration attempted to extend from.
        from_size: u64,
        /// Human-readable diagnostic.
        reason: String,
    },
    /// The underlying tile/bundle store returned an error mid-integration.
    #[error("tile store error during integration: {0}")]
    Store(String),
}

impl ErrorCode for IntegrationError {
    fn code(&self) -> &'static str {
        match self {
            Self::Inconsistent { .. } => "INTEGRATION_INCONSISTENT",
            Self::Store(_) => "INTEGRATION_STORE_ERROR",
        }
    }
}

/// Errors from capability-token parsing and validation (component 4.K).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// The token bytes could not be parsed.
    #[error("could not parse capability token: {0}")]
    InvalidToken(String),
    /// The token's audience does not match this service's identity.
    #[error("token audience does not match this service")]
    InvalidAudience,
    /// The token lacks one or more required abilities.
    #[error("token is missing required ability: {0}")]
    MissingAbility(&'static str),
    /// The token has expired.
    #[error("token has expired")]
    Expired,
    /// The RPC invocation's signer does not match the token's issuer.
    #[error("invocation issuer does not match token issuer")]
    InvocationNotAuthorized,
    /// The token's proof chain does not terminate at the space's owner.
    #[error("delegation proof chain has no authority for this space")]
    DelegationNoAuthority,
    /// The token, or an ancestor in its proof chain, has been revoked.
    #[error("delegation has been revoked")]
    DelegationRevoked,
    /// All capabilities presented named different spaces.
    #[error("capabilities do not agree on a single space identifier")]
    InvalidSpaceDid,
    /// A `tlog/gc` invocation did not carry a *direct* grant from the space owner.
    #[error("garbage collection requires a direct delegation from the space owner")]
    GcDelegationNotDirect,
    /// The revoker is neither the token's issuer nor an upstream issuer in its chain.
    #[error("revoker is not authorized to revoke this token")]
    RevokeNotAuthorized,
}

impl ErrorCode for CapabilityError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "INVALID_DELEGATION",
            Self::InvalidAudience => "INVALID_DELEGATION",
            Self::MissingAbility(_) => "INVALID_DELEGATION",
            Self::Expired => "INVALID_DELEGATION",
            Self::InvocationNotAuthorized => "INVOCATION_NOT_AUTHORIZED",
            Self::DelegationNoAuthority => "DELEGATION_NO_AUTHORITY",
            Self::DelegationRevoked => "DELEGATION_REVOKED",
            Self::InvalidSpaceDid => "INVALID_SPACE_DID",
            Self::GcDelegationNotDirect => "GC_DELEGATION_NOT_DIRECT",
            Self::RevokeNotAuthorized => "NOT_AUTHORIZED",
        }
    }
}

/// Errors from the append pipeline (component 4.H).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The caller's expected head (`index_cid`) did not match the current head.
    #[error("expected head {expected} but current head is {actual}")]
    HeadMismatch {
        /// The head the caller expected.
        expected: String,
        /// The log's actual current head.
        actual: String,
    },
    /// Integration failed; nothing was written (spec invariant: atomic abort).
    #[error("integration failed: {0}")]
    Integration(#[from] IntegrationError),
    /// The state store failed while persisting the new tree state or checkpoint.
    #[error("persistence failed: {0}")]
    Persistence(#[from] StorageError),
    /// The log does not exist and could not be lazily restored.
    #[error("log not found")]
    LogNotFound,
    /// The operation's context was cancelled or timed out.
    #[error("cancelled or timed out")]
    CancelledOrTimeout,
}

impl ErrorCode for PipelineError {
    fn code(&self) -> &'static str {
        match self {
            Self::HeadMismatch { .. } => "HEAD_MISMATCH",
            Self::Integration(_) => "APPEND_FAILED",
            Self::Persistence(_) => "APPEND_FAILED",
            Self::LogNotFound => "NOT_FOUND",
            Self::CancelledOrTimeout => "CANCELLED_OR_TIMEOUT",
        }
    }
}

/// Errors surfaced by the garbage collector (component 4.J). Per-blob
/// failures are swallowed and counted (spec §7); this type is for
/// whole-operation failures (cannot acquire the per-log GC lock, etc).
#[derive(Debug, Error)]
pub enum GcError {
    /// Another GC run is already in progress for this log.
    #[error("garbage collection already in progress for this log")]
    AlreadyInProgress,
    /// The state store failed while reading or writing GC progress.
    #[error("gc persistence failed: {0}")]
    Persistence(#[from] StorageError),
}

impl ErrorCode for GcError {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyInProgress => "GC_IN_PROGRESS",
            Self::Persistence(_) => "GC_FAILED",
        }
    }
}

/// Errors from the index-CAR persister (component 4.I). Per spec §7 these
/// are logged and leave the dirty flag set; they never fail the append.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The CAR upload failed.
    #[error("index CAR upload failed: {0}")]
    Upload(#[from] BlobError),
    /// The state store failed while recording upload metadata.
    #[error("index persistence metadata write failed: {0}")]
    Metadata(#[from] StorageError),
}

impl ErrorCode for PersistError {
    fn code(&self) -> &'static str {
        match self {
            Self::Upload(_) => "INDEX_PERSIST_FAILED",
            Self::Metadata(_) => "INDEX_PERSIST_FAILED",
        }
    }
}

/// The unified, top-level error type for the whole service. The gateway
/// converts this into the JSON `{name, message}` shape for RPC and a plain
/// HTTP status for the tile routes (spec §7).
#[derive(Debug, Error)]
pub enum TlogError {
    /// See [`StorageError`].
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// See [`BlobError`].
    #[error(transparent)]
    Blob(#[from] BlobError),
    /// See [`IntegrationError`].
    #[error(transparent)]
    Integration(#[from] IntegrationError),
    /// See [`CapabilityError`].
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// See [`PipelineError`].
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// See [`GcError`].
    #[error(transparent)]
    Gc(#[from] GcError),
    /// See [`PersistError`].
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// A content-id string failed to parse.
    #[error("invalid content id: {0}")]
    InvalidContentId(String),
    /// A tile-tiles path was malformed or pointed outside the log's namespace.
    #[error("invalid tile path: {0}")]
    InvalidPath(String),
}

impl ErrorCode for TlogError {
    fn code(&self) -> &'static str {
        match self {
            Self::Storage(e) => e.code(),
            Self::Blob(e) => e.code(),
            Self::Integration(e) => e.code(),
            Self::Capability(e) => e.code(),
            Self::Pipeline(e) => e.code(),
            Self::Gc(e) => e.code(),
            Self::Persist(e) => e.code(),
            Self::InvalidContentId(_) => "INVALID_CONTENT_ID",
            Self::InvalidPath(_) => "INVALID_PATH",
        }
    }
}
