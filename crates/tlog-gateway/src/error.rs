//! Converts every component error into the RPC `{name, message}` JSON shape
//! or a plain HTTP status for the tile routes (spec §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use tlog_manager::ManagerError;
use tlog_types::error::{CapabilityError, ErrorCode, GcError, PipelineError, StorageError};

/// Errors the gateway itself can produce, in addition to every component
/// error it forwards verbatim (spec §7: "authorization failures surface
/// verbatim to the RPC caller with stable short codes").
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No `delegation` field was present on an authenticated RPC request.
    #[error("this operation requires a delegation")]
    MissingDelegation,
    /// No `cid` field was present on a `tlog/revoke` request.
    #[error("this operation requires a cid")]
    MissingCid,
    /// A field that should have held a CIDv1 string did not parse as one.
    #[error("invalid content id: {0}")]
    InvalidContentId(String),
    /// A field that should have held base64 did not decode.
    #[error("invalid base64 in field {0}")]
    InvalidBase64(&'static str),
    /// `tlog/revoke`'s `cid` does not name a token previously stored in the space.
    #[error("no token stored under this content id")]
    DelegationNotFound,
    /// `tlog/read`'s `offset`/`limit` could not be served from the tile store.
    #[error("read failed: {0}")]
    ReadFailed(String),
    /// See [`CapabilityError`].
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// See [`ManagerError`].
    #[error(transparent)]
    Manager(#[from] ManagerError),
    /// See [`PipelineError`].
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// A queued append's flush failed alongside every other entry in its
    /// batch; the original [`PipelineError`] is shared (behind an `Arc`)
    /// with the siblings it was broadcast to, so it is carried here as its
    /// rendered code and message rather than the error itself.
    #[error("{1}")]
    Batch(&'static str, String),
    /// See [`GcError`].
    #[error(transparent)]
    Gc(#[from] GcError),
    /// See [`StorageError`].
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ErrorCode for GatewayError {
    fn code(&self) -> &'static str {
        match self {
            Self::MissingDelegation => "MISSING_DELEGATION",
            Self::MissingCid => "MISSING_CID",
            Self::InvalidContentId(_) => "INVALID_CONTENT_ID",
            Self::InvalidBase64(_) => "INVALID_REQUEST",
            Self::DelegationNotFound => "DELEGATION_NOT_FOUND",
            Self::ReadFailed(_) => "READ_FAILED",
            Self::Capability(e) => e.code(),
            Self::Manager(e) => e.code(),
            Self::Pipeline(e) => e.code(),
            Self::Batch(code, _) => code,
            Self::Gc(e) => e.code(),
            Self::Storage(e) => e.code(),
        }
    }
}

#[derive(Serialize)]
struct RpcErrorBody<'a> {
    error: RpcError<'a>,
}

#[derive(Serialize)]
struct RpcError<'a> {
    name: &'a str,
    message: String,
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingDelegation
            | Self::MissingCid
            | Self::InvalidContentId(_)
            | Self::InvalidBase64(_) => StatusCode::BAD_REQUEST,
            Self::Capability(CapabilityError::InvocationNotAuthorized)
            | Self::Capability(CapabilityError::DelegationNoAuthority)
            | Self::Capability(CapabilityError::GcDelegationNotDirect)
            | Self::Capability(CapabilityError::RevokeNotAuthorized) => StatusCode::FORBIDDEN,
            Self::Capability(CapabilityError::DelegationRevoked) => StatusCode::FORBIDDEN,
            Self::Capability(_) => StatusCode::UNAUTHORIZED,
            Self::Manager(ManagerError::InvalidLogId(_)) => StatusCode::BAD_REQUEST,
            Self::Manager(ManagerError::LogNotFound) => StatusCode::NOT_FOUND,
            Self::Manager(ManagerError::LogCreationFailed(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DelegationNotFound => StatusCode::NOT_FOUND,
            Self::Pipeline(PipelineError::HeadMismatch { .. }) => StatusCode::CONFLICT,
            Self::Pipeline(PipelineError::LogNotFound) => StatusCode::NOT_FOUND,
            Self::Pipeline(PipelineError::CancelledOrTimeout) => StatusCode::REQUEST_TIMEOUT,
            Self::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Batch(_, _) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Gc(GcError::AlreadyInProgress) => StatusCode::CONFLICT,
            Self::Gc(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ReadFailed(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!(error = %self, code = self.code(), "gateway request failed");
        }
        let body = RpcErrorBody {
            error: RpcError {
                name: self.code(),
                message: self.to_string(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

/// A plain-status error for the unauthenticated tile routes (spec §7: "plain
/// HTTP status codes on the tile path").
pub struct TileError(pub StatusCode, pub String);

impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

impl From<GatewayError> for TileError {
    fn from(e: GatewayError) -> Self {
        TileError(e.status(), e.to_string())
    }
}

impl From<tlog_types::error::TlogError> for TileError {
    fn from(e: tlog_types::error::TlogError) -> Self {
        use tlog_types::error::TlogError;
        let status = match &e {
            TlogError::InvalidPath(_) | TlogError::InvalidContentId(_) => StatusCode::BAD_REQUEST,
            TlogError::Storage(StorageError::NotFound) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        TileError(status, e.to_string())
    }
}

impl From<tlog_types::error::IntegrationError> for TileError {
    fn from(e: tlog_types::error::IntegrationError) -> Self {
        TileError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}
