//! Authenticated RPC handlers (spec §6 "Authenticated RPC" table): one POST
//! route per ability, JSON request/response bodies, a capability token
//! carried as base64 in the `delegation` field of every request envelope.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use tlog_blob::BlobClient;
use tlog_crypto::{Ability, CapabilityToken};
use tlog_queue::QueuedEntry;
use tlog_types::error::ErrorCode;
use tlog_types::{ContentId, DEFAULT_GC_MAX_BUNDLES, DEFAULT_READ_LIMIT, TILE_WIDTH};

use crate::error::GatewayError;
use crate::state::{now_ms, GatewayState};

fn decode_b64(field: &'static str, s: &str) -> Result<Vec<u8>, GatewayError> {
    BASE64.decode(s).map_err(|_| GatewayError::InvalidBase64(field))
}

async fn parse_and_validate(
    state: &GatewayState,
    space_id: &str,
    delegation_b64: &str,
    issuer: &str,
    required: &[Ability],
) -> Result<CapabilityToken, GatewayError> {
    if delegation_b64.is_empty() {
        return Err(GatewayError::MissingDelegation);
    }
    let bytes = decode_b64("delegation", delegation_b64)?;
    let token = state.validator.parse_token(&bytes)?;
    let token_space = state.validator.extract_space_identifier(&token)?;
    if token_space != space_id {
        return Err(GatewayError::Capability(tlog_types::CapabilityError::InvalidSpaceDid));
    }
    state.validator.validate_token(&token, space_id, required, now_ms())?;
    state.validator.validate_invocation_authority(issuer, &token)?;
    state.validator.validate_proof_chain(&token, space_id)?;
    Ok(token)
}

async fn revoked_set(instance: &tlog_manager::LogInstance) -> Result<HashSet<ContentId>, GatewayError> {
    let revocations = instance.store().get_revocations().await?;
    Ok(revocations.into_iter().map(|r| r.token_cid).collect())
}

// --- tlog/create ---

/// Body of a `tlog/create` request.
#[derive(Deserialize)]
pub struct CreateRequest {
    /// The space identifier to create a log for.
    pub log_id: String,
    /// Base64-encoded capability token authorizing the create.
    pub delegation: String,
    /// The DID that invoked this delegation.
    pub issuer: String,
}

/// Successful response to `tlog/create`.
#[derive(Serialize)]
pub struct CreateResponse {
    /// The created log's space identifier, echoed back.
    pub log_id: String,
    /// The index root CID, empty until the first append persists one.
    pub index_cid: String,
    /// Always `0` for a freshly created log.
    pub tree_size: u64,
}

/// Creates a new, empty log for a space.
pub async fn create_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<CreateRequest>,
) -> Result<Json<CreateResponse>, GatewayError> {
    let _token = parse_and_validate(&state, &req.log_id, &req.delegation, &req.issuer, &Ability::WRITE_SET).await?;
    let instance = state.manager.create_log(&req.log_id).await?;
    let log_state = instance.store().get_log_state().await?;
    let tree_size = log_state.map(|s| s.tree_size).unwrap_or(0);
    Ok(Json(CreateResponse {
        log_id: req.log_id,
        index_cid: String::new(),
        tree_size,
    }))
}

// --- tlog/append ---

/// Body of a `tlog/append` request.
#[derive(Deserialize)]
pub struct AppendRequest {
    /// The log to append to.
    pub log_id: String,
    /// Base64-encoded entry bytes.
    pub data: String,
    /// The caller's expected current index root CID, for optimistic
    /// concurrency (spec §4.H); omit to skip the check.
    pub index_cid: Option<String>,
    /// Base64-encoded capability token authorizing the append.
    pub delegation: String,
    /// The DID that invoked this delegation.
    pub issuer: String,
}

/// Successful response to `tlog/append`.
#[derive(Serialize)]
pub struct AppendResponse {
    /// The new entry's absolute leaf index.
    pub index: u64,
    /// The index root CID after this append (may lag behind `tree_size`
    /// until the asynchronous persister catches up; see DESIGN.md).
    pub new_index_cid: String,
    /// The log's tree size immediately after this entry integrated.
    pub tree_size: u64,
}

/// Appends one entry to a log.
pub async fn append_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<AppendRequest>,
) -> Result<Json<AppendResponse>, GatewayError> {
    let token = parse_and_validate(&state, &req.log_id, &req.delegation, &req.issuer, &Ability::WRITE_SET).await?;
    let data = decode_b64("data", &req.data)?;

    let instance = state.manager.get_or_restore(&req.log_id).await?;
    let revoked = revoked_set(&instance).await?;
    state.validator.check_not_revoked(&token, &revoked)?;

    instance.pipeline().check_expected_head(req.index_cid.as_deref()).await?;

    let instance = state.manager.get_or_restore_for_write(&req.log_id).await?;
    let (entry, rx) = QueuedEntry::new(data, Some(token.clone()));
    instance.batcher().add(entry);
    let outcome = rx
        .await
        .map_err(|_| GatewayError::Pipeline(tlog_types::PipelineError::CancelledOrTimeout))?
        .map_err(|e| GatewayError::Batch(e.code(), e.to_string()))?;

    instance.persister().trigger(token);
    let (index_cid, _) = instance.store().get_head().await?;
    Ok(Json(AppendResponse {
        index: outcome.index,
        new_index_cid: index_cid.map(|c| c.to_cid_string()).unwrap_or_default(),
        tree_size: outcome.tree_size,
    }))
}

// --- tlog/read ---

/// Query parameters for a `tlog/read` request.
#[derive(Deserialize)]
pub struct ReadQuery {
    /// Base64-encoded capability token authorizing the read.
    pub delegation: String,
    /// The DID that invoked this delegation.
    pub issuer: String,
    /// First leaf index to return, default `0`.
    pub offset: Option<u64>,
    /// Maximum number of entries to return, default [`DEFAULT_READ_LIMIT`].
    pub limit: Option<u64>,
}

/// Successful response to `tlog/read`.
#[derive(Serialize)]
pub struct ReadResponse {
    /// Base64-encoded entries, in leaf order.
    pub entries: Vec<String>,
    /// The log's current tree size.
    pub total: u64,
}

/// Reads a contiguous range of entries from a log.
pub async fn read_handler(
    State(state): State<Arc<GatewayState>>,
    Path(log_id): Path<String>,
    Query(q): Query<ReadQuery>,
) -> Result<Json<ReadResponse>, GatewayError> {
    let token = parse_and_validate(&state, &log_id, &q.delegation, &q.issuer, &[]).await?;
    let instance = state.manager.get_or_restore(&log_id).await?;
    let revoked = revoked_set(&instance).await?;
    state.validator.check_not_revoked(&token, &revoked)?;

    let log_state = instance.store().get_log_state().await?;
    let tree_size = log_state.map(|s| s.tree_size).unwrap_or(0);
    let offset = q.offset.unwrap_or(0).min(tree_size);
    let limit = q.limit.unwrap_or(DEFAULT_READ_LIMIT);
    let end = offset.saturating_add(limit).min(tree_size);

    let mut entries = Vec::new();
    let mut cursor = offset;
    while cursor < end {
        let bundle_index = cursor / TILE_WIDTH;
        let bundle_start = bundle_index * TILE_WIDTH;
        let remaining_in_tree = tree_size - bundle_start;
        let partial = if remaining_in_tree >= TILE_WIDTH { 0 } else { remaining_in_tree as u16 };
        let bundle = instance
            .resources()
            .get_entry_bundle(bundle_index, partial)
            .await
            .map_err(|e| GatewayError::ReadFailed(e.to_string()))?
            .ok_or_else(|| GatewayError::ReadFailed(format!("missing entry bundle {bundle_index}")))?;
        let local_start = (cursor - bundle_start) as usize;
        let local_end = ((end - bundle_start).min(TILE_WIDTH) as usize).min(bundle.len());
        for entry in &bundle[local_start..local_end] {
            entries.push(BASE64.encode(entry));
        }
        cursor = bundle_start + local_end as u64;
    }

    Ok(Json(ReadResponse { entries, total: tree_size }))
}

// --- tlog/revoke ---

/// Body of a `tlog/revoke` request.
#[derive(Deserialize)]
pub struct RevokeRequest {
    /// The log the revoked token was issued against.
    pub log_id: String,
    /// CIDv1 string naming the previously stored token to revoke.
    pub cid: String,
    /// Base64-encoded capability token authorizing the revocation.
    pub delegation: String,
    /// The DID that invoked this delegation.
    pub issuer: String,
}

/// Successful response to `tlog/revoke`.
#[derive(Serialize)]
pub struct RevokeResponse {
    /// Always `true` on success.
    pub revoked: bool,
}

/// Revokes a previously delegated, content-addressed token.
pub async fn revoke_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, GatewayError> {
    let token = parse_and_validate(&state, &req.log_id, &req.delegation, &req.issuer, &Ability::WRITE_SET).await?;
    if req.cid.is_empty() {
        return Err(GatewayError::MissingCid);
    }
    let content_id = ContentId::parse(&req.cid).map_err(|_| GatewayError::InvalidContentId(req.cid.clone()))?;

    let instance = state.manager.get_or_restore(&req.log_id).await?;
    let stored_bytes = instance
        .client()
        .fetch_blob(content_id)
        .await
        .map_err(|_| GatewayError::DelegationNotFound)?;
    let token_to_revoke = state.validator.parse_token(&stored_bytes)?;

    state.validator.validate_revocation_authority(&token.claims.issuer, &token_to_revoke)?;
    instance.store().add_revocation(content_id, now_ms()).await?;

    Ok(Json(RevokeResponse { revoked: true }))
}

// --- tlog/gc ---

/// Body of a `tlog/gc` request.
#[derive(Deserialize)]
pub struct GcRequest {
    /// The log to collect.
    pub log_id: String,
    /// Base64-encoded, non-delegated `space/blob/remove` capability token
    /// (spec §4.K: GC requires a direct grant from the space owner).
    pub delegation: String,
    /// The DID that invoked this delegation.
    pub issuer: String,
}

/// Successful response to `tlog/gc`.
#[derive(Serialize)]
pub struct GcResponse {
    /// Number of ancestor tile bundles the sweep visited.
    pub bundles_processed: u64,
    /// Number of blobs actually removed from the backend.
    pub blobs_removed: u64,
    /// Always `0`; the collector does not read a blob's size before
    /// deleting it, so byte accounting is not tracked (see DESIGN.md).
    pub bytes_freed: u64,
    /// The tree size this sweep's ancestor walk advanced to.
    pub new_gc_position: u64,
}

/// Runs one garbage collection sweep over a log.
pub async fn gc_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<GcRequest>,
) -> Result<Json<GcResponse>, GatewayError> {
    let token = parse_and_validate(&state, &req.log_id, &req.delegation, &req.issuer, &[Ability::SpaceBlobRemove]).await?;
    state.validator.require_direct_grant(&token, &req.log_id)?;

    let instance = state.manager.get_or_restore_for_write(&req.log_id).await?;
    let report = instance.gc().run(DEFAULT_GC_MAX_BUNDLES, &token).await?;

    Ok(Json(GcResponse {
        bundles_processed: report.bundles_processed,
        blobs_removed: report.blobs_removed,
        bytes_freed: 0,
        new_gc_position: report.new_from_size,
    }))
}
