//! Unauthenticated tile HTTP routes (spec §6 "Unauthenticated HTTP" table):
//! plain GETs, no delegation, served straight out of the object store so
//! they can sit behind a CDN.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use tlog_types::path::{parse_entry_bundle_path, parse_tile_path, ParsedPath};
use tlog_types::CHECKPOINT_PATH;

use crate::error::{GatewayError, TileError};
use crate::state::GatewayState;

const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";
const CHECKPOINT_CACHE: &str = "max-age=5";

async fn instance(state: &GatewayState, log_id: &str) -> Result<Arc<tlog_manager::LogInstance>, GatewayError> {
    state.manager.get_or_restore(log_id).await.map_err(GatewayError::from)
}

/// `GET /logs/{logID}/head`: the log's current index root CID, tree size,
/// and checkpoint CID.
pub async fn head_handler(
    State(state): State<Arc<GatewayState>>,
    Path(log_id): Path<String>,
) -> Result<Response, TileError> {
    let instance = instance(&state, &log_id).await?;
    let (index_cid, tree_size) = instance.store().get_head().await.map_err(GatewayError::from)?;
    let checkpoint_cid = instance.index().get(CHECKPOINT_PATH);

    let body = serde_json::json!({
        "index_cid": index_cid.map(|c| c.to_cid_string()),
        "tree_size": tree_size,
        "checkpoint_cid": checkpoint_cid.map(|c| c.to_cid_string()),
    });
    Ok(([(header::CONTENT_TYPE, "application/json")], body.to_string()).into_response())
}

/// `GET /logs/{logID}/checkpoint`: the latest signed checkpoint, as raw
/// bytes with a short cache lifetime.
pub async fn checkpoint_handler(
    State(state): State<Arc<GatewayState>>,
    Path(log_id): Path<String>,
) -> Result<Response, TileError> {
    let instance = instance(&state, &log_id).await?;
    let checkpoint = instance
        .resources()
        .get_checkpoint()
        .await?
        .ok_or_else(|| TileError(StatusCode::NOT_FOUND, "no checkpoint yet".into()))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/plain")),
            (header::CACHE_CONTROL, HeaderValue::from_static(CHECKPOINT_CACHE)),
        ],
        checkpoint,
    )
        .into_response())
}

/// `GET /logs/{logID}/tile/{level}/{path...}`: one Merkle tile, encoded and
/// immutably cacheable.
pub async fn tile_handler(
    State(state): State<Arc<GatewayState>>,
    Path((log_id, level, rest)): Path<(String, u64, String)>,
) -> Result<Response, TileError> {
    let instance = instance(&state, &log_id).await?;
    let segments: Vec<&str> = rest.split('/').collect();
    let ParsedPath::Tile { index, partial, .. } = parse_tile_path(level, &segments)? else {
        unreachable!("parse_tile_path always returns ParsedPath::Tile")
    };

    let nodes = instance
        .resources()
        .get_tile(level as u32, index, partial)
        .await?
        .ok_or_else(|| TileError(StatusCode::NOT_FOUND, "tile not found".into()))?;
    let bytes = tlog_tree::encode_tile(&nodes);

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (header::CACHE_CONTROL, HeaderValue::from_static(IMMUTABLE_CACHE)),
        ],
        bytes,
    )
        .into_response())
}

/// `GET /logs/{logID}/tile/entries/{path...}`: one entry bundle, encoded
/// and immutably cacheable.
pub async fn entry_bundle_handler(
    State(state): State<Arc<GatewayState>>,
    Path((log_id, rest)): Path<(String, String)>,
) -> Result<Response, TileError> {
    let instance = instance(&state, &log_id).await?;
    let segments: Vec<&str> = rest.split('/').collect();
    let ParsedPath::EntryBundle { index, partial } = parse_entry_bundle_path(&segments)? else {
        unreachable!("parse_entry_bundle_path always returns ParsedPath::EntryBundle")
    };

    let entries = instance
        .resources()
        .get_entry_bundle(index, partial)
        .await?
        .ok_or_else(|| TileError(StatusCode::NOT_FOUND, "entry bundle not found".into()))?;
    let bytes = tlog_tree::encode_bundle(&entries);

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (header::CACHE_CONTROL, HeaderValue::from_static(IMMUTABLE_CACHE)),
        ],
        bytes,
    )
        .into_response())
}
