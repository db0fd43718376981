//! [`ReadOnlyGatewayClient`]: fetches blobs through a public IPFS gateway
//! and refuses every write with [`BlobError::ReadOnly`].
//!
//! This is the capability variant a log manager falls back to before any
//! authenticated write has upgraded it to a [`crate::DelegatedBlobClient`]
//! (spec §9, "Polymorphism over capability sets").

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tlog_crypto::CapabilityToken;
use tlog_types::{BlobError, ContentId};

use crate::client::BlobClient;

/// Fetch-only client backed by a public content gateway.
pub struct ReadOnlyGatewayClient {
    gateway_url: String,
    client: Client,
}

impl ReadOnlyGatewayClient {
    /// Builds a client against `gateway_url` (e.g. `IPFS_GATEWAY_URL`, no
    /// trailing slash expected).
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl BlobClient for ReadOnlyGatewayClient {
    async fn upload_blob(
        &self,
        _space_id: &str,
        _bytes: Vec<u8>,
        _token: &CapabilityToken,
    ) -> Result<ContentId, BlobError> {
        Err(BlobError::ReadOnly)
    }

    async fn upload_car(
        &self,
        _space_id: &str,
        _car_bytes: Vec<u8>,
        _token: &CapabilityToken,
    ) -> Result<ContentId, BlobError> {
        Err(BlobError::ReadOnly)
    }

    async fn fetch_blob(&self, content_id: ContentId) -> Result<Vec<u8>, BlobError> {
        let url = format!("{}/ipfs/{}", self.gateway_url, content_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BlobError::Unavailable(e.to_string()))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(BlobError::NotFound),
            s if s.is_success() => resp
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| BlobError::Unavailable(e.to_string())),
            s => Err(BlobError::Unavailable(format!("gateway returned {}", s.as_u16()))),
        }
    }

    async fn remove_blob(
        &self,
        _space_id: &str,
        _digest: ContentId,
        _token: &CapabilityToken,
    ) -> Result<(), BlobError> {
        Err(BlobError::ReadOnly)
    }
}
