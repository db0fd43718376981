//! [`DelegatedBlobClient`]: a `reqwest`-backed [`BlobClient`] that speaks the
//! allocate→PUT→conclude→receipt-poll handshake against a storage backend,
//! authenticating every write with a bearer-encoded capability token.
//!
//! The retry/backoff shape (exponential delay, `Retry-After` honoured,
//! bounded attempts) mirrors a standard relayer gateway client.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tlog_crypto::CapabilityToken;
use tlog_types::{BlobError, ContentId};

use crate::client::BlobClient;

const HTTP_RETRIES: usize = 6;
const BASE_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 5_000;

fn retry_delay(attempt: usize, retry_after_secs: Option<u64>) -> Duration {
    if let Some(secs) = retry_after_secs {
        return Duration::from_secs(secs.min(30));
    }
    let ms = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt).min(MAX_BACKOFF_MS);
    Duration::from_millis(ms)
}

fn bearer(token: &CapabilityToken) -> String {
    B64.encode(token.to_bytes())
}

#[derive(Serialize)]
struct AllocateRequest<'a> {
    space_id: &'a str,
    size: usize,
}

#[derive(Deserialize)]
struct AllocateResponse {
    upload_url: String,
    allocation_id: String,
}

#[derive(Serialize)]
struct ConcludeRequest<'a> {
    allocation_id: &'a str,
}

#[derive(Deserialize)]
struct ConcludeResponse {
    content_id: String,
    receipt_id: String,
}

#[derive(Deserialize)]
struct ReceiptStatus {
    confirmed: bool,
}

/// Blob client that performs real writes against a delegated storage
/// backend over HTTP, per spec §6 ("Backend blob client").
pub struct DelegatedBlobClient {
    base_url: String,
    client: Client,
}

impl DelegatedBlobClient {
    /// Builds a client targeting `base_url` (no trailing slash expected).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }

    async fn send_with_retry<F>(&self, mut build: F) -> Result<(StatusCode, bytes::Bytes), BlobError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let resp = build().send().await;
            let resp = match resp {
                Ok(r) => r,
                Err(e) => {
                    if attempt < HTTP_RETRIES {
                        tracing::debug!(attempt, error = %e, "blob backend send error, retrying");
                        tokio::time::sleep(retry_delay(attempt, None)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(BlobError::Unavailable(e.to_string()));
                }
            };

            let status = resp.status();
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let body = resp.bytes().await.unwrap_or_default();

            if status.as_u16() == 429 || status.is_server_error() {
                if attempt < HTTP_RETRIES {
                    let delay = retry_delay(attempt, retry_after);
                    tracing::debug!(attempt, status = status.as_u16(), ?delay, "blob backend retryable status");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(BlobError::Unavailable(format!(
                    "backend returned {} after {} retries",
                    status.as_u16(),
                    HTTP_RETRIES
                )));
            }

            return Ok((status, body));
        }
    }

    async fn poll_receipt(&self, receipt_id: &str) -> Result<(), BlobError> {
        const POLL_ATTEMPTS: usize = 20;
        const POLL_INTERVAL: Duration = Duration::from_millis(150);

        let url = format!("{}/receipts/{}", self.base_url, receipt_id);
        for attempt in 0..POLL_ATTEMPTS {
            let (status, body) = self
                .send_with_retry(|| self.client.get(&url))
                .await?;
            if !status.is_success() {
                return Err(BlobError::Unavailable(format!(
                    "receipt poll returned {}",
                    status.as_u16()
                )));
            }
            let parsed: ReceiptStatus = serde_json::from_slice(&body)
                .map_err(|e| BlobError::Unavailable(format!("malformed receipt body: {e}")))?;
            if parsed.confirmed {
                return Ok(());
            }
            if attempt + 1 < POLL_ATTEMPTS {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
        Err(BlobError::CancelledOrTimeout)
    }
}

#[async_trait]
impl BlobClient for DelegatedBlobClient {
    async fn upload_blob(
        &self,
        space_id: &str,
        bytes: Vec<u8>,
        token: &CapabilityToken,
    ) -> Result<ContentId, BlobError> {
        let allocate_url = format!("{}/allocate", self.base_url);
        let bearer_token = bearer(token);
        let (status, body) = self
            .send_with_retry(|| {
                self.client
                    .post(&allocate_url)
                    .bearer_auth(&bearer_token)
                    .json(&AllocateRequest {
                        space_id,
                        size: bytes.len(),
                    })
            })
            .await?;
        if !status.is_success() {
            return Err(BlobError::Unavailable(format!("allocate returned {}", status.as_u16())));
        }
        let allocation: AllocateResponse = serde_json::from_slice(&body)
            .map_err(|e| BlobError::Unavailable(format!("malformed allocate body: {e}")))?;

        let (status, _) = self
            .send_with_retry(|| {
                self.client
                    .put(&allocation.upload_url)
                    .bearer_auth(&bearer_token)
                    .body(bytes.clone())
            })
            .await?;
        if !status.is_success() {
            return Err(BlobError::Unavailable(format!("PUT returned {}", status.as_u16())));
        }

        let conclude_url = format!("{}/conclude", self.base_url);
        let (status, body) = self
            .send_with_retry(|| {
                self.client
                    .post(&conclude_url)
                    .bearer_auth(&bearer_token)
                    .json(&ConcludeRequest {
                        allocation_id: &allocation.allocation_id,
                    })
            })
            .await?;
        if !status.is_success() {
            return Err(BlobError::Unavailable(format!("conclude returned {}", status.as_u16())));
        }
        let concluded: ConcludeResponse = serde_json::from_slice(&body)
            .map_err(|e| BlobError::Unavailable(format!("malformed conclude body: {e}")))?;

        self.poll_receipt(&concluded.receipt_id).await?;

        ContentId::parse(&concluded.content_id).map_err(|e| BlobError::Unavailable(e.to_string()))
    }

    async fn upload_car(
        &self,
        space_id: &str,
        car_bytes: Vec<u8>,
        token: &CapabilityToken,
    ) -> Result<ContentId, BlobError> {
        let url = format!("{}/car", self.base_url);
        let bearer_token = bearer(token);
        let (status, body) = self
            .send_with_retry(|| {
                self.client
                    .post(&url)
                    .bearer_auth(&bearer_token)
                    .query(&[("space_id", space_id)])
                    .header(reqwest::header::CONTENT_TYPE, "application/vnd.ipld.car")
                    .body(car_bytes.clone())
            })
            .await?;
        if !status.is_success() {
            return Err(BlobError::Unavailable(format!("CAR upload returned {}", status.as_u16())));
        }
        let concluded: ConcludeResponse = serde_json::from_slice(&body)
            .map_err(|e| BlobError::Unavailable(format!("malformed CAR response: {e}")))?;
        ContentId::parse(&concluded.content_id).map_err(|e| BlobError::Unavailable(e.to_string()))
    }

    async fn fetch_blob(&self, content_id: ContentId) -> Result<Vec<u8>, BlobError> {
        let url = format!("{}/blob/{}", self.base_url, content_id);
        let (status, body) = self.send_with_retry(|| self.client.get(&url)).await?;
        match status {
            StatusCode::NOT_FOUND => Err(BlobError::NotFound),
            s if s.is_success() => Ok(body.to_vec()),
            s => Err(BlobError::Unavailable(format!("fetch returned {}", s.as_u16()))),
        }
    }

    async fn remove_blob(
        &self,
        space_id: &str,
        digest: ContentId,
        token: &CapabilityToken,
    ) -> Result<(), BlobError> {
        let url = format!("{}/blob/{}", self.base_url, digest);
        let bearer_token = bearer(token);
        let (status, _) = self
            .send_with_retry(|| {
                self.client
                    .delete(&url)
                    .bearer_auth(&bearer_token)
                    .query(&[("space_id", space_id)])
            })
            .await?;
        match status {
            StatusCode::NOT_FOUND => Err(BlobError::NotFound),
            s if s.is_success() => Ok(()),
            s => Err(BlobError::Unavailable(format!("remove returned {}", s.as_u16()))),
        }
    }
}
