//! Environment-sourced process configuration (spec §6 "Environment"): this
//! is intentionally the thin wiring layer, so it parses env vars directly
//! rather than going through a config-file crate.

use std::path::PathBuf;

use rand::RngCore;

/// Everything a running node needs that isn't persisted in its own state
/// store: where to keep data, which port to listen on, which backends to
/// talk to, and the service's own signing identity.
pub struct NodeConfig {
    /// Root directory for every log's `StateStore` (`DATA_PATH`, default `./data`).
    pub data_path: PathBuf,
    /// `tracing` filter directive (`LOG_LEVEL`, default `info`).
    pub log_level: String,
    /// HTTP listen port (`PORT`, default `8080`).
    pub port: u16,
    /// Base URL of the IPFS gateway backing read-only restores (`IPFS_GATEWAY_URL`).
    pub ipfs_gateway_url: String,
    /// Base URL of the delegated-write blob backend (`BLOB_BASE_URL`).
    pub blob_base_url: String,
    /// 32-byte Ed25519 seed for this node's checkpoint-signing identity,
    /// from `TLOG_SIGNING_KEY` or generated and persisted on first run.
    pub signing_key_seed: [u8; 32],
}

const DEFAULT_DATA_PATH: &str = "./data";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_IPFS_GATEWAY_URL: &str = "https://ipfs.io";
const DEFAULT_BLOB_BASE_URL: &str = "https://up.example.com";
const IDENTITY_FILE_NAME: &str = "identity.key";

impl NodeConfig {
    /// Reads every setting from the environment, generating and persisting
    /// a fresh signing key under `DATA_PATH/identity.key` if neither
    /// `TLOG_SIGNING_KEY` nor that file is present.
    pub fn from_env() -> anyhow::Result<Self> {
        let data_path = PathBuf::from(
            std::env::var("DATA_PATH").unwrap_or_else(|_| DEFAULT_DATA_PATH.to_string()),
        );
        std::fs::create_dir_all(&data_path)?;

        let log_level =
            std::env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let ipfs_gateway_url = std::env::var("IPFS_GATEWAY_URL")
            .unwrap_or_else(|_| DEFAULT_IPFS_GATEWAY_URL.to_string());
        let blob_base_url =
            std::env::var("BLOB_BASE_URL").unwrap_or_else(|_| DEFAULT_BLOB_BASE_URL.to_string());

        let signing_key_seed = load_or_generate_seed(&data_path)?;

        Ok(Self {
            data_path,
            log_level,
            port,
            ipfs_gateway_url,
            blob_base_url,
            signing_key_seed,
        })
    }
}

fn load_or_generate_seed(data_path: &std::path::Path) -> anyhow::Result<[u8; 32]> {
    if let Ok(hex_seed) = std::env::var("TLOG_SIGNING_KEY") {
        let bytes = hex::decode(hex_seed.trim())?;
        return Ok(bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("TLOG_SIGNING_KEY must decode to 32 bytes"))?);
    }

    let key_path = data_path.join(IDENTITY_FILE_NAME);
    if key_path.exists() {
        let hex_seed = std::fs::read_to_string(&key_path)?;
        let bytes = hex::decode(hex_seed.trim())?;
        return Ok(bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("{} does not hold a 32-byte seed", key_path.display()))?);
    }

    tracing::info!(path = %key_path.display(), "generating new node identity");
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    std::fs::write(&key_path, hex::encode(seed))?;
    Ok(seed)
}
