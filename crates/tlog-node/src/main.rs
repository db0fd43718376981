//! The tlog service binary (spec's [ADDED] process wiring §1, §6): reads
//! [`NodeConfig`] from the environment, builds the log manager, installs
//! telemetry, and serves the gateway until interrupted.

mod config;

use std::sync::Arc;

use config::NodeConfig;
use tlog_crypto::CheckpointSigner;
use tlog_gateway::{run_server, GatewayConfig, GatewayState};
use tlog_manager::LogManager;

const TELEMETRY_ADDR: &str = "0.0.0.0:9090";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::from_env()?;

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", &config.log_level);
    }
    tlog_telemetry::init::init_tracing()?;

    if let Err(e) = tlog_telemetry::prometheus::install() {
        tracing::warn!(error = %e, "prometheus metrics already installed");
    }
    tokio::spawn(tlog_telemetry::http::run_server(TELEMETRY_ADDR.parse()?));

    let signer = Arc::new(CheckpointSigner::from_seed("tlog-node", &config.signing_key_seed)?);
    tracing::info!(signer_id = signer.signer_id(), port = config.port, "starting tlog node");

    let manager = LogManager::new(
        config.data_path.clone(),
        signer.clone(),
        config.blob_base_url.clone(),
        config.ipfs_gateway_url.clone(),
    );
    let state = GatewayState::new(manager, signer.signer_id().to_string());

    let gateway_config = GatewayConfig {
        listen_addr: format!("0.0.0.0:{}", config.port),
        rps: 20,
        burst: 50,
        body_limit_kb: 512,
        trusted_proxies: vec![],
    };

    run_server(gateway_config, state, async {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
    })
    .await
}
