//! Router assembly and the listening server (spec SPEC_FULL §4.N).

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use ipnetwork::IpNetwork;
use tower::limit::ConcurrencyLimitLayer;
use tower::load_shed::LoadShedLayer;
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::limiter::{rate_limit_middleware, IpLimiter};
use crate::rpc;
use crate::state::GatewayState;
use crate::tiles;

/// Listener and rate-limit configuration for [`run_server`].
pub struct GatewayConfig {
    /// Address to bind, e.g. `"0.0.0.0:8080"`.
    pub listen_addr: String,
    /// Sustained requests/sec allowed per source IP on the tile routes.
    pub rps: u32,
    /// Burst size for the same bucket.
    pub burst: u32,
    /// Request body size cap, in KiB.
    pub body_limit_kb: usize,
    /// CIDRs of reverse proxies allowed to set `X-Forwarded-For`.
    pub trusted_proxies: Vec<String>,
}

async fn map_middleware_error(err: BoxError) -> impl IntoResponse {
    if err.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            Json(serde_json::json!({"error": {"name": "TIMEOUT", "message": "request timed out"}})),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": {"name": "OVERLOADED", "message": err.to_string()}})),
        )
    }
}

fn build_router(state: Arc<GatewayState>, limiter: IpLimiter) -> Router {
    let tile_routes = Router::new()
        .route("/logs/:log_id/head", get(tiles::head_handler))
        .route("/logs/:log_id/checkpoint", get(tiles::checkpoint_handler))
        .route("/logs/:log_id/tile/:level/*rest", get(tiles::tile_handler))
        .route("/logs/:log_id/tile/entries/*rest", get(tiles::entry_bundle_handler))
        .route_layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware));

    let rpc_routes = Router::new()
        .route("/tlog/create", post(rpc::create_handler))
        .route("/tlog/append", post(rpc::append_handler))
        .route("/tlog/read/:log_id", get(rpc::read_handler))
        .route("/tlog/revoke", post(rpc::revoke_handler))
        .route("/tlog/gc", post(rpc::gc_handler));

    tile_routes.merge(rpc_routes).with_state(state)
}

/// Builds the full router and serves it until `shutdown` resolves.
pub async fn run_server(
    config: GatewayConfig,
    state: Arc<GatewayState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let cidrs = Arc::new(
        config
            .trusted_proxies
            .iter()
            .filter_map(|s| IpNetwork::from_str(s).ok())
            .collect(),
    );
    let limiter = IpLimiter::new(config.rps, config.burst, cidrs);

    let app = build_router(state, limiter)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(map_middleware_error))
                .layer(LoadShedLayer::new())
                .layer(ConcurrencyLimitLayer::new(128))
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.body_limit_kb * 1024));

    let addr: SocketAddr = config.listen_addr.parse()?;
    tracing::info!(target: "tlog-gateway", %addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown);

    if let Err(e) = server.await {
        tracing::error!(target: "tlog-gateway", error = %e, "server error");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::response::Response;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use dcrypt::api::Signature as _;
    use dcrypt::sign::eddsa;
    use rand::rngs::OsRng;
    use tower::ServiceExt;

    use tlog_crypto::{Ability, CapabilityToken, CheckpointSigner, TokenClaims};
    use tlog_manager::LogManager;

    const AUDIENCE: &str = "did:web:tlog.example";

    fn test_state() -> (Arc<GatewayState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let signer = Arc::new(CheckpointSigner::generate("node-test").expect("generate signer"));
        let manager = LogManager::new(dir.path(), signer, "http://127.0.0.1:1", "http://127.0.0.1:1");
        (GatewayState::new(manager, AUDIENCE), dir)
    }

    fn no_limit_router(state: Arc<GatewayState>) -> Router {
        build_router(state, IpLimiter::new(u32::MAX, u32::MAX, Arc::new(Vec::new())))
    }

    fn signed_root_token(space_id: &str, abilities: Vec<Ability>) -> CapabilityToken {
        let claims = TokenClaims {
            issuer: space_id.to_string(),
            audience: AUDIENCE.to_string(),
            space_id: space_id.to_string(),
            abilities,
            expires_at_ms: None,
        };
        let mut rng = OsRng;
        let (public_key, secret_key) = eddsa::Ed25519::keypair(&mut rng).expect("keypair");
        let signature = eddsa::Ed25519::sign(&CapabilityToken::signing_bytes(&claims), &secret_key).expect("sign");
        CapabilityToken {
            claims,
            signature: signature.to_bytes(),
            issuer_public_key: public_key.to_bytes(),
            proof: None,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("read body");
        serde_json::from_slice(&bytes).expect("valid json")
    }

    #[tokio::test]
    async fn head_of_unknown_log_is_404() {
        let (state, _dir) = test_state();
        let app = no_limit_router(state);

        let req = Request::builder()
            .uri("/logs/did:key:zUnknown/head")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_with_malformed_base64_delegation_is_400() {
        let (state, _dir) = test_state();
        let app = no_limit_router(state);

        let body = serde_json::json!({
            "log_id": "did:key:zA",
            "delegation": "not-valid-base64!!",
            "issuer": "did:key:zA",
        });
        let req = Request::builder()
            .method("POST")
            .uri("/tlog/create")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_then_head_round_trips_a_fresh_log() {
        let (state, _dir) = test_state();
        let token = signed_root_token("did:key:zA", Ability::WRITE_SET.to_vec());
        let delegation = BASE64.encode(token.to_bytes());

        let create_body = serde_json::json!({
            "log_id": "did:key:zA",
            "delegation": delegation,
            "issuer": "did:key:zA",
        });
        let create_req = Request::builder()
            .method("POST")
            .uri("/tlog/create")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&create_body).unwrap()))
            .unwrap();
        let create_resp = no_limit_router(state.clone()).oneshot(create_req).await.unwrap();
        assert_eq!(create_resp.status(), StatusCode::OK);
        let created = body_json(create_resp).await;
        assert_eq!(created["tree_size"], 0);

        let head_req = Request::builder()
            .uri("/logs/did:key:zA/head")
            .body(Body::empty())
            .unwrap();
        let head_resp = no_limit_router(state).oneshot(head_req).await.unwrap();
        assert_eq!(head_resp.status(), StatusCode::OK);
        let head = body_json(head_resp).await;
        assert_eq!(head["tree_size"], 0);
        assert!(head["index_cid"].is_null());
    }

    #[tokio::test]
    async fn create_with_wrong_audience_token_is_rejected() {
        let (state, _dir) = test_state();
        let claims = TokenClaims {
            issuer: "did:key:zA".to_string(),
            audience: "did:web:someone-else".to_string(),
            space_id: "did:key:zA".to_string(),
            abilities: Ability::WRITE_SET.to_vec(),
            expires_at_ms: None,
        };
        let mut rng = OsRng;
        let (public_key, secret_key) = eddsa::Ed25519::keypair(&mut rng).expect("keypair");
        let signature = eddsa::Ed25519::sign(&CapabilityToken::signing_bytes(&claims), &secret_key).expect("sign");
        let token = CapabilityToken {
            claims,
            signature: signature.to_bytes(),
            issuer_public_key: public_key.to_bytes(),
            proof: None,
        };
        let delegation = BASE64.encode(token.to_bytes());

        let body = serde_json::json!({
            "log_id": "did:key:zA",
            "delegation": delegation,
            "issuer": "did:key:zA",
        });
        let req = Request::builder()
            .method("POST")
            .uri("/tlog/create")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = no_limit_router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn tile_rate_limiter_blocks_after_burst() {
        let (state, _dir) = test_state();
        let limiter = IpLimiter::new(0, 2, Arc::new(Vec::new()));
        let app = build_router(state, limiter);

        let mk_req = || {
            Request::builder()
                .uri("/logs/did:key:zUnknown/head")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(mk_req()).await.unwrap();
        assert_eq!(first.status(), StatusCode::NOT_FOUND);
        let second = app.clone().oneshot(mk_req()).await.unwrap();
        assert_eq!(second.status(), StatusCode::NOT_FOUND);
        let third = app.oneshot(mk_req()).await.unwrap();
        assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
