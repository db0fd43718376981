#![deny(missing_docs)]
//! # tlog-gateway
//!
//! The service's external surface (component 4.N): authenticated JSON RPC
//! routes (`tlog/create`, `tlog/append`, `tlog/read`, `tlog/revoke`,
//! `tlog/gc`) and unauthenticated tile HTTP routes (`/logs/{id}/head`,
//! `/checkpoint`, `/tile/{level}/...`, `/tile/entries/...`), behind a
//! per-IP rate limiter on the tile routes.

mod error;
mod limiter;
mod rpc;
mod server;
mod state;
mod tiles;

pub use error::GatewayError;
pub use server::{run_server, GatewayConfig};
pub use state::GatewayState;
