//! Shared state handed to every route handler.

use std::sync::Arc;

use tlog_crypto::TokenValidator;
use tlog_manager::LogManager;

/// State shared across both the authenticated RPC routes and the
/// unauthenticated tile routes.
pub struct GatewayState {
    pub(crate) manager: Arc<LogManager>,
    pub(crate) validator: TokenValidator,
}

impl GatewayState {
    /// Builds gateway state bound to this service's own identity
    /// (`expectedAudience` in spec §4.K's `ValidateToken`).
    pub fn new(manager: Arc<LogManager>, service_audience: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            validator: TokenValidator::new(service_audience),
        })
    }
}

pub(crate) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
