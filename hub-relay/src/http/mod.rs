//! HTTP surface for keyhub-relay.
//!
//! One router serves the key directory, the WebSocket relay channel on `/`,
//! health checks and metrics.

pub mod health;
pub mod keys;
mod metrics;

use crate::protocol::relay_ws_handler;
use crate::server::Hub;
use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(hub: Arc<Hub>) -> Router {
    let mut router = Router::new()
        .route("/", get(relay_ws_handler))
        .route("/register", post(keys::register_handler))
        .route("/keys", get(keys::list_keys_handler))
        .route("/keys/:user_id", get(keys::get_key_handler))
        .route("/health", get(health::health_handler));

    if hub.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router.layer(Extension(hub))
}
