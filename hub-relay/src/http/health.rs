//! Health check endpoint.

use crate::server::Hub;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Number of open relay connections.
    pub connections: usize,
    /// Number of user ids bound to a connection.
    pub identified_users: usize,
    /// Number of public keys in the directory.
    pub registered_keys: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(Extension(hub): Extension<Arc<Hub>>) -> Json<HealthStatus> {
    let registered_keys = match hub.directory().count().await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!("Health: key count unavailable: {}", e);
            0
        }
    };

    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: hub.connection_count(),
        identified_users: hub.registry().len(),
        registered_keys,
        uptime_seconds: hub.uptime().as_secs(),
    })
}
