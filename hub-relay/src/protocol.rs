//! WebSocket upgrade handler for the relay channel.
//!
//! Accepts upgrades on `/`, enforces the connection cap and hands each
//! socket to its own [`Session`] task.

use crate::server::Hub;
use crate::session::Session;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use std::sync::Arc;

/// Upgrade an HTTP request to a relay connection.
pub async fn relay_ws_handler(ws: WebSocketUpgrade, Extension(hub): Extension<Arc<Hub>>) -> Response {
    // Reserve the slot before upgrading; it is held until the session ends.
    let Some(slot) = hub.try_reserve_slot() else {
        tracing::warn!(
            "Connection limit reached ({}), rejecting upgrade",
            hub.config().limits.max_connections
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let max_frame_bytes = hub.config().limits.max_frame_bytes;
    ws.max_message_size(max_frame_bytes)
        .max_frame_size(max_frame_bytes)
        .on_upgrade(move |socket| async move {
            let (handle, outbound) = hub.open_connection();
            Session::new(hub, handle).run(socket, outbound).await;
            drop(slot);
        })
}
