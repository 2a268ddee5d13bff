//! Prometheus metrics endpoint.

use crate::server::Hub;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Gauges describe current state; counters are monotonic since startup.
pub async fn metrics_handler(Extension(hub): Extension<Arc<Hub>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&hub).await,
    )
}

async fn render(hub: &Hub) -> String {
    let m = hub.metrics();

    // Gauges
    let connections = hub.connection_count();
    let identified = hub.registry().len();
    let limiter_entries = hub.rate_limits().tracked_connections();
    let keys = hub.directory().count().await.unwrap_or(0);

    // Counters
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let frames = m.frames_received.load(Ordering::Relaxed);
    let relayed = m.messages_relayed.load(Ordering::Relaxed);
    let offline = m.messages_offline.load(Ordering::Relaxed);
    let bytes = m.bytes_relayed.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let terminations = m.liveness_terminations.load(Ordering::Relaxed);
    let registrations = m.keys_registered.load(Ordering::Relaxed);

    format!(
        r#"# HELP keyhub_relay_connections_active Number of open relay connections
# TYPE keyhub_relay_connections_active gauge
keyhub_relay_connections_active {connections}

# HELP keyhub_relay_identified_users Number of user ids bound to a connection
# TYPE keyhub_relay_identified_users gauge
keyhub_relay_identified_users {identified}

# HELP keyhub_relay_registered_keys Number of public keys in the directory
# TYPE keyhub_relay_registered_keys gauge
keyhub_relay_registered_keys {keys}

# HELP keyhub_relay_rate_limiter_entries Connections with rate limiter state
# TYPE keyhub_relay_rate_limiter_entries gauge
keyhub_relay_rate_limiter_entries {limiter_entries}

# HELP keyhub_relay_info Server information
# TYPE keyhub_relay_info gauge
keyhub_relay_info{{version="{version}"}} 1

# HELP keyhub_relay_connections_total Total relay connections accepted
# TYPE keyhub_relay_connections_total counter
keyhub_relay_connections_total {conns_total}

# HELP keyhub_relay_frames_received_total Total inbound relay frames
# TYPE keyhub_relay_frames_received_total counter
keyhub_relay_frames_received_total {frames}

# HELP keyhub_relay_messages_relayed_total Total payloads forwarded to a live connection
# TYPE keyhub_relay_messages_relayed_total counter
keyhub_relay_messages_relayed_total {relayed}

# HELP keyhub_relay_messages_offline_total Total sends answered with offline
# TYPE keyhub_relay_messages_offline_total counter
keyhub_relay_messages_offline_total {offline}

# HELP keyhub_relay_bytes_relayed_total Total payload bytes forwarded
# TYPE keyhub_relay_bytes_relayed_total counter
keyhub_relay_bytes_relayed_total {bytes}

# HELP keyhub_relay_errors_total Total frames answered with an error
# TYPE keyhub_relay_errors_total counter
keyhub_relay_errors_total {errors}

# HELP keyhub_relay_rate_limit_hits_total Total rate limit rejections
# TYPE keyhub_relay_rate_limit_hits_total counter
keyhub_relay_rate_limit_hits_total {rate_limits}

# HELP keyhub_relay_liveness_terminations_total Total connections terminated by the liveness monitor
# TYPE keyhub_relay_liveness_terminations_total counter
keyhub_relay_liveness_terminations_total {terminations}

# HELP keyhub_relay_keys_registered_total Total successful key registrations
# TYPE keyhub_relay_keys_registered_total counter
keyhub_relay_keys_registered_total {registrations}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}
