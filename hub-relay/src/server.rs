//! Hub state and server startup.
//!
//! [`Hub`] owns every piece of process-wide state: the key directory, the
//! connection registry, the table of open connections, rate limiters and
//! metrics. It is built once at startup and shared by `Arc` with the HTTP
//! handlers, the relay sessions and the liveness monitor. Nothing is
//! persisted; a restart starts from empty tables.

use crate::config::Config;
use crate::connection::{ConnectionHandle, Outbound};
use crate::directory::{KeyDirectory, MemoryKeyDirectory};
use crate::http::build_router;
use crate::limits::RateLimits;
use crate::liveness::spawn_liveness_task;
use crate::registry::ConnectionRegistry;
use dashmap::DashMap;
use hub_types::{ConnectionId, UserId};
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total relay connections accepted.
    pub connections_total: AtomicU64,
    /// Total inbound relay frames.
    pub frames_received: AtomicU64,
    /// Total payloads forwarded to a live connection.
    pub messages_relayed: AtomicU64,
    /// Total sends answered with `offline`.
    pub messages_offline: AtomicU64,
    /// Total payload bytes forwarded.
    pub bytes_relayed: AtomicU64,
    /// Total frames answered with `error` (rate limits included).
    pub errors_total: AtomicU64,
    /// Total frames rejected by a rate limiter.
    pub rate_limit_hits: AtomicU64,
    /// Total connections terminated by the liveness monitor.
    pub liveness_terminations: AtomicU64,
    /// Total successful key registrations.
    pub keys_registered: AtomicU64,
}

/// Process-wide relay state.
pub struct Hub {
    config: Config,
    directory: Arc<dyn KeyDirectory>,
    registry: ConnectionRegistry,
    /// Every open relay connection, identified or not.
    connections: DashMap<ConnectionId, ConnectionHandle>,
    /// One permit per allowed connection, taken before the upgrade.
    connection_slots: Arc<Semaphore>,
    rate_limits: RateLimits,
    metrics: RelayMetrics,
    started_at: Instant,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .field("registry", &self.registry.len())
            .field("connections", &self.connections.len())
            .field("free_slots", &self.connection_slots.available_permits())
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Create a hub over the given key directory backend.
    pub fn new(config: Config, directory: Arc<dyn KeyDirectory>) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        let connection_slots = Arc::new(Semaphore::new(config.limits.max_connections));
        Self {
            config,
            directory,
            registry: ConnectionRegistry::new(),
            connections: DashMap::new(),
            connection_slots,
            rate_limits,
            metrics: RelayMetrics::default(),
            started_at: Instant::now(),
        }
    }

    /// Create a hub with an in-memory key directory.
    pub fn in_memory(config: Config) -> Self {
        Self::new(config, Arc::new(MemoryKeyDirectory::new()))
    }

    /// Get the hub configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the key directory.
    pub fn directory(&self) -> &dyn KeyDirectory {
        self.directory.as_ref()
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Time since the hub was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Reserve room for one more connection.
    ///
    /// Returns `None` when `limits.max_connections` slots are taken. The
    /// slot is freed when the permit is dropped.
    pub fn try_reserve_slot(&self) -> Option<OwnedSemaphorePermit> {
        self.connection_slots.clone().try_acquire_owned().ok()
    }

    /// Track a newly accepted connection.
    ///
    /// Returns its handle and the receiver its session drains.
    pub fn open_connection(&self) -> (ConnectionHandle, mpsc::Receiver<Outbound>) {
        let limits = &self.config.limits;
        let (handle, rx) =
            ConnectionHandle::with_byte_limit(limits.outbound_buffer, limits.outbound_buffer_bytes);
        self.connections.insert(handle.id(), handle.clone());
        self.metrics
            .connections_total
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        tracing::debug!(
            "Opened {:?} (open: {})",
            handle.id(),
            self.connections.len()
        );
        (handle, rx)
    }

    /// Close handling for a connection.
    ///
    /// Marks the handle closed, drops it from the open-connection table and,
    /// if it identified, removes its registry entry unless a newer
    /// connection has taken the user id since.
    pub fn close_connection(&self, handle: &ConnectionHandle, identity: Option<&UserId>) {
        handle.mark_closed();
        self.connections.remove(&handle.id());

        if let Some(user_id) = identity {
            self.registry
                .unregister_if_current(user_id.as_str(), handle.id());
        }

        tracing::debug!(
            "Closed {:?} after {:?} (open: {})",
            handle.id(),
            handle.opened_at().elapsed(),
            self.connections.len()
        );
    }

    /// Snapshot of all open connections.
    pub fn open_connections(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Serve HTTP and relay traffic on `listener` until `shutdown` resolves.
///
/// Starts the liveness monitor alongside the server and stops it on return.
///
/// # Errors
///
/// Returns an error if the server fails with an I/O error.
pub async fn run<F>(listener: TcpListener, hub: Arc<Hub>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    tracing::info!("keyhub relay listening on {}", local_addr);

    let liveness = spawn_liveness_task(hub.clone(), hub.config().liveness.clone());
    let result = axum::serve(listener, build_router(hub))
        .with_graceful_shutdown(shutdown)
        .await;
    liveness.abort();

    tracing::info!("keyhub relay shut down");
    result
}
