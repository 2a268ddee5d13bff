//! Rate limiting for keyhub-relay.
//!
//! Protects the relay from a single chatty connection and from aggregate
//! overload. Identity claims are unauthenticated, so limits are keyed by
//! [`ConnectionId`] rather than by user id: re-identifying cannot reset a
//! connection's budget.
//!
//! Both limiters use the governor crate; the keyed one is backed by DashMap.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use hub_types::ConnectionId;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits inbound frames per connection.
    ///
    /// Configured via `limits.messages_per_minute`.
    frame_limiter: Arc<KeyedLimiter<ConnectionId>>,

    /// Global frame limiter across all connections.
    ///
    /// Configured via `limits.global_requests_per_second`.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("frame_limiter", &"KeyedLimiter<ConnectionId>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configured rates are zero. [`Config::validate`] rejects
    /// such configurations.
    ///
    /// [`Config::validate`]: crate::config::Config::validate
    pub fn new(config: &LimitsConfig) -> Self {
        let per_minute =
            NonZeroU32::new(config.messages_per_minute).expect("messages_per_minute must be > 0");
        let global_rps = NonZeroU32::new(config.global_requests_per_second)
            .expect("global_requests_per_second must be > 0");

        Self {
            frame_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global_rps))),
        }
    }

    /// Check whether a connection may send another frame.
    pub fn check_frame(&self, connection: &ConnectionId) -> Result<(), RateLimitError> {
        self.frame_limiter
            .check_key(connection)
            .map_err(|_| RateLimitError::FrameLimitExceeded)
    }

    /// Check the server-wide frame rate.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Number of connections with limiter state (for metrics).
    pub fn tracked_connections(&self) -> usize {
        self.frame_limiter.len()
    }

    /// Evict limiter state for connections whose budget has fully recharged.
    ///
    /// Closed connections leave entries behind; call periodically.
    pub fn shrink(&self) {
        self.frame_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many frames from this connection.
    #[error("frame rate limit exceeded")]
    FrameLimitExceeded,
    /// Too many frames across all connections.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}
