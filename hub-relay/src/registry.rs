//! User id → connection routing table.
//!
//! Each user id maps to at most one connection. Registration is last writer
//! wins: a reconnecting client simply identifies again and takes over the
//! entry. The displaced connection is left running; it either closes on its
//! own or is reaped by the liveness monitor, and its close handling cannot
//! evict the newer entry because removal is guarded by connection id.

use crate::connection::ConnectionHandle;
use dashmap::DashMap;
use hub_types::{ConnectionId, UserId};

/// Concurrent user id → connection table.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    routes: DashMap<UserId, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `handle`, returning the handle it displaced, if any.
    ///
    /// The displaced connection is not closed.
    pub fn register(&self, user_id: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let id = handle.id();
        let previous = self.routes.insert(user_id.clone(), handle);

        match &previous {
            Some(old) if old.id() != id => tracing::debug!(
                "Registered {} on {:?}, replacing {:?} (total: {})",
                user_id,
                id,
                old.id(),
                self.routes.len()
            ),
            _ => tracing::debug!(
                "Registered {} on {:?} (total: {})",
                user_id,
                id,
                self.routes.len()
            ),
        }

        previous
    }

    /// Look up the connection currently bound to `user_id`.
    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.routes.get(user_id).map(|entry| entry.value().clone())
    }

    /// Remove the entry for `user_id` only if it still points at `connection`.
    ///
    /// The check and the removal happen under the same shard lock, so a
    /// concurrent `register` for the same user id is never undone. Returns
    /// whether an entry was removed.
    pub fn unregister_if_current(&self, user_id: &str, connection: ConnectionId) -> bool {
        let removed = self
            .routes
            .remove_if(user_id, |_, current| current.id() == connection)
            .is_some();

        if removed {
            tracing::debug!(
                "Unregistered {} from {:?} (remaining: {})",
                user_id,
                connection,
                self.routes.len()
            );
        } else {
            tracing::debug!(
                "Kept registration for {}: {:?} is no longer current",
                user_id,
                connection
            );
        }

        removed
    }

    /// Number of registered user ids.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no user id is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
