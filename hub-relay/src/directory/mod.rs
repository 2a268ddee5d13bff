//! Public key directory.
//!
//! A flat user id → public key table. Keys are opaque strings (base64 by
//! convention); the relay never decodes or validates them.

mod memory;

pub use memory::MemoryKeyDirectory;

use crate::error::DirectoryResult;
use async_trait::async_trait;
use hub_types::UserId;
use serde::Serialize;
use std::collections::BTreeMap;

/// A registered public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyRecord {
    /// Owner of the key.
    pub user_id: UserId,
    /// Encoded key material, exactly as registered.
    pub public_key: String,
}

/// Trait for key directory backends.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Insert or overwrite the key for a user.
    ///
    /// Both arguments must be non-empty. Returns the stored record.
    async fn put(&self, user_id: &str, public_key: &str) -> DirectoryResult<PublicKeyRecord>;

    /// Look up the key for a user.
    async fn get(&self, user_id: &str) -> DirectoryResult<Option<PublicKeyRecord>>;

    /// All registered keys, ordered by user id.
    async fn list_all(&self) -> DirectoryResult<BTreeMap<UserId, String>>;

    /// Number of registered keys.
    async fn count(&self) -> DirectoryResult<usize>;
}
