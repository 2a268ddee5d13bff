//! In-memory key directory backend.

use super::{KeyDirectory, PublicKeyRecord};
use crate::error::{DirectoryError, DirectoryResult};
use async_trait::async_trait;
use dashmap::DashMap;
use hub_types::UserId;
use std::collections::BTreeMap;

/// Key directory held in process memory.
///
/// Contents live for the lifetime of the process and are gone on restart.
#[derive(Debug, Default)]
pub struct MemoryKeyDirectory {
    keys: DashMap<UserId, String>,
}

impl MemoryKeyDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyDirectory for MemoryKeyDirectory {
    async fn put(&self, user_id: &str, public_key: &str) -> DirectoryResult<PublicKeyRecord> {
        let user_id = UserId::new(user_id).ok_or(DirectoryError::MissingField)?;
        if public_key.is_empty() {
            return Err(DirectoryError::MissingField);
        }

        let replaced = self
            .keys
            .insert(user_id.clone(), public_key.to_string())
            .is_some();
        tracing::debug!("Stored public key for {} (replaced: {})", user_id, replaced);

        Ok(PublicKeyRecord {
            user_id,
            public_key: public_key.to_string(),
        })
    }

    async fn get(&self, user_id: &str) -> DirectoryResult<Option<PublicKeyRecord>> {
        Ok(self.keys.get(user_id).map(|entry| PublicKeyRecord {
            user_id: entry.key().clone(),
            public_key: entry.value().clone(),
        }))
    }

    async fn list_all(&self) -> DirectoryResult<BTreeMap<UserId, String>> {
        Ok(self
            .keys
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn count(&self) -> DirectoryResult<usize> {
        Ok(self.keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_returns_record() {
        let directory = MemoryKeyDirectory::new();

        directory.put("alice", "QUJD").await.unwrap();
        let record = directory.get("alice").await.unwrap().unwrap();

        assert_eq!(record.user_id.as_str(), "alice");
        assert_eq!(record.public_key, "QUJD");
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let directory = MemoryKeyDirectory::new();
        assert!(directory.get("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let directory = MemoryKeyDirectory::new();

        directory.put("alice", "b2xk").await.unwrap();
        directory.put("alice", "bmV3").await.unwrap();

        let record = directory.get("alice").await.unwrap().unwrap();
        assert_eq!(record.public_key, "bmV3");
        assert_eq!(directory.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn put_rejects_empty_fields() {
        let directory = MemoryKeyDirectory::new();

        assert_eq!(
            directory.put("", "QUJD").await.unwrap_err(),
            DirectoryError::MissingField
        );
        assert_eq!(
            directory.put("alice", "").await.unwrap_err(),
            DirectoryError::MissingField
        );
        assert_eq!(directory.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_all_is_sorted_by_user() {
        let directory = MemoryKeyDirectory::new();
        directory.put("carol", "Yw==").await.unwrap();
        directory.put("alice", "YQ==").await.unwrap();
        directory.put("bob", "Yg==").await.unwrap();

        let all = directory.list_all().await.unwrap();
        let users: Vec<&str> = all.keys().map(UserId::as_str).collect();
        assert_eq!(users, vec!["alice", "bob", "carol"]);
        assert_eq!(all.get("bob").map(String::as_str), Some("Yg=="));
    }

    #[tokio::test]
    async fn public_key_record_serializes_camel_case() {
        let directory = MemoryKeyDirectory::new();
        let record = directory.put("alice", "QUJD").await.unwrap();

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"userId":"alice","publicKey":"QUJD"}"#);
    }
}
