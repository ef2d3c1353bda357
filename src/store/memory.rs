//! In-memory storage backends.
//!
//! These mirror the semantics of the Redis and S3 backends exactly, including
//! versioned writes, so they can stand in for both in tests and in
//! `--memory-store` development mode.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{CasOutcome, MetadataStore, ObjectStore, StoredObject, Versioned};
use crate::error::StoreError;

/// Metadata store backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryMetadataStore {
    entries: RwLock<HashMap<String, Versioned>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let version = entries.get(key).map_or(0, |v| v.version) + 1;
        entries.insert(
            key.to_string(),
            Versioned {
                value: value.to_string(),
                version,
            },
        );
        Ok(version)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: &str,
    ) -> Result<CasOutcome, StoreError> {
        // Check and write under one lock
        let mut entries = self.entries.write().await;
        let current = entries.get(key).map_or(0, |v| v.version);
        if current != expected_version {
            return Ok(CasOutcome::Conflict);
        }

        let version = current + 1;
        entries.insert(
            key.to_string(),
            Versioned {
                value: value.to_string(),
                version,
            },
        );
        Ok(CasOutcome::Written { version })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Object store backed by a `BTreeMap` so listings come back sorted.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: Some(content_type.to_string()),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.objects.read().await.keys().cloned().collect())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
