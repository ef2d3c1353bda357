//! Storage backends for carousel metadata and photo bytes.
//!
//! The carousel lives in two independent backends:
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │      MetadataStore       │      │       ObjectStore        │
//! │  carousel / current /    │      │  photo bytes addressed   │
//! │  autoinc / orphans       │      │  by generated filename   │
//! │  (Redis, versioned CAS)  │      │  (S3 or S3-compatible)   │
//! └──────────────────────────┘      └──────────────────────────┘
//! ```
//!
//! There is no transaction spanning both. Callers order their writes so that a
//! partial failure can only leave an unreferenced blob behind.

mod memory;
mod redis_store;
mod s3_store;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::StorageArgs;
use crate::error::StoreError;

pub use memory::{MemoryMetadataStore, MemoryObjectStore};
pub use redis_store::{RedisMetadataStore, DEFAULT_REDIS_PREFIX};
pub use s3_store::{create_s3_client, S3ObjectStore};

/// A metadata value together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: String,

    /// Monotonic per-key write counter. 0 means the key was never written
    /// through a versioned write.
    pub version: u64,
}

/// Result of a compare-and-swap write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The value was written and now has this version
    Written { version: u64 },

    /// Another writer got there first; nothing was written
    Conflict,
}

impl CasOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, CasOutcome::Written { .. })
    }
}

/// Key-value store holding the carousel metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Read a key. Returns `None` if it has never been written.
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    /// Write a key unconditionally and return its new version.
    async fn put(&self, key: &str, value: &str) -> Result<u64, StoreError>;

    /// Write a key only if its current version equals `expected_version`.
    ///
    /// An absent key has version 0.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: &str,
    ) -> Result<CasOutcome, StoreError>;

    /// Short description for logs (e.g. `redis://host:6379`).
    fn describe(&self) -> String;
}

/// An object read back from the object store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: Option<String>,
}

/// Binary blob store holding photo files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError>;

    /// Fetch an object. Returns `None` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List all object keys.
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    fn describe(&self) -> String;
}

/// Both backends, ready to be shared across request handlers.
#[derive(Clone)]
pub struct Stores {
    pub metadata: Arc<dyn MetadataStore>,
    pub objects: Arc<dyn ObjectStore>,
}

impl Stores {
    /// Fresh in-memory backends.
    pub fn in_memory() -> Self {
        Self {
            metadata: Arc::new(MemoryMetadataStore::new()),
            objects: Arc::new(MemoryObjectStore::new()),
        }
    }

    /// Connect to the backends described by the storage arguments.
    pub async fn connect(args: &StorageArgs) -> Result<Self, StoreError> {
        if args.memory_store {
            return Ok(Self::in_memory());
        }

        let timeout = args.storage_timeout();

        let redis_url = args
            .redis_url
            .as_deref()
            .ok_or_else(|| StoreError::Connection("no Redis URL configured".to_string()))?;
        let metadata =
            RedisMetadataStore::connect(redis_url, args.redis_prefix.clone(), timeout).await?;

        let bucket = args
            .s3_bucket
            .clone()
            .ok_or_else(|| StoreError::Connection("no S3 bucket configured".to_string()))?;
        let client = create_s3_client(args.s3_endpoint.as_deref(), &args.s3_region).await;
        let objects = S3ObjectStore::new(client, bucket)
            .with_prefix(args.s3_prefix.clone())
            .with_timeout(timeout);

        Ok(Self {
            metadata: Arc::new(metadata),
            objects: Arc::new(objects),
        })
    }
}

/// Run a backend call with a deadline.
pub(crate) async fn with_timeout<T, F>(
    timeout: Duration,
    operation: &'static str,
    key: &str,
    fut: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            operation,
            key: key.to_string(),
        }),
    }
}
