//! Redis-backed metadata store.
//!
//! Each logical key `k` is stored as two Redis keys:
//!
//! ```text
//! <prefix>k           the value
//! <prefix>k:version   an integer bumped on every write
//! ```
//!
//! Compare-and-swap runs as a Lua script, so the version check and the write
//! are atomic on the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};

use super::{with_timeout, CasOutcome, MetadataStore, Versioned};
use crate::error::StoreError;

/// Default key prefix.
pub const DEFAULT_REDIS_PREFIX: &str = "paperframe:";

/// Returns the new version, or -1 if the expected version did not match.
const CAS_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[2]) or '0')
if current ~= tonumber(ARGV[1]) then
    return -1
end
redis.call('SET', KEYS[1], ARGV[2])
return redis.call('INCR', KEYS[2])
"#;

/// Metadata store on a Redis server.
#[derive(Clone)]
pub struct RedisMetadataStore {
    connection_manager: ConnectionManager,
    prefix: String,
    timeout: Duration,
    url: String,
    cas_script: Script,
}

impl RedisMetadataStore {
    /// Connect to Redis.
    ///
    /// Fails if the URL is invalid or the server cannot be reached within
    /// `timeout`.
    pub async fn connect(
        url: &str,
        prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let connection_manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Connection(format!("timed out connecting to {}", url)))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            connection_manager,
            prefix: prefix.into(),
            timeout,
            url: url.to_string(),
            cas_script: Script::new(CAS_SCRIPT),
        })
    }

    fn data_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn version_key(&self, key: &str) -> String {
        format!("{}{}:version", self.prefix, key)
    }

    fn conn(&self) -> ConnectionManager {
        self.connection_manager.clone()
    }
}

fn redis_error(operation: &'static str, key: &str, err: redis::RedisError) -> StoreError {
    StoreError::Redis {
        operation,
        key: key.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl MetadataStore for RedisMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let mut conn = self.conn();
        let data_key = self.data_key(key);
        let version_key = self.version_key(key);

        let (value, version): (Option<String>, Option<u64>) =
            with_timeout(self.timeout, "get", key, async {
                redis::pipe()
                    .get(&data_key)
                    .get(&version_key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| redis_error("get", key, e))
            })
            .await?;

        Ok(value.map(|value| Versioned {
            value,
            version: version.unwrap_or(0),
        }))
    }

    async fn put(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let data_key = self.data_key(key);
        let version_key = self.version_key(key);

        let (version,): (u64,) = with_timeout(self.timeout, "put", key, async {
            redis::pipe()
                .atomic()
                .set(&data_key, value)
                .ignore()
                .incr(&version_key, 1)
                .query_async(&mut conn)
                .await
                .map_err(|e| redis_error("put", key, e))
        })
        .await?;

        Ok(version)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: &str,
    ) -> Result<CasOutcome, StoreError> {
        let mut conn = self.conn();
        let data_key = self.data_key(key);
        let version_key = self.version_key(key);

        let result: i64 = with_timeout(self.timeout, "compare_and_swap", key, async {
            self.cas_script
                .key(&data_key)
                .key(&version_key)
                .arg(expected_version)
                .arg(value)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| redis_error("compare_and_swap", key, e))
        })
        .await?;

        if result < 0 {
            Ok(CasOutcome::Conflict)
        } else {
            Ok(CasOutcome::Written {
                version: result as u64,
            })
        }
    }

    fn describe(&self) -> String {
        redact_url(&self.url)
    }
}

/// Drop any credentials embedded in a Redis URL.
fn redact_url(url: &str) -> String {
    match url.rsplit_once('@') {
        Some((scheme_and_auth, host)) => {
            let scheme = scheme_and_auth.split("://").next().unwrap_or("redis");
            format!("{}://{}", scheme, host)
        }
        None => url.to_string(),
    }
}
