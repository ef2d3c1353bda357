use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::{with_timeout, ObjectStore, StoredObject};
use crate::error::StoreError;

/// Default timeout for a single S3 call.
const DEFAULT_S3_TIMEOUT: Duration = Duration::from_secs(10);

/// S3-backed implementation of `ObjectStore`.
///
/// Photos are stored in S3 or S3-compatible storage (MinIO, R2, etc.) under
/// their generated filename, optionally below a key prefix.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    timeout: Duration,
}

impl S3ObjectStore {
    /// Create a new store for the given bucket.
    pub fn new(client: Client, bucket: String) -> Self {
        Self {
            client,
            bucket,
            prefix: None,
            timeout: DEFAULT_S3_TIMEOUT,
        }
    }

    /// Store objects below a key prefix (e.g. `"photos/"`).
    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        }
    }

    fn s3_error(operation: &'static str, key: &str, message: impl ToString) -> StoreError {
        StoreError::S3 {
            operation,
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        let object_key = self.object_key(key);

        with_timeout(self.timeout, "put_object", key, async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&object_key)
                .content_type(content_type)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::s3_error("put_object", key, e))?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let object_key = self.object_key(key);

        with_timeout(self.timeout, "get_object", key, async {
            let resp = match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&object_key)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    let is_missing = e
                        .as_service_error()
                        .map(|se| se.is_no_such_key())
                        .unwrap_or(false);
                    let status_is_404 = e
                        .raw_response()
                        .map(|r| r.status().as_u16() == 404)
                        .unwrap_or(false);

                    if is_missing || status_is_404 {
                        return Ok(None);
                    }
                    return Err(Self::s3_error("get_object", key, e));
                }
            };

            let content_type = resp.content_type().map(str::to_string);
            let data = resp
                .body
                .collect()
                .await
                .map_err(|e| Self::s3_error("get_object", key, e))?
                .into_bytes();

            Ok::<_, StoreError>(Some(StoredObject { data, content_type }))
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let object_key = self.object_key(key);

        with_timeout(self.timeout, "delete_object", key, async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&object_key)
                .send()
                .await
                .map_err(|e| Self::s3_error("delete_object", key, e))?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;
        let label = self.prefix.as_deref().unwrap_or("");

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .max_keys(1000);

            if let Some(ref prefix) = self.prefix {
                request = request.prefix(prefix);
            }
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let result = with_timeout(self.timeout, "list_objects", label, async {
                request
                    .send()
                    .await
                    .map_err(|e| Self::s3_error("list_objects", label, e))
            })
            .await?;

            for obj in result.contents() {
                if let Some(key) = obj.key() {
                    let key = match &self.prefix {
                        Some(prefix) => key.strip_prefix(prefix.as_str()).unwrap_or(key),
                        None => key,
                    };
                    keys.push(key.to_string());
                }
            }

            if result.is_truncated() == Some(true) {
                continuation_token = result.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(keys)
    }

    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix.as_deref().unwrap_or(""))
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services generally need path-style addressing
    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}
