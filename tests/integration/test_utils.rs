//! Test utilities for integration tests.
//!
//! Store doubles that wrap the in-memory backends and inject failures or
//! concurrent writes, plus helpers for building requests against the router.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use http_body_util::BodyExt;

use paperframe::carousel::{CarouselService, PhotoRecord, CAROUSEL_KEY, CURRENT_KEY};
use paperframe::error::StoreError;
use paperframe::server::{create_router, AdminCredentials, RouterConfig};
use paperframe::store::{
    CasOutcome, MemoryMetadataStore, MemoryObjectStore, MetadataStore, ObjectStore, StoredObject,
    Stores, Versioned,
};

pub const ADMIN_USER: &str = "frame-admin";
pub const ADMIN_PASS: &str = "correct horse:battery";
pub const BOUNDARY: &str = "paperframe-test-boundary";

/// Smallest JPEG-looking payload; content is never inspected.
pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9];

// =============================================================================
// Failure-Injecting Metadata Store
// =============================================================================

/// Metadata store that can fail writes or sneak in a competing write.
#[derive(Default)]
pub struct FlakyMetadataStore {
    inner: MemoryMetadataStore,
    fail_writes: AtomicBool,
    fail_writes_to: Mutex<Option<String>>,
    interfere: Mutex<Option<(String, String, String)>>,
    always_conflict: AtomicBool,
    cas_calls: AtomicU32,
}

impl FlakyMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail writes to one key only.
    pub fn fail_writes_to(&self, key: &str) {
        *self.fail_writes_to.lock().unwrap() = Some(key.to_string());
    }

    /// Before the next compare-and-swap on `key`, write `value` to it as if
    /// another request had committed first.
    pub fn interfere_once(&self, key: &str, value: &str) {
        self.interfere_before(key, key, value);
    }

    /// Before the next compare-and-swap on `trigger`, write `value` to `key`.
    pub fn interfere_before(&self, trigger: &str, key: &str, value: &str) {
        *self.interfere.lock().unwrap() =
            Some((trigger.to_string(), key.to_string(), value.to_string()));
    }

    /// Stop failing writes.
    pub fn heal(&self) {
        self.fail_writes.store(false, Ordering::SeqCst);
        *self.fail_writes_to.lock().unwrap() = None;
    }

    /// Make every compare-and-swap report a conflict.
    pub fn always_conflict(&self, conflict: bool) {
        self.always_conflict.store(conflict, Ordering::SeqCst);
    }

    pub fn cas_calls(&self) -> u32 {
        self.cas_calls.load(Ordering::SeqCst)
    }

    fn check_write(&self, operation: &'static str, key: &str) -> Result<(), StoreError> {
        let targeted = self.fail_writes_to.lock().unwrap().as_deref() == Some(key);
        if self.fail_writes.load(Ordering::SeqCst) || targeted {
            return Err(StoreError::Redis {
                operation,
                key: key.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        self.check_write("put", key)?;
        self.inner.put(key, value).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: &str,
    ) -> Result<CasOutcome, StoreError> {
        self.cas_calls.fetch_add(1, Ordering::SeqCst);
        self.check_write("compare_and_swap", key)?;

        let injected = {
            let mut slot = self.interfere.lock().unwrap();
            match slot.as_ref() {
                Some((trigger, _, _)) if trigger == key => slot.take(),
                _ => None,
            }
        };
        if let Some((_, target, competing)) = injected {
            self.inner.put(&target, &competing).await?;
        }

        if self.always_conflict.load(Ordering::SeqCst) {
            return Ok(CasOutcome::Conflict);
        }

        self.inner
            .compare_and_swap(key, expected_version, value)
            .await
    }

    fn describe(&self) -> String {
        "flaky-memory".to_string()
    }
}

// =============================================================================
// Failure-Injecting Object Store
// =============================================================================

/// Object store that can fail puts or deletes.
#[derive(Default)]
pub struct FlakyObjectStore {
    inner: MemoryObjectStore,
    fail_put: AtomicBool,
    fail_delete: AtomicBool,
}

impl FlakyObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_put(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.contains(key).await
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(StoreError::S3 {
                operation: "put_object",
                key: key.to_string(),
                message: "injected failure".to_string(),
            });
        }
        self.inner.put(key, data, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StoreError::S3 {
                operation: "delete_object",
                key: key.to_string(),
                message: "injected failure".to_string(),
            });
        }
        self.inner.delete(key).await
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list().await
    }

    fn describe(&self) -> String {
        "flaky-memory".to_string()
    }
}

// =============================================================================
// Test Application
// =============================================================================

/// Router plus direct handles on its stores.
pub struct TestApp {
    pub router: Router,
    pub service: CarouselService,
    pub metadata: Arc<FlakyMetadataStore>,
    pub objects: Arc<FlakyObjectStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    pub fn with_config(configure: impl FnOnce(RouterConfig) -> RouterConfig) -> Self {
        let metadata = Arc::new(FlakyMetadataStore::new());
        let objects = Arc::new(FlakyObjectStore::new());
        let service = CarouselService::new(Stores {
            metadata: metadata.clone(),
            objects: objects.clone(),
        });

        let config = configure(
            RouterConfig::new(AdminCredentials::new(ADMIN_USER, ADMIN_PASS)).with_tracing(false),
        );
        let router = create_router(service.clone(), config);

        Self {
            router,
            service,
            metadata,
            objects,
        }
    }

    /// Send a request through a clone of the router.
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Seed the carousel and pointer directly in the metadata store.
    pub async fn seed(&self, ids: &[u64], current: usize) {
        let carousel: Vec<_> = ids.iter().map(|id| photo(*id)).collect();
        for record in &carousel {
            self.objects
                .put(
                    &record.filename,
                    Bytes::from_static(JPEG_BYTES),
                    "image/jpeg",
                )
                .await
                .unwrap();
        }
        self.metadata
            .put(CAROUSEL_KEY, &serde_json::to_string(&carousel).unwrap())
            .await
            .unwrap();
        self.metadata
            .put(CURRENT_KEY, &current.to_string())
            .await
            .unwrap();
    }

    pub async fn stored_carousel(&self) -> Vec<PhotoRecord> {
        self.service.load_state().await.unwrap().carousel
    }

    pub async fn stored_ids(&self) -> Vec<u64> {
        self.stored_carousel().await.iter().map(|p| p.id).collect()
    }

    /// Upload through the API and return the new record.
    pub async fn upload(&self, filename: &str, title: Option<&str>) -> PhotoRecord {
        let response = self.send(upload_request(filename, title, JPEG_BYTES)).await;
        assert_eq!(response.status(), 201, "upload of {} failed", filename);
        body_json(response).await
    }
}

pub fn photo(id: u64) -> PhotoRecord {
    PhotoRecord {
        id,
        title: format!("Photo {}", id),
        filename: format!("seed-{}.jpg", id),
    }
}

// =============================================================================
// Request Builders
// =============================================================================

pub fn basic_auth(user: &str, pass: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass)))
}

pub fn admin_auth() -> String {
    basic_auth(ADMIN_USER, ADMIN_PASS)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn get_with_auth(uri: &str, authorization: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, authorization)
        .body(Body::empty())
        .unwrap()
}

pub fn admin_request(method: &str, uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, admin_auth())
        .body(body.into())
        .unwrap()
}

pub fn anonymous_request(method: &str, uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(body.into())
        .unwrap()
}

/// A multipart/form-data body with an optional title and an optional file.
pub fn multipart_body(title: Option<&str>, file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();

    if let Some(title) = title {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\n{}\r\n",
                BOUNDARY, title
            )
            .as_bytes(),
        );
    }

    if let Some((filename, data)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{}\"\r\n\
                 Content-Type: image/jpeg\r\n\r\n",
                BOUNDARY, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn upload_request_with_auth(
    authorization: Option<&str>,
    title: Option<&str>,
    file: Option<(&str, &[u8])>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/image")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(authorization) = authorization {
        builder = builder.header(header::AUTHORIZATION, authorization);
    }
    builder
        .body(Body::from(multipart_body(title, file)))
        .unwrap()
}

pub fn upload_request(filename: &str, title: Option<&str>, data: &[u8]) -> Request<Body> {
    upload_request_with_auth(Some(&admin_auth()), title, Some((filename, data)))
}

// =============================================================================
// Response Helpers
// =============================================================================

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json<T: serde::de::DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        panic!(
            "invalid JSON body {:?}: {}",
            String::from_utf8_lossy(&bytes),
            e
        )
    })
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}
