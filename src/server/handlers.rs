//! HTTP request handlers for the Paperframe API.
//!
//! # Endpoints
//!
//! - `GET /api` - Liveness text
//! - `GET /api/auth/login` - Basic-Auth challenge, redirect once authorized
//! - `GET /api/auth/logout` - Bare 401 so the browser forgets its credentials
//! - `GET /api/auth/check` - 204 if authorized, else 400
//! - `GET /api/now/{kind}` - Current photo id (`id`) or a redirect to its image (`image`)
//! - `POST /api/now` - Set the current photo (admin)
//! - `POST /api/image` - Upload a photo (admin)
//! - `GET /api/image/{id}` - Photo bytes
//! - `DELETE /api/image/{id}` - Delete a photo (admin)
//! - `GET /api/carousel` - Photo records in display order
//! - `POST /api/carousel` - Reorder the carousel (admin)

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{
        multipart::{MultipartError, MultipartRejection},
        FromRequestParts, Multipart, Path, Request, State,
    },
    http::{header, request::Parts, Method, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::carousel::{CarouselService, CarouselState, NewPhoto, PhotoRecord};
use crate::error::CarouselError;

use super::auth::{AdminGuard, AuthContext, AuthError, AuthSettings};

/// Text returned by the liveness endpoint.
pub const LIVENESS_TEXT: &str = "Paperframe backend is running";

// =============================================================================
// Application State
// =============================================================================

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: CarouselService,

    pub auth: Arc<AuthSettings>,

    /// Cache-Control max-age for image responses, in seconds
    pub cache_max_age: u32,
}

impl AppState {
    pub fn new(service: CarouselService, auth: AuthSettings) -> Self {
        Self {
            service,
            auth: Arc::new(auth),
            cache_max_age: crate::config::DEFAULT_CACHE_MAX_AGE,
        }
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }
}

/// Request-scoped context: the caller's authorization and a fresh snapshot of
/// the carousel. Nothing is cached between requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub auth: AuthContext,
    pub state: CarouselState,
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        app: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .extensions
            .get::<AuthContext>()
            .copied()
            .unwrap_or_default();
        let state = app.service.load_state().await?;
        Ok(Self { auth, state })
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,

    /// Human-readable message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Response to `POST /api/now`.
#[derive(Debug, Serialize)]
pub struct NowResponse {
    pub id: u64,

    /// Position of the photo in the carousel
    pub current: usize,
}

// =============================================================================
// Error Mapping
// =============================================================================

impl IntoResponse for CarouselError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            CarouselError::MissingFile => (StatusCode::BAD_REQUEST, "missing_file"),
            CarouselError::InvalidId(_) => (StatusCode::BAD_REQUEST, "invalid_id"),
            CarouselError::EmptyOrder => (StatusCode::BAD_REQUEST, "empty_order"),
            CarouselError::DuplicateId(_) => (StatusCode::BAD_REQUEST, "duplicate_id"),
            CarouselError::LengthMismatch { .. } => (StatusCode::BAD_REQUEST, "length_mismatch"),
            CarouselError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            CarouselError::PhotoNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            CarouselError::EmptyCarousel => (StatusCode::NOT_FOUND, "empty_carousel"),
            CarouselError::Inconsistent { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "inconsistent_carousel")
            }
            CarouselError::Contention { .. } => (StatusCode::SERVICE_UNAVAILABLE, "busy"),
            CarouselError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };

        // Backend details stay in the logs
        let message = match &self {
            CarouselError::Storage(store_err) => {
                error!(
                    error_type = error_type,
                    status = status.as_u16(),
                    operation = store_err.operation(),
                    key = store_err.key().unwrap_or(""),
                    "Storage error: {}",
                    store_err
                );
                "A storage backend failed; please try again later".to_string()
            }
            CarouselError::Contention { .. } => {
                warn!(
                    error_type = error_type,
                    status = status.as_u16(),
                    "Write contention: {}",
                    self
                );
                "The carousel is being changed by another request; please retry".to_string()
            }
            _ => {
                if status.is_server_error() {
                    error!(
                        error_type = error_type,
                        status = status.as_u16(),
                        "Server error: {}",
                        self
                    );
                } else if status == StatusCode::NOT_FOUND {
                    debug!(
                        error_type = error_type,
                        status = status.as_u16(),
                        "Resource not found: {}",
                        self
                    );
                } else {
                    warn!(
                        error_type = error_type,
                        status = status.as_u16(),
                        "Client error: {}",
                        self
                    );
                }
                self.to_string()
            }
        };

        let body = Json(ErrorResponse::with_status(error_type, message, status));
        let mut response = (status, body).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
        }
        response
    }
}

/// Errors a handler can return.
#[derive(Debug)]
pub enum ApiError {
    Carousel(CarouselError),

    Auth(AuthError),

    /// The multipart body could not be read
    Upload { status: StatusCode, message: String },

    /// No route matches the request
    RouteNotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Carousel(err) => err.into_response(),
            ApiError::Auth(err) => err.into_response(),
            ApiError::Upload { status, message } => {
                warn!(
                    error_type = "invalid_upload",
                    status = status.as_u16(),
                    "Client error: {}",
                    message
                );
                let body = Json(ErrorResponse::with_status("invalid_upload", message, status));
                (status, body).into_response()
            }
            ApiError::RouteNotFound(path) => {
                let status = StatusCode::NOT_FOUND;
                debug!(error_type = "not_found", path = %path, "Route not found");
                let body = Json(ErrorResponse::with_status(
                    "not_found",
                    format!("Route not found: {}", path),
                    status,
                ));
                (status, body).into_response()
            }
        }
    }
}

impl From<CarouselError> for ApiError {
    fn from(err: CarouselError) -> Self {
        ApiError::Carousel(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Upload {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(err: MultipartRejection) -> Self {
        ApiError::Upload {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

// =============================================================================
// Input Parsing
// =============================================================================

/// Parse a photo id given as text.
pub fn parse_id(raw: &str) -> Result<u64, CarouselError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CarouselError::InvalidId(raw.to_string()));
    }
    trimmed
        .parse()
        .map_err(|_| CarouselError::InvalidId(raw.to_string()))
}

fn parse_id_value(value: &Value) -> Result<u64, CarouselError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| CarouselError::InvalidId(n.to_string())),
        Value::String(s) => parse_id(s),
        other => Err(CarouselError::InvalidId(other.to_string())),
    }
}

/// Parse the body of `POST /api/now`: a bare integer, as JSON or plain text.
pub fn parse_id_body(body: &str) -> Result<u64, CarouselError> {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => parse_id_value(&value),
        Err(_) => parse_id(body),
    }
}

/// Parse the body of `POST /api/carousel`: a JSON array of ids.
pub fn parse_order(body: &[u8]) -> Result<Vec<u64>, CarouselError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        CarouselError::InvalidRequest(format!("Order must be a JSON array: {}", e))
    })?;
    let items = value.as_array().ok_or(CarouselError::EmptyOrder)?;
    items.iter().map(parse_id_value).collect()
}

/// Content type for a stored photo, inferred from its filename.
fn image_content_type(filename: &str, stored: Option<&str>) -> String {
    match mime_guess::from_path(filename).first() {
        Some(mime) => mime.to_string(),
        None => stored
            .filter(|ct| !ct.is_empty())
            .unwrap_or("application/octet-stream")
            .to_string(),
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// `GET /api`
pub async fn liveness_handler() -> &'static str {
    LIVENESS_TEXT
}

/// `GET /api/auth/check`
///
/// Read-only: 204 if the request carries admin credentials, otherwise 400.
pub async fn auth_check_handler(auth: AuthContext) -> StatusCode {
    if auth.authorized {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::BAD_REQUEST
    }
}

/// `GET /api/auth/login`
///
/// Without admin credentials, answers with a Basic-Auth challenge so the
/// browser prompts for them. Once authorized, redirects to the admin UI.
pub async fn login_handler(
    State(app): State<AppState>,
    auth: AuthContext,
) -> Result<Redirect, AuthError> {
    if auth.authorized {
        debug!(location = %app.auth.login_redirect, "Login accepted");
        Ok(Redirect::to(&app.auth.login_redirect))
    } else {
        Err(AuthError::LoginRequired {
            realm: app.auth.realm.clone(),
        })
    }
}

/// `GET /api/auth/logout`
pub async fn logout_handler() -> AuthError {
    AuthError::LoggedOut
}

/// `GET /api/now/{kind}`
///
/// `id` returns the current photo's id as JSON; `image` redirects to its bytes.
pub async fn now_handler(Path(kind): Path<String>, ctx: RequestContext) -> Result<Response, ApiError> {
    if kind != "id" && kind != "image" {
        return Err(ApiError::RouteNotFound(format!("/api/now/{}", kind)));
    }

    let photo = ctx
        .state
        .current_photo()
        .ok_or(CarouselError::EmptyCarousel)?;

    let no_store = [(header::CACHE_CONTROL, "no-store")];
    let response = if kind == "id" {
        (no_store, Json(photo.id)).into_response()
    } else {
        let location = format!("/api/image/{}", photo.id);
        (no_store, Redirect::temporary(&location)).into_response()
    };

    Ok(response)
}

/// `POST /api/now` (admin)
///
/// Body is the id of the photo to display.
pub async fn set_now_handler(
    _admin: AdminGuard,
    State(app): State<AppState>,
    ctx: RequestContext,
    body: String,
) -> Result<Json<NowResponse>, ApiError> {
    let id = parse_id_body(&body)?;
    let current = app.service.set_current(ctx.state, id).await?;
    Ok(Json(NowResponse { id, current }))
}

/// `POST /api/image` (admin)
///
/// Multipart form with an `image` file field and an optional `title` field.
/// Responds 201 with the new photo record.
pub async fn upload_handler(
    _admin: AdminGuard,
    State(app): State<AppState>,
    ctx: RequestContext,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<PhotoRecord>), ApiError> {
    let mut multipart = multipart?;
    let mut photo = NewPhoto::default();
    let mut has_file = false;

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("image") => {
                photo.original_name = field.file_name().map(str::to_string);
                photo.content_type = field.content_type().map(str::to_string);
                photo.data = field.bytes().await?;
                has_file = true;
            }
            Some("title") => {
                photo.title = Some(field.text().await?);
            }
            other => {
                debug!(field = ?other, "Ignoring unknown upload field");
            }
        }
    }

    if !has_file {
        return Err(CarouselError::MissingFile.into());
    }

    let record = app.service.upload(ctx.state, photo).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /api/image/{id}`
pub async fn image_handler(
    State(app): State<AppState>,
    Path(id): Path<String>,
    ctx: RequestContext,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let (record, object) = app.service.fetch_image(&ctx.state, id).await?;

    let content_type = image_content_type(&record.filename, object.content_type.as_deref());
    let cache_control = format!("public, max-age={}", app.cache_max_age);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, cache_control),
        ],
        Body::from(object.data),
    )
        .into_response())
}

/// `DELETE /api/image/{id}` (admin)
pub async fn delete_image_handler(
    _admin: AdminGuard,
    State(app): State<AppState>,
    Path(id): Path<String>,
    ctx: RequestContext,
) -> Result<Json<PhotoRecord>, ApiError> {
    let id = parse_id(&id)?;
    let removed = app.service.delete(ctx.state, id).await?;
    Ok(Json(removed))
}

/// `GET /api/carousel`
pub async fn carousel_handler(ctx: RequestContext) -> Json<Vec<PhotoRecord>> {
    Json(ctx.state.carousel)
}

/// `POST /api/carousel` (admin)
///
/// Body is a JSON array with every id in the carousel, in the new order.
pub async fn reorder_handler(
    _admin: AdminGuard,
    State(app): State<AppState>,
    ctx: RequestContext,
    body: Bytes,
) -> Result<Json<Vec<PhotoRecord>>, ApiError> {
    let order = parse_order(&body)?;
    let carousel = app.service.reorder(ctx.state, order).await?;
    Ok(Json(carousel))
}

/// Any unmatched route.
pub async fn fallback_handler(uri: Uri) -> ApiError {
    ApiError::RouteNotFound(uri.path().to_string())
}

/// Answer every OPTIONS request with 204, keeping the CORS headers.
pub async fn preflight_middleware(request: Request, next: Next) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;

    if is_options {
        *response.status_mut() = StatusCode::NO_CONTENT;
        *response.body_mut() = Body::empty();
        response.headers_mut().remove(header::CONTENT_TYPE);
        response.headers_mut().remove(header::CONTENT_LENGTH);
    }

    response
}

// =============================================================================
// Tests
// =============================================================================
