//! Router configuration for Paperframe.
//!
//! This module defines the HTTP routes and applies middleware for
//! authentication, CORS and tracing.
//!
//! # Route Structure
//!
//! ```text
//! /api                    GET              - Liveness (public)
//! /api/auth/login         GET              - Basic-Auth challenge / redirect
//! /api/auth/logout        GET              - Forget cached credentials
//! /api/auth/check         GET              - 204 if authorized, else 400
//! /api/now/{kind}         GET              - Current photo id or image (public)
//! /api/now                POST             - Set current photo (admin)
//! /api/image              POST             - Upload (admin)
//! /api/image/{id}         GET / DELETE     - Photo bytes (public) / delete (admin)
//! /api/carousel           GET / POST       - List (public) / reorder (admin)
//! *                       OPTIONS          - 204 with CORS headers
//! ```
//!
//! Every response except a 401 carries `WWW-Authenticate` with the realm.
//!
//! # Example
//!
//! ```ignore
//! use paperframe::carousel::CarouselService;
//! use paperframe::server::{create_router, AdminCredentials, RouterConfig};
//! use paperframe::store::Stores;
//!
//! let service = CarouselService::new(Stores::in_memory());
//! let config = RouterConfig::new(AdminCredentials::new("admin", "secret"))
//!     .with_cors_origins(vec!["https://frame.example.com".to_string()]);
//!
//! let router = create_router(service, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::{auth_context_middleware, realm_middleware, AdminCredentials, AuthSettings};
use super::handlers::{
    auth_check_handler, carousel_handler, delete_image_handler, fallback_handler, image_handler,
    liveness_handler, login_handler, logout_handler, now_handler, preflight_middleware,
    reorder_handler, set_now_handler, upload_handler, AppState,
};
use crate::carousel::CarouselService;
use crate::config::{DEFAULT_CACHE_MAX_AGE, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_REALM};

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub admin: AdminCredentials,

    /// Realm advertised in the Basic-Auth challenge
    pub realm: String,

    /// Where `/api/auth/login` sends an authorized browser
    pub login_redirect: String,

    /// Allowed CORS origins (None = allow any)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age for image responses, in seconds
    pub cache_max_age: u32,

    /// Largest accepted upload body, in bytes
    pub max_upload_bytes: usize,

    /// Whether to add request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    pub fn new(admin: AdminCredentials) -> Self {
        Self {
            admin,
            realm: DEFAULT_REALM.to_string(),
            login_redirect: "/".to_string(),
            cors_origins: None, // Allow any origin by default
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            enable_tracing: true,
        }
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn with_login_redirect(mut self, location: impl Into<String>) -> Self {
        self.login_redirect = location.into();
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    fn auth_settings(&self) -> AuthSettings {
        AuthSettings::new(self.admin.clone())
            .with_realm(self.realm.clone())
            .with_login_redirect(self.login_redirect.clone())
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router.
pub fn create_router(service: CarouselService, config: RouterConfig) -> Router {
    let app_state =
        AppState::new(service, config.auth_settings()).with_cache_max_age(config.cache_max_age);
    let auth = app_state.auth.clone();

    let router = Router::new()
        .route("/api", get(liveness_handler))
        .route("/api/auth/login", get(login_handler))
        .route("/api/auth/logout", get(logout_handler))
        .route("/api/auth/check", get(auth_check_handler))
        .route("/api/now", post(set_now_handler))
        .route("/api/now/{kind}", get(now_handler))
        .route(
            "/api/image",
            post(upload_handler).layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .route(
            "/api/image/{id}",
            get(image_handler).delete(delete_image_handler),
        )
        .route("/api/carousel", get(carousel_handler).post(reorder_handler))
        .fallback(fallback_handler)
        .with_state(app_state)
        .layer(middleware::from_fn_with_state(auth.clone(), auth_context_middleware))
        .layer(build_cors_layer(&config))
        .layer(middleware::from_fn_with_state(auth, realm_middleware))
        .layer(middleware::from_fn(preflight_middleware));

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .expose_headers([WWW_AUTHENTICATE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
