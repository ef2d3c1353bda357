//! HTTP Basic authentication for the admin.
//!
//! There is a single admin credential pair, supplied through configuration.
//! No sessions or tokens are issued; the browser's credential cache is the
//! only session. Every request is classified once by [`auth_context_middleware`]
//! and the result is stored in the request extensions:
//!
//! ```text
//! Authorization header ──► parse_basic_auth ──► AdminCredentials::matches
//!                                                      │
//!                                                      ▼
//!                                         AuthContext { authorized }
//!                                                      │
//!                          ┌───────────────────────────┴──────────────┐
//!                          ▼                                          ▼
//!               GET /api/auth/check                         AdminGuard extractor
//!               (read-only query)                      (401 before any mutation)
//! ```
//!
//! Comparison of the supplied credentials is constant-time.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

use super::handlers::ErrorResponse;

/// Standard alphabet, padding optional.
const BASIC_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// =============================================================================
// Types
// =============================================================================

/// A username/password pair decoded from an `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// The configured admin identity.
#[derive(Clone)]
pub struct AdminCredentials {
    username: String,
    password: String,
}

impl AdminCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Whether both username and password match exactly.
    pub fn matches(&self, credentials: &Credentials) -> bool {
        let user = self
            .username
            .as_bytes()
            .ct_eq(credentials.username.as_bytes());
        let pass = self
            .password
            .as_bytes()
            .ct_eq(credentials.password.as_bytes());
        (user & pass).into()
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authentication settings shared by the middleware and the auth handlers.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub admin: AdminCredentials,

    /// Realm advertised in the Basic-Auth challenge
    pub realm: String,

    /// Where a successful login sends the browser
    pub login_redirect: String,
}

impl AuthSettings {
    pub fn new(admin: AdminCredentials) -> Self {
        Self {
            admin,
            realm: crate::config::DEFAULT_REALM.to_string(),
            login_redirect: "/".to_string(),
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

    /// Classify a request from its `Authorization` header.
    pub fn authorize(&self, header: Option<&str>) -> AuthContext {
        let authorized = parse_basic_auth(header)
            .map(|credentials| self.admin.matches(&credentials))
            .unwrap_or(false);
        AuthContext { authorized }
    }
}

/// Per-request authorization, computed once by the middleware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub authorized: bool,
}

/// Authentication failures.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// A privileged route was called without admin credentials
    #[error("Admin credentials required")]
    Unauthorized,

    /// Login was requested without valid credentials; carries the realm
    #[error("Login required")]
    LoginRequired { realm: String },

    /// Logout: a bare 401 so the browser drops its cached credentials
    #[error("Logged out")]
    LoggedOut,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = StatusCode::UNAUTHORIZED;
        let error_type = match &self {
            AuthError::Unauthorized => "unauthorized",
            AuthError::LoginRequired { .. } => "login_required",
            AuthError::LoggedOut => "logged_out",
        };

        match &self {
            AuthError::Unauthorized => warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Rejected privileged request without admin credentials"
            ),
            _ => debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Authentication: {}",
                self
            ),
        }

        let body = Json(ErrorResponse::with_status(error_type, self.to_string(), status));
        let mut response = (status, body).into_response();

        if let AuthError::LoginRequired { realm } = &self {
            if let Some(value) = basic_challenge(realm) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
        }

        response
    }
}

// =============================================================================
// Credential Parsing
// =============================================================================

/// Parse an `Authorization` header of the form `Basic <token68>`.
///
/// The scheme is case-insensitive and may be surrounded by spaces. The decoded
/// token must be `user:password`; the user may not contain `:` but the password
/// may. Returns `None` on any malformed input.
pub fn parse_basic_auth(header: Option<&str>) -> Option<Credentials> {
    let value = header?.trim_matches(' ');
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let token = token.trim_start_matches(' ');
    if !is_token68(token) {
        return None;
    }

    let decoded = BASIC_ENGINE.decode(token).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;

    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// token68 = 1*( ALPHA / DIGIT / "-" / "." / "_" / "~" / "+" / "/" ) *"="
fn is_token68(token: &str) -> bool {
    let body = token.trim_end_matches('=');
    !body.is_empty()
        && body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~' | b'+' | b'/'))
}

// =============================================================================
// Middleware and Extractors
// =============================================================================

/// Compute the request's [`AuthContext`] and store it in the extensions.
pub async fn auth_context_middleware(
    State(settings): State<Arc<AuthSettings>>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let context = settings.authorize(header);

    request.extensions_mut().insert(context);
    next.run(request).await
}

/// `WWW-Authenticate` value naming the realm, if it is a valid header value.
pub fn basic_challenge(realm: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("Basic realm=\"{}\", charset=\"UTF-8\"", realm)).ok()
}

/// Advertise the realm on every response except 401s.
///
/// Logout and the admin gate answer 401 without a challenge so browsers drop
/// cached credentials instead of prompting; the login challenge sets its own.
pub async fn realm_middleware(
    State(settings): State<Arc<AuthSettings>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;

    if response.status() != StatusCode::UNAUTHORIZED
        && !response.headers().contains_key(header::WWW_AUTHENTICATE)
    {
        if let Some(value) = basic_challenge(&settings.realm) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
    }

    response
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Without the middleware nobody is authorized
        Ok(parts
            .extensions
            .get::<AuthContext>()
            .copied()
            .unwrap_or_default())
    }
}

/// Proof that the request is from the admin.
///
/// Put it first in a handler's argument list so unauthorized requests are
/// rejected before anything else is extracted or loaded.
#[derive(Debug, Clone, Copy)]
pub struct AdminGuard(());

impl AdminGuard {
    /// Continue with the guard, or terminate with 401.
    pub fn check(context: AuthContext) -> Result<Self, AuthError> {
        if context.authorized {
            Ok(AdminGuard(()))
        } else {
            Err(AuthError::Unauthorized)
        }
    }
}

impl<S> FromRequestParts<S> for AdminGuard
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = parts
            .extensions
            .get::<AuthContext>()
            .copied()
            .unwrap_or_default();
        AdminGuard::check(context)
    }
}

// =============================================================================
// Tests
// =============================================================================
