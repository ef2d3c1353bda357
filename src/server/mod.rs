//! HTTP server layer for Paperframe.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   OPTIONS → 204 │ CORS │ AuthContext │ handlers                 │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │    auth     │  │        routes           │  │
//! │  │ (requests)  │  │ (Basic-Auth)│  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod handlers;
pub mod routes;

pub use auth::{
    auth_context_middleware, basic_challenge, parse_basic_auth, realm_middleware, AdminCredentials,
    AdminGuard, AuthContext, AuthError, AuthSettings, Credentials,
};
pub use handlers::{ApiError, AppState, ErrorResponse, NowResponse, RequestContext, LIVENESS_TEXT};
pub use routes::{create_router, RouterConfig};
