//! # Paperframe
//!
//! Backend for a digital picture frame.
//!
//! Paperframe keeps an ordered collection of photos (the carousel), tracks
//! which one is on display, accepts uploads, deletes and reordering from a
//! single admin, and advances the displayed photo on a schedule.
//!
//! ## Features
//!
//! - **Two backends**: carousel metadata in Redis, photo bytes in S3 or any
//!   S3-compatible store
//! - **Safe concurrent edits**: every metadata write is a versioned
//!   compare-and-swap, retried on conflict
//! - **Bounded failure windows**: writes spanning both backends are ordered so
//!   a failure can only strand an unreferenced file, which is recorded for
//!   cleanup by `paperframe reconcile`
//! - **Basic-Auth admin**: one configured credential pair, no sessions
//! - **Scheduled rotation**: an in-process timer, or `paperframe rotate` from
//!   an external scheduler
//!
//! ## Architecture
//!
//! - [`store`] - Metadata and object store traits, Redis/S3/in-memory backends
//! - [`carousel`] - Carousel model, state loading, mutations, rotation, cleanup
//! - [`server`] - Axum HTTP surface, Basic-Auth and routes
//! - [`config`] - CLI and configuration types
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use paperframe::{create_router, AdminCredentials, CarouselService, RouterConfig, Stores};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = CarouselService::new(Stores::in_memory());
//!     let router = create_router(
//!         service,
//!         RouterConfig::new(AdminCredentials::new("admin", "secret")),
//!     );
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod carousel;
pub mod config;
pub mod error;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use carousel::{
    reconcile_orphans, CarouselService, CarouselState, NewPhoto, PhotoRecord, ReconcileReport,
    RotationOutcome, RotationScheduler,
};
pub use config::{CheckConfig, Cli, Command, ReconcileConfig, RotateConfig, ServeConfig, StorageArgs};
pub use error::{CarouselError, StoreError};
pub use server::{
    create_router, AdminCredentials, AppState, AuthError, ErrorResponse, RouterConfig,
};
pub use store::{
    create_s3_client, MemoryMetadataStore, MemoryObjectStore, MetadataStore, ObjectStore,
    RedisMetadataStore, S3ObjectStore, Stores,
};
