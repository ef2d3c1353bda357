use thiserror::Error;

/// Errors raised by the metadata and object storage backends.
///
/// Every variant carries the operation and key involved so failures can be
/// diagnosed from logs. None of this detail is ever sent to HTTP clients.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 {operation} failed for '{key}': {message}")]
    S3 {
        operation: &'static str,
        key: String,
        message: String,
    },

    /// Error from the Redis metadata store
    #[error("Redis {operation} failed for '{key}': {message}")]
    Redis {
        operation: &'static str,
        key: String,
        message: String,
    },

    /// The backend did not answer within the configured timeout
    #[error("{operation} timed out for '{key}'")]
    Timeout { operation: &'static str, key: String },

    /// A persisted value exists but cannot be decoded
    #[error("Corrupt value under '{key}': {message}")]
    Corrupt { key: String, message: String },

    /// Network or connection error while setting up a backend
    #[error("Connection error: {0}")]
    Connection(String),
}

impl StoreError {
    /// Name of the operation that failed, for structured logging.
    pub fn operation(&self) -> &'static str {
        match self {
            StoreError::S3 { operation, .. }
            | StoreError::Redis { operation, .. }
            | StoreError::Timeout { operation, .. } => operation,
            StoreError::Corrupt { .. } => "decode",
            StoreError::Connection(_) => "connect",
        }
    }

    /// Key involved in the failed operation, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            StoreError::S3 { key, .. }
            | StoreError::Redis { key, .. }
            | StoreError::Timeout { key, .. }
            | StoreError::Corrupt { key, .. } => Some(key),
            StoreError::Connection(_) => None,
        }
    }
}

/// Errors produced by carousel operations.
#[derive(Debug, Clone, Error)]
pub enum CarouselError {
    /// Upload request carried no file
    #[error("No image file was supplied")]
    MissingFile,

    /// An id was not a non-negative integer
    #[error("Invalid photo id: {0}")]
    InvalidId(String),

    /// Reorder input was empty or not an array
    #[error("Order must be a non-empty array of photo ids")]
    EmptyOrder,

    /// Reorder input named the same id twice
    #[error("Order contains duplicate photo id {0}")]
    DuplicateId(u64),

    /// Reorder input does not cover the whole carousel
    #[error("Order has {actual} ids but the carousel has {expected} photos")]
    LengthMismatch { expected: usize, actual: usize },

    /// Request was malformed in some other way
    #[error("{0}")]
    InvalidRequest(String),

    /// No photo with this id
    #[error("Photo not found: {id}")]
    PhotoNotFound { id: u64 },

    /// The carousel is empty so there is no current photo
    #[error("The carousel is empty")]
    EmptyCarousel,

    /// A rebuilt carousel lost records, so it was not persisted
    #[error("Rebuilt carousel has {actual} photos, expected {expected}")]
    Inconsistent { expected: usize, actual: usize },

    /// Versioned writes kept conflicting with concurrent writers
    #[error("Gave up after {attempts} conflicting attempts to write '{key}'")]
    Contention { key: &'static str, attempts: u32 },

    /// A storage backend failed
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl CarouselError {
    /// Whether the caller sent bad input, as opposed to a server-side failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CarouselError::MissingFile
                | CarouselError::InvalidId(_)
                | CarouselError::EmptyOrder
                | CarouselError::DuplicateId(_)
                | CarouselError::LengthMismatch { .. }
                | CarouselError::InvalidRequest(_)
        )
    }
}
