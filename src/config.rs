//! Configuration management for Paperframe.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `PAPERFRAME_` prefix. Storage options are shared by all
//! subcommands.
//!
//! # Environment Variables
//!
//! - `PAPERFRAME_HOST` - Server bind address (default: 0.0.0.0)
//! - `PAPERFRAME_PORT` - Server port (default: 3000)
//! - `PAPERFRAME_ADMIN_USER` / `PAPERFRAME_ADMIN_PASS` - Admin credentials (required to serve)
//! - `PAPERFRAME_AUTH_REALM` - Basic-Auth realm (default: Paperframe)
//! - `PAPERFRAME_LOGIN_REDIRECT` - Where `/api/auth/login` sends an authorized browser (default: /)
//! - `PAPERFRAME_ROTATE_INTERVAL` - Seconds between rotations, 0 disables (default: 3600)
//! - `PAPERFRAME_REDIS_URL` - Metadata store URL
//! - `PAPERFRAME_REDIS_PREFIX` - Key prefix in Redis (default: paperframe:)
//! - `PAPERFRAME_S3_BUCKET` - Bucket holding photo files
//! - `PAPERFRAME_S3_ENDPOINT` - Custom endpoint for S3-compatible services
//! - `PAPERFRAME_S3_REGION` - AWS region (default: us-east-1)
//! - `PAPERFRAME_S3_PREFIX` - Key prefix for photo files
//! - `PAPERFRAME_STORAGE_TIMEOUT` - Seconds before a storage call is abandoned (default: 10)
//! - `PAPERFRAME_MEMORY_STORE` - Keep everything in process memory (development only)

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::carousel::DEFAULT_MAX_ATTEMPTS;
use crate::store::DEFAULT_REDIS_PREFIX;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default Basic-Auth realm.
pub const DEFAULT_REALM: &str = "Paperframe";

/// Default seconds between automatic rotations (1 hour).
pub const DEFAULT_ROTATE_INTERVAL: u64 = 3600;

/// Default seconds before a storage call times out.
pub const DEFAULT_STORAGE_TIMEOUT: u64 = 10;

/// Default upload size limit (20 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Default HTTP cache max-age for image responses, in seconds.
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Paperframe - backend for a digital picture frame.
///
/// Keeps an ordered photo carousel in Redis and S3, serves the current photo,
/// and rotates it on a schedule.
#[derive(Parser, Debug, Clone)]
#[command(name = "paperframe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server and the rotation scheduler
    Serve(ServeConfig),

    /// Advance the current photo once and exit (for external schedulers)
    Rotate(RotateConfig),

    /// Check that the storage backends are reachable
    Check(CheckConfig),

    /// Delete photo files left behind by failed uploads or deletes
    Reconcile(ReconcileConfig),
}

/// Storage backend options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Redis URL for carousel metadata (e.g. redis://localhost:6379).
    #[arg(long, env = "PAPERFRAME_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Prefix for every Redis key.
    #[arg(long, default_value = DEFAULT_REDIS_PREFIX, env = "PAPERFRAME_REDIS_PREFIX")]
    pub redis_prefix: String,

    /// S3 bucket holding the photo files.
    #[arg(long, env = "PAPERFRAME_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, R2, etc.).
    #[arg(long, env = "PAPERFRAME_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "PAPERFRAME_S3_REGION")]
    pub s3_region: String,

    /// Key prefix for photo files in the bucket (e.g. "photos/").
    #[arg(long, env = "PAPERFRAME_S3_PREFIX")]
    pub s3_prefix: Option<String>,

    /// Seconds before a single storage call is abandoned.
    #[arg(long = "storage-timeout", default_value_t = DEFAULT_STORAGE_TIMEOUT, env = "PAPERFRAME_STORAGE_TIMEOUT")]
    pub storage_timeout_secs: u64,

    /// Keep all state in process memory instead of Redis and S3.
    ///
    /// State is lost on exit. Development and testing only.
    #[arg(long, default_value_t = false, env = "PAPERFRAME_MEMORY_STORE")]
    pub memory_store: bool,
}

impl StorageArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.storage_timeout_secs == 0 {
            return Err("storage_timeout must be greater than 0".to_string());
        }

        if self.memory_store {
            return Ok(());
        }

        if self.redis_url.as_deref().map_or(true, str::is_empty) {
            return Err(
                "Redis URL is required. Set --redis-url or PAPERFRAME_REDIS_URL, \
                 or use --memory-store for development"
                    .to_string(),
            );
        }

        if self.s3_bucket.as_deref().map_or(true, str::is_empty) {
            return Err(
                "S3 bucket name is required. Set --s3-bucket or PAPERFRAME_S3_BUCKET".to_string(),
            );
        }

        Ok(())
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }
}

/// Options for the `serve` subcommand.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "PAPERFRAME_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PAPERFRAME_PORT")]
    pub port: u16,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Admin username for privileged endpoints.
    #[arg(long, env = "PAPERFRAME_ADMIN_USER")]
    pub admin_user: Option<String>,

    /// Admin password for privileged endpoints.
    #[arg(long, env = "PAPERFRAME_ADMIN_PASS", hide_env_values = true)]
    pub admin_pass: Option<String>,

    /// Realm advertised in Basic-Auth challenges.
    #[arg(long, default_value = DEFAULT_REALM, env = "PAPERFRAME_AUTH_REALM")]
    pub auth_realm: String,

    /// Where `/api/auth/login` redirects a browser once it is authorized.
    #[arg(long, default_value = "/", env = "PAPERFRAME_LOGIN_REDIRECT")]
    pub login_redirect: String,

    // =========================================================================
    // Carousel Configuration
    // =========================================================================
    /// Seconds between automatic rotations. 0 disables the scheduler.
    #[arg(long, default_value_t = DEFAULT_ROTATE_INTERVAL, env = "PAPERFRAME_ROTATE_INTERVAL")]
    pub rotate_interval: u64,

    /// Attempts for a metadata write that keeps conflicting with other writers.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, env = "PAPERFRAME_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Largest accepted upload request body, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "PAPERFRAME_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: usize,

    /// HTTP Cache-Control max-age for image responses, in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "PAPERFRAME_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "PAPERFRAME_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    #[command(flatten)]
    pub storage: StorageArgs,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let user = self.admin_user.as_deref().unwrap_or("");
        let pass = self.admin_pass.as_deref().unwrap_or("");
        if user.is_empty() || pass.is_empty() {
            return Err(
                "Admin credentials are required. Set --admin-user and --admin-pass \
                 (or PAPERFRAME_ADMIN_USER and PAPERFRAME_ADMIN_PASS)"
                    .to_string(),
            );
        }

        // A Basic-Auth user id cannot contain ':', so such a user could never log in
        if user.contains(':') {
            return Err("admin_user must not contain ':'".to_string());
        }

        if self.auth_realm.contains('"') {
            return Err("auth_realm must not contain '\"'".to_string());
        }

        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if self.max_upload_bytes == 0 {
            return Err("max_upload_bytes must be greater than 0".to_string());
        }

        self.storage.validate()
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotate_interval)
    }

    /// Admin username and password (call validate() first).
    pub fn admin_pair(&self) -> (&str, &str) {
        (
            self.admin_user.as_deref().unwrap_or(""),
            self.admin_pass.as_deref().unwrap_or(""),
        )
    }
}

/// Options for the `rotate` subcommand.
#[derive(Args, Debug, Clone)]
pub struct RotateConfig {
    #[command(flatten)]
    pub storage: StorageArgs,

    /// Attempts for a pointer write that keeps conflicting with other writers.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, env = "PAPERFRAME_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// Options for the `check` subcommand.
#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    #[command(flatten)]
    pub storage: StorageArgs,

    /// Also print every photo in the carousel.
    #[arg(long, default_value_t = false)]
    pub list_photos: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// Options for the `reconcile` subcommand.
#[derive(Args, Debug, Clone)]
pub struct ReconcileConfig {
    #[command(flatten)]
    pub storage: StorageArgs,

    /// Report what would be deleted without deleting anything.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
