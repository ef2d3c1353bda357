//! Paperframe - backend for a digital picture frame.
//!
//! This binary starts the HTTP server and the rotation scheduler, and provides
//! maintenance subcommands.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paperframe::{
    carousel::{load_state, RotationOutcome},
    config::{CheckConfig, Cli, Command, ReconcileConfig, RotateConfig, ServeConfig},
    reconcile_orphans,
    server::{create_router, AdminCredentials, RouterConfig},
    CarouselService, RotationScheduler, StorageArgs, Stores,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Rotate(config) => run_rotate(config).await,
        Command::Check(config) => run_check(config).await,
        Command::Reconcile(config) => run_reconcile(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Paperframe v{}", env!("CARGO_PKG_VERSION"));

    let Some(stores) = connect_stores(&config.storage).await else {
        return ExitCode::FAILURE;
    };

    info!("Configuration:");
    info!("  Metadata store: {}", stores.metadata.describe());
    info!("  Object store: {}", stores.objects.describe());
    info!("  Admin user: {}", config.admin_pair().0);
    info!("  Auth realm: {}", config.auth_realm);
    if config.rotate_interval == 0 {
        info!("  Rotation: disabled");
    } else {
        info!("  Rotation: every {}s", config.rotate_interval);
    }
    if config.storage.memory_store {
        warn!("  Storage: IN MEMORY - all photos are lost when the process exits");
    }

    let service = CarouselService::new(stores).with_max_attempts(config.max_attempts);

    match service.load_state().await {
        Ok(state) => info!("  Carousel: {} photo(s)", state.carousel.len()),
        Err(e) => {
            error!("Failed to read carousel metadata: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let scheduler = RotationScheduler::new(service.clone(), config.rotation_interval()).spawn();

    let router = create_router(service, build_router_config(&config));
    let addr = config.bind_address();

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Server listening on http://{}", addr);

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(handle) = scheduler {
        handle.abort();
    }

    if let Err(e) = result {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let (user, pass) = config.admin_pair();

    let mut router_config = RouterConfig::new(AdminCredentials::new(user, pass))
        .with_realm(config.auth_realm.clone())
        .with_login_redirect(config.login_redirect.clone())
        .with_cache_max_age(config.cache_max_age)
        .with_max_upload_bytes(config.max_upload_bytes)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

// =============================================================================
// Rotate Command
// =============================================================================

async fn run_rotate(config: RotateConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.storage.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let Some(stores) = connect_stores(&config.storage).await else {
        return ExitCode::FAILURE;
    };

    let service = CarouselService::new(stores).with_max_attempts(config.max_attempts.max(1));

    match service.rotate().await {
        Ok(RotationOutcome::Advanced { from, to }) => {
            info!(from, to, "Rotated carousel");
            ExitCode::SUCCESS
        }
        Ok(RotationOutcome::Skipped) => {
            info!("Carousel empty, nothing to rotate");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Rotation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("Paperframe Configuration Check");
    println!("══════════════════════════════");
    println!();

    if let Err(e) = config.storage.validate() {
        println!("✗ Configuration: {}", e);
        return ExitCode::FAILURE;
    }
    println!("✓ Configuration");

    let stores = match Stores::connect(&config.storage).await {
        Ok(stores) => stores,
        Err(e) => {
            println!("✗ Connect: {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!("✓ Metadata store: {}", stores.metadata.describe());
    println!("✓ Object store: {}", stores.objects.describe());
    println!();

    print!("Reading carousel metadata... ");
    let state = match load_state(stores.metadata.as_ref()).await {
        Ok(state) => {
            println!("✓ {} photo(s), current position {}", state.carousel.len(), state.current);
            state
        }
        Err(e) => {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    print!("Listing photo files... ");
    let keys = match stores.objects.list().await {
        Ok(keys) => {
            println!("✓ {} file(s)", keys.len());
            keys
        }
        Err(e) => {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            println!();
            println!("Please check:");
            println!("  - Your AWS credentials are configured correctly");
            println!("  - The bucket exists and is accessible");
            if config.storage.s3_endpoint.is_some() {
                println!("  - The S3 endpoint is correct and reachable");
            }
            return ExitCode::FAILURE;
        }
    };

    let missing: Vec<_> = state
        .carousel
        .iter()
        .filter(|photo| !keys.contains(&photo.filename))
        .collect();
    if !missing.is_empty() {
        println!();
        println!("✗ {} photo(s) reference missing files:", missing.len());
        for photo in &missing {
            println!("  #{} {} ({})", photo.id, photo.title, photo.filename);
        }
    }

    if config.list_photos {
        println!();
        println!("Carousel:");
        println!("─────────");
        if state.carousel.is_empty() {
            println!("  (no photos)");
        }
        let current = state.current_photo().map(|photo| photo.id);
        for photo in &state.carousel {
            let marker = if Some(photo.id) == current { "▶" } else { " " };
            println!("  {} #{} {} ({})", marker, photo.id, photo.title, photo.filename);
        }
    }

    println!();
    println!("══════════════════════════════");
    if missing.is_empty() {
        println!("✓ All checks passed!");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

// =============================================================================
// Reconcile Command
// =============================================================================

async fn run_reconcile(config: ReconcileConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.storage.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let Some(stores) = connect_stores(&config.storage).await else {
        return ExitCode::FAILURE;
    };
    let service = CarouselService::new(stores);

    let report = match reconcile_orphans(&service, config.dry_run).await {
        Ok(report) => report,
        Err(e) => {
            error!("Reconciliation failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let verb = if config.dry_run { "Would delete" } else { "Deleted" };
    println!("Examined {} orphan record(s)", report.examined);
    for key in &report.deleted {
        println!("  {} {}", verb, key);
    }
    for key in &report.still_referenced {
        println!("  Kept {} (still in the carousel)", key);
    }
    for key in &report.failed {
        println!("  Failed to delete {}", key);
    }

    if report.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

// =============================================================================
// Shared Helpers
// =============================================================================

async fn connect_stores(args: &StorageArgs) -> Option<Stores> {
    match Stores::connect(args).await {
        Ok(stores) => Some(stores),
        Err(e) => {
            error!("Failed to connect to storage: {}", e);
            error!("");
            error!("  Please check:");
            error!("    - Redis is running and the URL is correct");
            error!("    - Your AWS credentials are configured correctly");
            error!("    - The S3 endpoint is correct (if using MinIO/custom S3)");
            None
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "paperframe=debug,tower_http=debug"
    } else {
        "paperframe=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
