//! Survey Runtime - Main Entry Point
//!
//! Initializes and starts the Axum web server with routes, middleware,
//! database/Redis connections, and the background workers (outbox relay,
//! reservation sweeper, stale-session closer).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{self, TraceLayer};
use tracing::{error, info, Level};

use survey_runtime::{
    config::Settings,
    db,
    middleware::cors::{cors_layer_for_origins, cors_layer_permissive},
    redis::RedisManager,
    routes,
    services::{
        email::build_email_service,
        jobs::{spawn_reservation_sweeper, spawn_session_closer},
        outbox::{OutboxRelay, RedisEventBus},
    },
    state::AppState,
    utils::logging::init_tracing,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    if let Err(e) = dotenvy::dotenv() {
        // Only log if the file exists but couldn't be loaded
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Load configuration first so tracing knows the output format
    let config = match Settings::new() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(anyhow::anyhow!("Configuration error: {}", e));
        }
    };

    init_tracing(config.is_production());

    info!("Starting Survey Runtime (Rust)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        environment = %config.environment,
        port = config.server.port,
        "Configuration loaded"
    );

    // Connect to PostgreSQL
    info!("Connecting to PostgreSQL...");
    let db_config = db::DbConfig {
        max_connections: config.database.max_connections,
        min_connections: config.database.min_connections,
        acquire_timeout: Duration::from_secs(config.database.connection_timeout_secs),
        idle_timeout: Duration::from_secs(600),
    };
    let database = match db::init_pool_with_url(&config.database.url, Some(db_config)).await {
        Ok(database) => {
            info!("PostgreSQL connection established");
            database
        }
        Err(e) => {
            error!("Failed to connect to PostgreSQL: {}", e);
            return Err(anyhow::anyhow!("Database connection error: {}", e));
        }
    };

    // Apply migrations
    db::migrations::run_migrations(database.pool()).await?;

    // Seed the demo survey (development only)
    if config.is_development() {
        info!("Seeding sample data (development mode)...");
        if let Err(e) = db::seed::seed_sample_data(database.pool()).await {
            // Startup continues; the data may already exist
            error!("Failed to seed sample data: {}", e);
        }
    }

    // Connect to Redis
    info!("Connecting to Redis...");
    let redis = match RedisManager::new(&config.redis.url).await {
        Ok(r) => {
            info!("Redis connection established");
            r
        }
        Err(e) => {
            error!("Failed to connect to Redis: {}", e);
            return Err(anyhow::anyhow!("Redis connection error: {}", e));
        }
    };

    // Background workers with explicit lifecycles
    let relay = OutboxRelay::spawn(
        database.pool().clone(),
        redis.clone(),
        Arc::new(RedisEventBus::new(redis.clone())),
        Duration::from_millis(config.runtime.outbox_poll_interval_ms),
        config.runtime.outbox_batch_size,
    );
    let reservation_sweeper = spawn_reservation_sweeper(
        database.pool().clone(),
        Duration::from_secs(config.runtime.reservation_sweep_interval_secs),
    );
    let session_closer = spawn_session_closer(
        database.pool().clone(),
        Duration::from_secs(config.runtime.session_sweep_interval_secs),
        config.runtime.default_incomplete_ttl_hours,
    );

    // Application state and router
    let email = build_email_service(&config.smtp);
    let state = AppState::new(
        database.pool().clone(),
        redis.connection.clone(),
        config.clone(),
        email,
    );
    let app = create_app(state, &config);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Server is ready to accept connections on port {}", config.server.port);
    log_startup_info(&config);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Drain background workers before closing the pool
    relay.stop().await;
    reservation_sweeper.stop().await;
    session_closer.stop().await;
    database.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

/// Log startup information about configured features
fn log_startup_info(config: &Settings) {
    info!("=== Server Configuration ===");
    info!("  Environment: {}", config.environment);
    info!("  Port: {}", config.server.port);

    if config.smtp.is_configured() {
        info!("  SMTP Email: Enabled");
    } else {
        info!("  SMTP Email: Not configured");
    }

    if config.vpn_lookup.is_configured() {
        info!("  VPN Lookup: Enabled");
    } else {
        info!("  VPN Lookup: Not configured");
    }

    info!(
        "  Outbox relay: every {}ms, batch {}",
        config.runtime.outbox_poll_interval_ms, config.runtime.outbox_batch_size
    );
    info!("============================");
}

/// Creates the main application with all routes and middleware
///
/// Routes are organized under the /api prefix:
/// - /api/health - Health check endpoints
/// - /api/runtime - Respondent session runtime
/// - /api/admin - Authoring CRUD
/// - /api/docs - Swagger UI
fn create_app(state: AppState, config: &Settings) -> Router {
    let app = routes::create_router(state);

    // Middleware layers (order matters - applied bottom to top)
    app
        // Compression (gzip)
        .layer(CompressionLayer::new())
        // Request timeout
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        // Request tracing/logging
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO))
                .on_failure(trace::DefaultOnFailure::new().level(Level::ERROR)),
        )
        // CORS configuration based on environment
        .layer(if config.is_development() {
            cors_layer_permissive()
        } else {
            cors_layer_for_origins(&config.cors_origins())
        })
}
