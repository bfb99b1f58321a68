//! # Expression Stream Server
//!
//! HTTP service that turns speech audio into 52-channel facial expression sequences, either for a
//! whole clip at once or chunk by chunk within a streaming session.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment variables)
//! - **state**: shared state: config, metrics, session store, engine, vocal isolator
//! - **audio**: upload decoding, resampling, volume envelope, vocal isolation
//! - **engine**: the inference backend trait and the built-in procedural backend
//! - **session**: streaming sessions with per-session locking
//! - **pipeline**: chunk and one-shot flows from upload to encoded payload
//! - **postprocess**: mouth smoothing and brow secondary motion
//! - **codec**: the JSON output format
//! - **health**, **handlers**, **middleware**: the HTTP surface
//! - **error**: error types and their HTTP responses

mod audio;
mod codec;
mod config;
mod device;
mod engine;
mod error;
mod expression;
mod handlers;
mod health;
mod middleware;
mod pipeline;
mod postprocess;
mod session;
mod state;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::audio::{CommandIsolator, VocalIsolator};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal handlers; polled by `wait_for_shutdown`.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting expression-stream-server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let engine = engine::build_engine(&config.engine)?;
    if engine.is_none() {
        warn!("No inference engine loaded, inference endpoints will answer 503");
    }

    let isolator = CommandIsolator::from_config(&config.vocal_isolation)
        .map(|isolator| Arc::new(isolator) as Arc<dyn VocalIsolator>);
    match &isolator {
        Some(_) => info!("Vocal isolation enabled"),
        None => info!("Vocal isolation not configured"),
    }

    let app_state = AppState::new(config.clone(), engine, isolator);
    let sessions = Arc::clone(&app_state.sessions);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let mut server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(json_config())
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/", web::get().to(health::root))
            .service(web::scope("/api").configure(configure_routes))
            .configure(configure_routes)
    });
    if config.server.workers > 0 {
        server = server.workers(config.server.workers);
    }
    let server = server.bind(&bind_addr)?.run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!(open_sessions = sessions.len(), "Dropping open streaming sessions");
    sessions.clear();

    info!("Server stopped gracefully");
    Ok(())
}

/// Every API route. Mounted both at the root and under `/api`; the `infer_stream_*` names are
/// aliases of the `stream/*` routes.
fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health_check))
        .route("/metrics", web::get().to(health::detailed_metrics))
        .route("/config", web::get().to(handlers::get_config))
        .route("/config", web::put().to(handlers::update_config))
        .route("/infer", web::post().to(handlers::infer))
        .route("/stream/init", web::post().to(handlers::stream_init))
        .route("/stream/chunk", web::post().to(handlers::stream_chunk))
        .route("/stream/close/{session_id}", web::delete().to(handlers::stream_close))
        .route("/stream/session/{session_id}", web::get().to(handlers::session_info))
        .route("/infer_stream_init", web::post().to(handlers::stream_init))
        .route("/infer_stream_chunk", web::post().to(handlers::stream_chunk))
        .route("/infer_stream_close/{session_id}", web::delete().to(handlers::stream_close));
}

/// Malformed JSON bodies get the same error envelope as every other 400.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| AppError::InvalidRequest(err.to_string()).into())
}

/// `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "expression_stream_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// SIGTERM or SIGINT sets `SHUTDOWN_SIGNAL`.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
