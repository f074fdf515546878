#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the climate map.
//!
//! Serves region listings and summaries, layer descriptors (or `GeoJSON`),
//! per-cell detail, and observation ingestion over a shared [`Engine`].

mod handlers;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use climate_map_config::Config;
use climate_map_engine::Engine;

/// Largest accepted observation batch body.
const MAX_BATCH_BYTES: usize = 8 * 1024 * 1024;

/// Shared application state.
pub struct AppState {
    pub engine: Engine,
}

/// Registers every `/api` route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().limit(MAX_BATCH_BYTES))
        .service(
            web::scope("/api")
                .route("/health", web::get().to(handlers::health))
                .route("/regions", web::get().to(handlers::regions))
                .route(
                    "/regions/{regionId}/layers/{metric}/{layerType}",
                    web::get().to(handlers::layer),
                )
                .route(
                    "/regions/{regionId}/cells/{cellId}",
                    web::get().to(handlers::cell),
                )
                .route(
                    "/regions/{regionId}/summary",
                    web::get().to(handlers::summary),
                )
                .route(
                    "/regions/{regionId}/observations",
                    web::post().to(handlers::ingest),
                )
                .route(
                    "/regions/{regionId}/observations/{observationId}",
                    web::delete().to(handlers::remove_observation),
                )
                .route(
                    "/regions/{regionId}/refresh",
                    web::post().to(handlers::refresh),
                ),
        );
}

/// Starts the climate map API server.
///
/// Loads the configuration, builds the engine, pulls one batch for every
/// region with a configured source, and starts the Actix-Web HTTP server.
/// The caller provides the async runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the configuration is invalid, or
/// if the HTTP server fails to bind or encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    log::info!("Loading configuration...");
    let config = Config::load().map_err(std::io::Error::other)?;
    let engine = Engine::from_config(&config).map_err(std::io::Error::other)?;

    for region in engine.regions().into_iter().filter(|r| r.has_source) {
        if let Err(e) = engine.refresh_configured(&region.id).await {
            log::warn!("Initial refresh of {} failed: {e}", region.id);
        }
    }

    let state = web::Data::new(AppState { engine });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
