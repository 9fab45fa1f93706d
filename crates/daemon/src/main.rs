use axum::{response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod assembler;
mod clips;
mod config;
mod db;
mod error;
mod fallback;
mod jobs;
mod media;
mod resolver;

#[cfg(test)]
mod testutil;

use assembler::VideoAssembler;
use clips::ClipRepository;
use config::DaemonConfig;
use fallback::ytdlp::{MediaDownloader, YtDlpSearch};
use fallback::FallbackResolver;
use jobs::{HttpSpeechToText, HttpTextToGloss, JobCoordinator, JobStore, SqliteHistoryStore};
use media::FFmpegWrapper;
use resolver::GlossResolver;

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DaemonConfig::from_env()?;
    let storage = &config.storage;
    for dir in [&storage.clips_dir, &storage.work_dir, &storage.output_dir] {
        std::fs::create_dir_all(dir)?;
    }
    if let Some(parent) = storage.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db = Arc::new(db::Database::new(&storage.db_path)?);
    info!("Database initialized at {:?}", storage.db_path);

    let media = Arc::new(FFmpegWrapper);
    let repository = Arc::new(ClipRepository::new(
        db.clone(),
        media.clone(),
        &storage.clips_dir,
        storage.fuzzy_threshold,
    ));

    if let Some(library) = &storage.library_dir {
        match repository.import_library(library).await {
            Ok(summary) => info!(
                library = %library.display(),
                imported = summary.imported,
                skipped = summary.skipped,
                failed = summary.failed.len(),
                "clip library imported"
            ),
            Err(e) => warn!(library = %library.display(), error = %e, "clip library import failed"),
        }
    }

    let http = reqwest::Client::new();
    let fallback = Arc::new(FallbackResolver::new(
        repository.clone(),
        Arc::new(YtDlpSearch),
        Arc::new(MediaDownloader::new(http.clone())),
        media.clone(),
        config.fallback.clone(),
        &storage.work_dir,
    ));
    let resolver = Arc::new(GlossResolver::new(repository, fallback, config.resolver.clone()));
    let assembler = Arc::new(VideoAssembler::new(
        media,
        config.assembly.clone(),
        &storage.work_dir,
        &storage.output_dir,
    ));

    let services = &config.services;
    let coordinator = Arc::new(JobCoordinator::new(
        JobStore::new(db.clone()),
        Arc::new(HttpSpeechToText::new(http.clone(), &services.ml_service_url, services.request_timeout)),
        Arc::new(HttpTextToGloss::new(http, &services.ml_service_url, services.request_timeout)),
        resolver,
        assembler,
        Arc::new(SqliteHistoryStore::new(db)),
    ));

    let resumed = coordinator.resume_incomplete()?;
    if resumed > 0 {
        info!(resumed, "resumed incomplete jobs");
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false);

    let app = Router::new()
        .route("/health", get(health))
        .nest("/api", api::router(coordinator))
        .layer(cors);

    info!("Starting daemon server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
