use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sam_area_rs::{
    checkpoint::ensure_model_available,
    http::{router, HttpState},
    model::load_predictors,
    storage::UploadDir,
    Config, DetectionService, InferencePool, PostgresDetectionStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::parse();
    if config.uses_default_secret() {
        warn!("SECRET_KEY not set, using the development default");
    }

    let uploads = UploadDir::new(&config.upload_folder);
    uploads.ensure()?;

    // Model initialization: download failures are tolerated here, load
    // failures are not. Nothing is served without a model.
    let encoder = config.encoder_artifact();
    let decoder = config.decoder_artifact();
    let workers = usize::from(config.inference_workers);
    let predictors = tokio::task::spawn_blocking(move || {
        let encoder_path = ensure_model_available(&encoder);
        let decoder_path = ensure_model_available(&decoder);
        load_predictors(&encoder_path, &decoder_path, workers)
    })
    .await
    .context("model loading task failed")?
    .context("failed to load SAM model")?;
    let pool = Arc::new(InferencePool::new(predictors)?);
    info!(workers = pool.capacity(), "SAM model loaded");

    let store = PostgresDetectionStore::new(config.database());
    if let Err(e) = store.ensure_schema().await {
        warn!(error = %e, "could not ensure detections table, inserts may fail");
    }

    let detection = Arc::new(DetectionService::new(uploads, pool, Arc::new(store)));
    let app = router(HttpState::new(detection, config.max_upload_bytes));

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, upload_folder = %config.upload_folder.display(), "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
