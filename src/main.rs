use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use corn_grader::{
    Annotator, AppState, Args, Compressor, GradingService, HostedModel, JobRunner, ProgressStore, router,
    spawn_sweeper,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Args::parse().into_config()?;
    config.prepare_dirs()?;
    info!("starting corn grader with config: {:?}", config);

    let annotator = Annotator::new(config.label_font.as_deref())?;
    if !annotator.has_labels() {
        info!("no label font configured, boxes will be drawn without labels");
    }

    let store = Arc::new(ProgressStore::new());
    let runner = JobRunner::new(
        Arc::new(HostedModel::new(config.inference.clone())),
        Compressor::default(),
        annotator,
        store.clone(),
        config.results_dir.clone(),
        config.iou_threshold,
    );
    let service = GradingService::new(runner, store.clone(), config.max_inflight_jobs, config.worker_threads);

    spawn_sweeper(store, config.job_ttl, config.sweep_interval);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let app = router(AppState::new(Arc::new(service), config))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    info!("listening on http://{}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
}
