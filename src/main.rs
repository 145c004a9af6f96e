//! Main entry point for the vgrab service

use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vgrab::cli::Args;
use vgrab::core::{
    DownloadLockRegistry, Orchestrator, PoolConfig, ProgressTracker, ReclaimConfig,
    ReclamationScheduler, ResourcePool, RetryConfig, RetryPolicy,
};
use vgrab::extractor::youtube::YtDlpConfig;
use vgrab::extractor::{InstagramExtractor, SessionFactory, YtDlpExtractor};
use vgrab::server::{router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    info!("starting vgrab (temp root: {})", args.temp_root().display());

    let progress = ProgressTracker::new();

    let scheduler = Arc::new(ReclamationScheduler::new(
        args.temp_root(),
        ReclaimConfig {
            max_temp_size: args.max_temp_bytes(),
            sweep_interval: args.sweep_interval_duration(),
            ..ReclaimConfig::default()
        },
        progress.clone(),
    )?);

    let pool = ResourcePool::with_config(
        SessionFactory::default(),
        PoolConfig {
            max_instances: args.max_sessions,
            ..PoolConfig::default()
        },
    );

    let mut orchestrator = Orchestrator::new(
        DownloadLockRegistry::with_timeout(args.lock_timeout_duration()),
        pool.clone(),
        progress,
        RetryPolicy::with_config(RetryConfig {
            max_retries: args.retries,
            ..RetryConfig::default()
        }),
        scheduler.downloads_dir().to_path_buf(),
    );
    orchestrator.register_extractor(Arc::new(YtDlpExtractor::with_config(YtDlpConfig {
        binary: args.yt_dlp.clone(),
        ..YtDlpConfig::default()
    })));
    orchestrator.register_extractor(Arc::new(InstagramExtractor::new()));

    scheduler.spawn();

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        scheduler,
        cleanup_secret: args.cleanup_secret.clone(),
    };

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped, tearing down session pool");
    pool.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    // Failure to install the handler leaves only SIGKILL, so treat it as fatal
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    info!("shutdown signal received");
}

fn init_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let default_level = if verbose { "debug" } else { "info" };
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();

    Ok(())
}
