//! jobq server entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use jobq_api::AppState;
use jobq_common::Config;
use jobq_core::{
    JobService, JobServiceConfig, RateLimitConfig, RateLimiter, RepositoryEventRecorder,
};
use jobq_db::{JobEventRepository, JobRepository};
use jobq_queue::{ExecutionRunner, LeaseScheduler, LogPayloadHandler, SchedulerConfig};
use tokio::signal;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Periodically drop tenants with an empty rate window.
async fn run_limiter_cleanup(
    limiter: RateLimiter,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let dropped = limiter.cleanup().await;
        if dropped > 0 {
            tracing::debug!(dropped, "Dropped idle rate windows");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobq=info,tower_http=info".into()),
        )
        .init();

    info!("Starting jobq server...");

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Connect to database
    let db = jobq_db::init(&config)
        .await
        .context("Failed to connect to database")?;
    info!("Connected to database");

    // Run migrations
    info!("Running database migrations...");
    jobq_db::migrate(&db)
        .await
        .context("Failed to run migrations")?;
    info!("Migrations completed");

    let db = Arc::new(db);

    // Initialize services
    let limiter = RateLimiter::new(RateLimitConfig::from(&config.admission));
    let job_service = JobService::new(
        Arc::new(JobRepository::new(Arc::clone(&db))),
        limiter.clone(),
        Arc::new(RepositoryEventRecorder::new(JobEventRepository::new(
            Arc::clone(&db),
        ))),
        JobServiceConfig::from(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    // Start the lease scheduler
    if config.worker.enabled {
        let runner = ExecutionRunner::new(job_service.clone(), Arc::new(LogPayloadHandler));
        let scheduler = LeaseScheduler::new(
            job_service.clone(),
            runner,
            SchedulerConfig::from(&config.worker),
        );
        background.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));
    } else {
        info!("Worker disabled; this process only accepts submissions");
    }

    background.push(tokio::spawn(run_limiter_cleanup(
        limiter,
        Duration::from_secs(config.admission.cleanup_interval_secs.max(1)),
        shutdown_rx,
    )));

    let app = jobq_api::app(AppState::new(job_service)).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // Start server with graceful shutdown
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Let the in-flight claim cycle finish
    for handle in background {
        if let Err(e) = handle.await {
            error!(error = %e, "Background task failed");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
