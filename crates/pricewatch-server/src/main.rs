use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pricewatch_client::{
    build_client, meta_registry, BrowserOptions, ChromiumRuntime, HttpReportSink,
    HttpWorklistSource,
};
use pricewatch_core::batch::BatchScheduler;
use pricewatch_core::cycle::{CycleConfig, CycleOrchestrator};
use pricewatch_core::runtime::RuntimeManager;

use pricewatch_server::config::ServiceConfig;
use pricewatch_server::routes;
use pricewatch_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pricewatch=info".parse()?))
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env()?;
    let addr = config.bind_addr();

    let runtime = ChromiumRuntime::launch(BrowserOptions {
        headless: config.headless,
        profile: config.profile.clone(),
        ..BrowserOptions::default()
    })
    .await?;

    let registry = Arc::new(meta_registry(config.markets.clone()));
    let manager = RuntimeManager::new(runtime.clone(), Arc::clone(&registry), config.hold_on_error)
        .with_job_timeout(config.per_item_timeout);

    let client = build_client(Duration::from_secs(30))?;
    let cycle = CycleOrchestrator::new(
        Arc::new(manager.clone()),
        HttpWorklistSource::new(client.clone(), config.source_url.clone()),
        HttpReportSink::new(client, config.report_url.clone()),
        CycleConfig {
            concurrency: config.concurrency,
            per_item_timeout: config.per_item_timeout,
            max_retries: config.per_item_retries,
        },
    );

    let state = Arc::new(AppState {
        manager,
        batch: BatchScheduler::new(runtime, registry),
        cycle,
        config: config.clone(),
    });

    // Periodic cycles: one immediately on startup, then every interval.
    let shutdown = CancellationToken::new();
    let cycle_task = {
        let state = Arc::clone(&state);
        let token = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let summary = state.cycle.run_cycle().await;
                        if !summary.ok {
                            tracing::warn!(error = ?summary.error, "Scheduled cycle aborted");
                        }
                    }
                }
            }
        })
    };

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    let _ = cycle_task.await;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    tracing::info!("Shutdown signal received");
}
