use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use refbook::api::{create_router, AppState};
use refbook::config::{CliArgs, Config, LoggingConfig};
use refbook::fixtures::Fixtures;
use refbook::query::QueryService;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    if logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_tracing(&config.logging);

    // Blocking clients are built (and later dropped) outside the runtime.
    let storage = refbook::open_store(&config.storage)?;
    tracing::info!(backend = ?config.storage.backend, "Storage ready");

    if let Some(ref path) = config.fixtures {
        Fixtures::from_path(path)?.load_into(storage.as_ref())?;
    }

    let metrics = PrometheusBuilder::new().install_recorder()?;
    let service = Arc::new(QueryService::new(storage.clone()));
    let state = AppState::new(service).with_metrics(metrics);
    let app = create_router(state, config.auth.clone());
    let addr = config.listen_addr()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        tracing::info!(%addr, auth = config.auth.enabled, "API listening");
        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
    })?;
    drop(runtime);
    drop(storage);

    Ok(())
}
