use hall_pass::calendar::{Calendar, SystemClock};
use hall_pass::config::log_filter;
use hall_pass::{AppState, Config, StateFile, router};
use std::{net::SocketAddr, sync::Arc};
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::fmt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let config = Config::from_env()?;
    if let Some(parent) = config.data_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let file = StateFile::open(config.data_path.clone()).await;
    let calendar = Calendar::new(config.timezone);
    let state = AppState::new(file, Arc::new(SystemClock), calendar).await;

    let rollover_task = tokio::spawn(state.rollover(config.purge_on_rollover).run(config.rollover_interval));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(timezone = %config.timezone, "listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    rollover_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
