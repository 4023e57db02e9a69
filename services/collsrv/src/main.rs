//! Collection service entry point
//!
//! Wires the pieces together: configuration, logging, the realtime store,
//! the device supervisor and the HTTP control plane, then waits for a
//! shutdown signal and tears everything down in order.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use collsrv::{AppConfig, CommandGateway, DeviceSupervisor};
use common::logging::{init_logging, LoggingConfig};
use common::wait_for_shutdown;
use datacoll_rtdb::{Inventory, RedisRtdb, Rtdb};

/// Command line arguments
#[derive(Parser)]
#[command(
    name = "collsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "IEC 60870-5-104 data acquisition service"
)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/collsrv.yaml")]
    config: PathBuf,

    /// Log directory; console-only when omitted
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Override log level (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _log_guard = init_logging(&LoggingConfig {
        level: args.log_level.clone(),
        dir: args.log_dir.clone(),
        file_prefix: "collsrv".to_string(),
    })?;

    let config = AppConfig::load(&args.config)?;
    info!(
        "collsrv starting (store {}, listen {})",
        config.redis.url, config.server.listen
    );

    let rtdb: Arc<dyn Rtdb> = Arc::new(RedisRtdb::connect(&config.redis.url).await?);
    let inventory = Inventory::new(rtdb);

    let cancel = CancellationToken::new();

    let supervisor = DeviceSupervisor::new(inventory.clone(), config.iec104.clone());
    let supervisor_task = tokio::spawn(supervisor.run(cancel.clone()));

    let gateway = CommandGateway::new(inventory.clone(), config.server.request_timeout());
    let router = collsrv::api::build_router(inventory, gateway);
    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!("control plane listening on {}", config.server.listen);
    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move {
        let shutdown = async move { server_cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("control plane server failed: {e}");
        }
    });

    wait_for_shutdown().await;
    info!("shutdown signal received");
    cancel.cancel();

    match supervisor_task.await {
        Ok(Ok(())) => info!("supervisor stopped"),
        Ok(Err(e)) => error!("supervisor failed: {e}"),
        Err(e) => error!("supervisor task failed: {e}"),
    }
    if let Err(e) = server_task.await {
        error!("server task failed: {e}");
    }
    info!("collsrv stopped");
    Ok(())
}
