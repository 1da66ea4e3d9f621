//! Main application entry point for the pusher gateway.
//!
//! Provides CLI handling, configuration loading, and server startup.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::Result;
use cli::CliArgs;
use config::AppConfig;
use pusher_gateway::admin::HttpAdminService;
use pusher_gateway::back::ws::WsBackConnector;
use pusher_gateway::back::BackendDirectory;
use pusher_gateway::embed::EmbeddableChecker;
use pusher_gateway::front::FrontServer;
use pusher_gateway::SessionMultiplexer;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    if let Some(bind_address) = args.bind_address {
        config.server.bind_address = bind_address;
    }
    if let Some(log_level) = args.log_level {
        config.logging.level = log_level;
    }

    logging::setup_logging(&config.logging, args.json_logs)?;

    info!("Starting pusher gateway");
    info!("Bind address: {}", config.server.bind_address);
    info!("Back-end pool: {} instance(s)", config.backs.endpoints.len());

    let back_count = config.backs.endpoints.len() as u32;
    let connector = Arc::new(WsBackConnector::new(config.backs.endpoints.clone()));
    let directory = Arc::new(BackendDirectory::new(connector, back_count));
    let admin = Arc::new(HttpAdminService::new(
        config.admin.base_url.clone(),
        config.admin.api_token.clone(),
    ));
    let embeddable = EmbeddableChecker::from_env();

    let mux = SessionMultiplexer::new(directory, admin, embeddable, config.to_gateway_config()?);
    let server = Arc::new(FrontServer::new(mux));

    let server_task = {
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Front server error: {}", e);
            }
        })
    };

    info!("Gateway started. Press Ctrl+C to stop.");
    signals::wait_for_shutdown().await?;

    info!("Shutting down...");
    server.shutdown();
    let _ = server_task.await;
    info!("Shutdown complete");
    Ok(())
}
