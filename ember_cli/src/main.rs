mod api;
mod commands;
mod error;
mod host;

use std::path::{Path, PathBuf};

use clap::Parser;
use ember_core::native::{FileStorage, TokioScheduler};
use ember_core::{expiry_channel, run, Broker, BrokerHandle, MemoryStorage, Settings, StorageBackend, SystemClock};
use log::{error, info, warn};
use tokio::sync::broadcast;
use tokio::task::LocalSet;

use api::{create_router, ApiState};
use commands::{Cli, Commands};
use error::AppError;
use host::ChannelHost;

const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = handle_command(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn handle_command(cli: Cli) -> Result<(), AppError> {
    match cli.command.clone().unwrap_or(Commands::Serve) {
        Commands::InitConfig { path } => {
            let path = path.unwrap_or_else(|| cli.config.clone());
            Settings::default().save_to_file(&path.to_string_lossy())?;
            info!("Wrote default config to {}", path.display());
            Ok(())
        }
        Commands::Serve => {
            let settings = load_settings(&cli.config)?;
            // The broker is single-threaded; it lives on a LocalSet next to the server
            let local = LocalSet::new();
            if cli.ephemeral {
                local.run_until(serve(MemoryStorage::new(), settings)).await
            } else {
                let storage = FileStorage::new(PathBuf::from(&settings.storage_dir));
                local.run_until(serve(storage, settings)).await
            }
        }
    }
}

fn load_settings(path: &Path) -> Result<Settings, AppError> {
    let settings = if path.exists() {
        Settings::from_file(&path.to_string_lossy())?
    } else {
        warn!("Config {} not found, using defaults", path.display());
        Settings::default()
    };
    settings.validate()?;
    Ok(settings)
}

async fn serve<S: StorageBackend + 'static>(storage: S, settings: Settings) -> Result<(), AppError> {
    let (events, _) = broadcast::channel(EVENT_BUFFER);
    let (handle, commands) = BrokerHandle::channel();
    let (expired_tx, expired_rx) = expiry_channel();

    let broker = Broker::load(
        storage,
        &settings,
        Box::new(ChannelHost::new(events.clone())),
        Box::new(TokioScheduler::new(expired_tx)),
        Box::new(SystemClock),
    )
    .await;
    let broker_task = tokio::task::spawn_local(run(broker, commands, expired_rx));

    let router = create_router(ApiState::new(handle, events, settings.allowed_origins.clone()));
    let listener = tokio::net::TcpListener::bind(&settings.listen_addr).await?;
    info!("API server listening on {}", settings.listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        })
        .await?;

    // Dropping the router released the last handle, so the broker drains and stops
    if let Err(e) = broker_task.await {
        error!("Broker task failed: {}", e);
    }
    Ok(())
}
