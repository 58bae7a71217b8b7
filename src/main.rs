use std::process::ExitCode;

use anyhow::{Context, Result};
use feedgen::{utils::logging, Service, Settings};
use log::{error, info};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            error!("FATAL: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("FATAL: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<()> {
    info!("Feed generator starting up...");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown requested");
                    shutdown.cancel();
                }
                Err(err) => error!("Failed to listen for Ctrl-C: {err}"),
            }
        }
    });

    let http_bind = settings.http_bind.clone();
    let service = Service::start(settings, shutdown.clone()).await?;
    info!(
        "Commit ingestion ready (resume cursor: {:?})",
        service.resume_cursor()
    );

    let served = match TcpListener::bind(&http_bind)
        .await
        .with_context(|| format!("failed to bind {http_bind}"))
    {
        Ok(listener) => service.serve(listener).await,
        Err(err) => Err(err),
    };

    service.stop().await?;
    served
}
