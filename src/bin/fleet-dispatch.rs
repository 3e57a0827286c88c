//! Dispatch the configured job definitions to ECS and print the response
//! envelope on stdout.

use std::sync::Arc;

use fleet_dispatch::config::load_job_requests_from_env;
use fleet_dispatch::{BatchDispatcher, DispatcherConfig, EcsFleet, PlacementConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fleet_dispatch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let placement = PlacementConfig::from_env()?;
    let settings = DispatcherConfig::from_env()?;
    let jobs = load_job_requests_from_env()?;

    let fleet = Arc::new(EcsFleet::from_env().await);
    let dispatcher = BatchDispatcher::new(fleet).with_config(settings);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, no further launches will be issued");
            on_interrupt.cancel();
        }
    });

    let result = dispatcher
        .dispatch_with_cancel(&placement, &jobs, cancel)
        .await?;

    let response = result.to_response()?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}
