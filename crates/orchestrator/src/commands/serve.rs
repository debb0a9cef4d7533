use std::sync::Arc;

use chain::{ChainAdapter, SigningError};
use common::config::Config;
use derive_more::{Display, Error, From};
use orchestrator::{app::Orchestrator, runtime::DockerRuntime};
use tracing::{info, instrument};

/// `serve` command errors.
#[derive(Display, Debug, From, Error)]
pub enum ServeError {
    /// Docker connection error.
    Docker(bollard::errors::Error),

    /// Invalid signer key.
    Signing(SigningError),

    /// Shutdown signal can't be received.
    Signal(std::io::Error),
}

/// Run the deployment health loop until a shutdown signal is received.
#[instrument(skip_all, err)]
pub async fn serve(config: Config) -> Result<(), ServeError> {
    let runtime = Arc::new(DockerRuntime::connect(&config.runtime)?);
    let adapter = Arc::new(ChainAdapter::from_config(&config.ledger)?);

    info!(address = %adapter.address(), "orchestrator account loaded");

    let orchestrator = Orchestrator::new(&config, adapter, runtime);
    let supervisor = orchestrator.spawn_supervisor();

    info!("started deployment supervision");

    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    supervisor.abort();

    Ok(())
}
