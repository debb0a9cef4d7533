//! Orchestrator assembly.

use std::{sync::Arc, time::Duration};

use chain::{ChainAdapter, TransactionSigner};
use common::config::Config;
use db::lease::Lease;
use derive_more::{Display, Error, From};
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::{
    deployment::{supervisor, DeploymentController, Settings},
    escrow::EscrowCoordinator,
    lease::{LeaseError, LeaseMachine},
    market::{Market, MarketError},
    runtime::ContainerRuntime,
};

/// Bid acceptance errors.
#[derive(Debug, Display, Error, From)]
pub enum AcceptError {
    /// Marketplace-related error.
    Market(MarketError),

    /// Lease creation error.
    Lease(LeaseError),
}

/// Fully wired orchestrator components.
///
/// All stores are owned by the components created here and live
/// until the orchestrator is dropped.
pub struct Orchestrator {
    pub adapter: Arc<ChainAdapter>,
    pub market: Arc<Market>,
    pub escrow: Arc<EscrowCoordinator>,
    pub deployments: Arc<DeploymentController>,
    pub leases: Arc<LeaseMachine>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        adapter: Arc<ChainAdapter>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let market = Arc::new(Market::new(
            adapter.clone(),
            &config.ledger.order_book_contract,
            &config.ledger.provider_registry_contract,
        ));

        let escrow = Arc::new(EscrowCoordinator::new(
            adapter.clone(),
            &config.ledger.escrow_contract,
        ));

        let deployments = Arc::new(DeploymentController::new(
            runtime,
            market.clone(),
            escrow.clone(),
            Settings::from(config),
        ));

        let leases = Arc::new(LeaseMachine::new(
            deployments.clone(),
            escrow.clone(),
            market.clone(),
            Duration::from_secs(config.ledger.block_interval),
        ));

        Self {
            adapter,
            market,
            escrow,
            deployments,
            leases,
        }
    }

    /// Accept a bid and create the resulting lease.
    #[instrument(skip(self, signer), err)]
    pub async fn accept_bid(
        &self,
        signer: &dyn TransactionSigner,
        bid_id: u64,
    ) -> Result<Lease, AcceptError> {
        let accepted = self.market.accept_bid(signer, bid_id).await?;

        let lease = self
            .leases
            .create_lease(
                accepted.order_id,
                accepted.provider_id,
                accepted.start_block,
                accepted.end_block,
                &accepted.tenant,
            )
            .await?;

        Ok(lease)
    }

    /// Spawn the deployment health loop.
    pub fn spawn_supervisor(&self) -> JoinHandle<()> {
        tokio::spawn(supervisor::supervise(self.deployments.clone()))
    }
}
