//! Lease state machine.
//!
//! Leases move from `active` to either `completed` or `canceled`, and never
//! leave a terminal state. Deployment failures do not affect the lease state:
//! a lease whose container could not be started stays `active`, with the
//! failure recorded in the deployment health log.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chain::TransactionSigner;
use db::{
    amount::Amount,
    deployment::Deployment,
    lease::{self, estimate_end, Lease},
    payment::Payment,
    MemoryStore, OffsetDateTime, Store, StoreError, Update, Updated,
};
use derive_more::{Display, Error, From};
use futures_util::future::try_join_all;
use tracing::{info, instrument, warn};

use crate::{
    deployment::{DeploymentController, DeploymentError},
    directory::Directory,
    escrow::{EscrowCoordinator, EscrowError, Transfer},
    market::MarketError,
};

/// Lease state machine errors.
#[derive(Debug, Display, Error, From)]
pub enum LeaseError {
    #[display(fmt = "lease {} not found", _0)]
    #[from(ignore)]
    NotFound(#[error(not(source))] u64),

    #[display(fmt = "unable to {} lease {} in {} state", operation, id, from)]
    #[from(ignore)]
    InvalidTransition {
        id: u64,
        from: lease::State,
        operation: &'static str,
    },

    #[display(fmt = "end block {} precedes start block {}", end, start)]
    #[from(ignore)]
    InvalidBlockRange { start: u64, end: u64 },

    /// Deployment-related error.
    Deployment(DeploymentError),

    /// Escrow-related error.
    Escrow(EscrowError),

    /// Order or provider lookup error.
    Directory(MarketError),

    /// Store-related error.
    Store(StoreError),
}

pub struct LeaseMachine {
    leases: Arc<dyn Store<u64, Lease>>,
    deployments: Arc<DeploymentController>,
    escrow: Arc<EscrowCoordinator>,
    directory: Arc<dyn Directory>,
    block_interval: Duration,
    next_id: AtomicU64,
}

impl LeaseMachine {
    pub fn new(
        deployments: Arc<DeploymentController>,
        escrow: Arc<EscrowCoordinator>,
        directory: Arc<dyn Directory>,
        block_interval: Duration,
    ) -> Self {
        Self {
            leases: Arc::new(MemoryStore::new()),
            deployments,
            escrow,
            directory,
            block_interval,
            next_id: AtomicU64::new(1),
        }
    }

    /// Create an active lease and deploy its workload.
    ///
    /// Deployment errors are logged and never fail lease creation.
    #[instrument(skip(self), err)]
    pub async fn create_lease(
        &self,
        order_id: u64,
        provider_id: u64,
        start_block: u64,
        end_block: u64,
        tenant: &str,
    ) -> Result<Lease, LeaseError> {
        if end_block < start_block {
            return Err(LeaseError::InvalidBlockRange {
                start: start_block,
                end: end_block,
            });
        }

        let now = OffsetDateTime::now_utc();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let lease = Lease {
            id,
            order_id,
            provider_id,
            tenant: tenant.to_string(),
            start_block,
            end_block,
            estimated_end: estimate_end(now, end_block - start_block, self.block_interval),
            state: lease::State::Active,
            container_id: None,
            access_url: None,
            created_at: now,
            updated_at: now,
        };

        self.leases.insert(id, lease.clone()).await?;

        info!(lease_id = id, "lease created");

        let deployment = match self.deployments.deploy(&lease).await {
            Ok(deployment) => deployment,
            Err(err) => {
                warn!(lease_id = id, %err, "lease workload was not deployed");
                return Ok(lease);
            }
        };

        let updated = self
            .leases
            .update(
                &id,
                Box::new(|lease| {
                    if lease.state.is_terminal() {
                        return Update::Abort;
                    }

                    lease.container_id = deployment.container_id.clone();
                    lease.access_url = deployment.access_url.clone();
                    lease.updated_at = OffsetDateTime::now_utc();
                    Update::Commit
                }),
            )
            .await?;

        match updated {
            Updated::Committed(lease) => Ok(lease),
            Updated::Aborted(lease) => {
                // Lease ended while the container was starting.
                self.deployments.stop(id).await?;
                Ok(lease)
            }
            Updated::Missing => Err(LeaseError::NotFound(id)),
        }
    }

    /// Complete an active lease, stopping its deployment.
    pub async fn complete(&self, lease_id: u64) -> Result<Lease, LeaseError> {
        self.finish(lease_id, lease::State::Completed, "complete")
            .await
    }

    /// Cancel an active lease, stopping its deployment.
    pub async fn cancel(&self, lease_id: u64) -> Result<Lease, LeaseError> {
        self.finish(lease_id, lease::State::Canceled, "cancel")
            .await
    }

    /// Pay the lease provider from the tenant's locked funds.
    ///
    /// Does not change the lease state and may be repeated.
    #[instrument(skip(self, amount, signer), err)]
    pub async fn process_payment(
        &self,
        lease_id: u64,
        token: &str,
        tenant: &str,
        amount: Amount,
        signer: &dyn TransactionSigner,
    ) -> Result<Payment, LeaseError> {
        let lease = self.active(lease_id, "pay for").await?;
        let provider = self.directory.provider(lease.provider_id).await?;

        let payment = self
            .escrow
            .transfer_locked(
                Transfer {
                    token,
                    tenant,
                    amount,
                    provider_id: provider.id,
                    provider_address: Some(&provider.address),
                    lease_id,
                },
                signer,
            )
            .await?;

        Ok(payment)
    }

    /// Run a health check of the lease deployment.
    pub async fn check_health(&self, lease_id: u64) -> Result<Deployment, LeaseError> {
        self.active(lease_id, "check health of").await?;

        Ok(self.deployments.check_health(lease_id).await?)
    }

    pub async fn get_logs(&self, lease_id: u64) -> Result<String, LeaseError> {
        self.active(lease_id, "get logs of").await?;

        Ok(self.deployments.logs(lease_id).await?)
    }

    pub async fn get(&self, lease_id: u64) -> Result<Lease, LeaseError> {
        let lease = self
            .leases
            .get(&lease_id)
            .await?
            .ok_or(LeaseError::NotFound(lease_id))?;

        self.with_deployment(lease).await
    }

    pub async fn list(&self) -> Result<Vec<Lease>, LeaseError> {
        self.filtered(|_| true).await
    }

    pub async fn list_by_provider(&self, provider_id: u64) -> Result<Vec<Lease>, LeaseError> {
        self.filtered(|lease| lease.provider_id == provider_id)
            .await
    }

    pub async fn list_by_order(&self, order_id: u64) -> Result<Vec<Lease>, LeaseError> {
        self.filtered(|lease| lease.order_id == order_id).await
    }

    #[instrument(skip(self), err)]
    async fn finish(
        &self,
        lease_id: u64,
        target: lease::State,
        operation: &'static str,
    ) -> Result<Lease, LeaseError> {
        self.active(lease_id, operation).await?;

        self.deployments.stop(lease_id).await?;

        let updated = self
            .leases
            .update(
                &lease_id,
                Box::new(|lease| {
                    if lease.state.is_terminal() {
                        return Update::Abort;
                    }

                    lease.state = target;
                    lease.updated_at = OffsetDateTime::now_utc();
                    Update::Commit
                }),
            )
            .await?;

        match updated {
            Updated::Committed(lease) => {
                info!(state = %lease.state, "lease finished");
                self.with_deployment(lease).await
            }
            Updated::Aborted(lease) => Err(LeaseError::InvalidTransition {
                id: lease_id,
                from: lease.state,
                operation,
            }),
            Updated::Missing => Err(LeaseError::NotFound(lease_id)),
        }
    }

    async fn active(&self, lease_id: u64, operation: &'static str) -> Result<Lease, LeaseError> {
        let lease = self.get(lease_id).await?;

        if lease.state.is_terminal() {
            return Err(LeaseError::InvalidTransition {
                id: lease_id,
                from: lease.state,
                operation,
            });
        }

        Ok(lease)
    }

    async fn filtered(&self, predicate: impl Fn(&Lease) -> bool) -> Result<Vec<Lease>, LeaseError> {
        let leases = self.leases.values().await?;

        try_join_all(
            leases
                .into_iter()
                .filter(predicate)
                .map(|lease| self.with_deployment(lease)),
        )
        .await
    }

    /// Reflect the current container of the lease deployment.
    ///
    /// Remediation and retried deployments replace containers without
    /// touching the lease record.
    async fn with_deployment(&self, mut lease: Lease) -> Result<Lease, LeaseError> {
        match self.deployments.get(lease.id).await {
            Ok(deployment) => {
                lease.container_id = deployment.container_id;
                lease.access_url = deployment.access_url;
                Ok(lease)
            }
            Err(DeploymentError::NotFound(_)) => Ok(lease),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chain::TransactionSigner;
    use db::{deployment::Status, payment};

    use super::*;
    use crate::testing::{Inspection, TestEnv};

    #[tokio::test]
    async fn lease_tracks_deployment() {
        let env = TestEnv::new();
        let lease = env.lease().await;

        assert_eq!(lease.id, 1);
        assert_eq!(lease.state, lease::State::Active);
        assert_eq!(lease.tenant, TestEnv::tenant_address());
        assert_eq!(lease.start_block, 100);
        assert_eq!(lease.end_block, 820);
        assert_eq!(lease.container_id.as_deref(), Some("container-1"));
        assert_eq!(
            lease.access_url.as_deref(),
            Some("http://node.example.com:8080")
        );
        assert_eq!(
            lease.estimated_end - lease.created_at,
            Duration::from_secs(720 * 5)
        );
    }

    #[tokio::test]
    async fn lease_reflects_replaced_containers() {
        let env = TestEnv::new();
        env.runtime.fail_create(true);

        let lease = env.lease().await;
        let leases = &env.orchestrator.leases;
        let deployments = &env.orchestrator.deployments;

        assert_eq!(leases.get(lease.id).await.unwrap().container_id, None);

        env.runtime.fail_create(false);
        deployments.deploy(&lease).await.expect("unable to deploy");

        let current = leases.get(lease.id).await.unwrap();
        assert_eq!(current.container_id.as_deref(), Some("container-1"));
        assert_eq!(
            current.access_url.as_deref(),
            Some("http://node.example.com:8080")
        );

        env.runtime.inspect_as(Inspection::Missing);

        for _ in 0..3 {
            deployments.check_health(lease.id).await.unwrap();
        }

        assert_eq!(
            deployments.get(lease.id).await.unwrap().container_id.as_deref(),
            Some("container-2")
        );
        assert_eq!(
            leases.get(lease.id).await.unwrap().container_id.as_deref(),
            Some("container-2")
        );
        assert_eq!(
            leases.list_by_order(lease.order_id).await.unwrap()[0]
                .container_id
                .as_deref(),
            Some("container-2")
        );
    }

    #[tokio::test]
    async fn reversed_block_range_is_rejected() {
        let env = TestEnv::new();

        let err = env
            .orchestrator
            .leases
            .create_lease(1, 1, 10, 9, "tenant")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LeaseError::InvalidBlockRange { start: 10, end: 9 }
        ));
        assert!(env.orchestrator.leases.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deployment_failure_keeps_lease_active() {
        let env = TestEnv::new();
        env.runtime.fail_create(true);

        let lease = env.lease().await;

        assert_eq!(lease.state, lease::State::Active);
        assert_eq!(lease.container_id, None);

        let deployment = env.orchestrator.deployments.get(lease.id).await.unwrap();
        assert!(!deployment.health_log.is_empty());
    }

    #[tokio::test]
    async fn terminal_leases_reject_transitions() {
        let env = TestEnv::new();
        let lease = env.lease().await;
        let leases = &env.orchestrator.leases;

        let canceled = leases.cancel(lease.id).await.expect("unable to cancel");
        assert_eq!(canceled.state, lease::State::Canceled);

        for result in [leases.complete(lease.id).await, leases.cancel(lease.id).await] {
            assert!(matches!(
                result,
                Err(LeaseError::InvalidTransition {
                    id: 1,
                    from: lease::State::Canceled,
                    ..
                })
            ));
        }

        assert!(matches!(
            leases.check_health(lease.id).await,
            Err(LeaseError::InvalidTransition { .. })
        ));

        let tenant = TestEnv::tenant();
        assert!(matches!(
            leases
                .process_payment(lease.id, "token", tenant.address(), Amount::from(1_u64), &tenant)
                .await,
            Err(LeaseError::InvalidTransition { .. })
        ));

        assert_eq!(
            leases.get(lease.id).await.unwrap().state,
            lease::State::Canceled
        );
        assert_eq!(env.runtime.stopped().len(), 1);
        assert_eq!(env.ledger.sent_count("transfer_locked"), 0);
    }

    #[tokio::test]
    async fn unknown_lease_is_not_found() {
        let env = TestEnv::new();
        let leases = &env.orchestrator.leases;

        assert!(matches!(leases.get(3).await, Err(LeaseError::NotFound(3))));
        assert!(matches!(leases.complete(3).await, Err(LeaseError::NotFound(3))));
        assert!(matches!(leases.get_logs(3).await, Err(LeaseError::NotFound(3))));
    }

    #[tokio::test]
    async fn payments_do_not_change_lease_state() {
        let env = TestEnv::new();
        let lease = env.lease().await;
        let tenant = TestEnv::tenant();

        for _ in 0..2 {
            let payment = env
                .orchestrator
                .leases
                .process_payment(lease.id, "token", tenant.address(), "1.5".parse().unwrap(), &tenant)
                .await
                .expect("unable to pay");

            assert_eq!(payment.kind, payment::Kind::Transfer);
            assert_eq!(payment.status, payment::Status::Completed);
            assert_eq!(payment.lease_id, Some(lease.id));
            assert_eq!(payment.provider, Some(TestEnv::provider_address()));
        }

        assert_eq!(
            env.orchestrator.leases.get(lease.id).await.unwrap().state,
            lease::State::Active
        );
        assert_eq!(
            env.orchestrator
                .escrow
                .payments_for_lease(lease.id)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn leases_are_listed_by_provider_and_order() {
        let env = TestEnv::new();
        let first = env.lease().await;
        let second = env.lease().await;
        let leases = &env.orchestrator.leases;

        assert_eq!(leases.list().await.unwrap(), vec![first.clone(), second.clone()]);
        assert_eq!(leases.list_by_order(second.order_id).await.unwrap(), vec![second.clone()]);
        assert_eq!(leases.list_by_provider(first.provider_id).await.unwrap(), vec![first]);
        assert!(leases.list_by_order(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completion_stops_deployment() {
        let env = TestEnv::new();
        let lease = env.lease().await;

        let completed = env.orchestrator.leases.complete(lease.id).await.unwrap();

        assert_eq!(completed.state, lease::State::Completed);
        assert_eq!(
            env.orchestrator.deployments.get(lease.id).await.unwrap().status,
            Status::Stopped
        );
    }
}
