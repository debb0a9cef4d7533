//! # Deployment controller
//!
//! Creates, supervises, remediates and tears down the container of every lease.
//!
//! # Supervision
//!
//! The [`supervisor`] runs [`DeploymentController::sweep`] on a fixed interval.
//! Each sweep checks every supervised deployment. A check records a healthy
//! or unhealthy observation. Once the consecutive failure counter reaches the
//! configured threshold, a single remediation attempt is made: the container
//! logs are captured and the container is replaced. If that fails too, the
//! failure streak is escalated and the provider is penalized through the
//! [`EscrowCoordinator`].
//!
//! # Consistency
//!
//! Operations on the same lease are serialized with a per-lease lock.
//! Store changes are applied with compare-and-swap updates, which abort if
//! the deployment was stopped while runtime calls were in flight.

mod launch;
mod locks;
pub mod supervisor;

use std::{future::Future, sync::Arc, time::Duration};

use common::config::Config;
use db::{
    deployment::{Deployment, Health, Resources, Status},
    lease::Lease,
    MemoryStore, Store, StoreError, Update, Updated,
};
use derive_more::{Display, Error, From};
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

use crate::{
    directory::Directory,
    escrow::EscrowCoordinator,
    market::MarketError,
    runtime::{ContainerRuntime, ContainerState, RuntimeError},
};

use self::{
    launch::{access_url, launch_spec, LeaseRef},
    locks::LeaseLocks,
};

/// Deployment controller errors.
#[derive(Debug, Display, Error, From)]
pub enum DeploymentError {
    #[display(fmt = "deployment for lease {} not found", _0)]
    #[from(ignore)]
    NotFound(#[error(not(source))] u64),

    #[display(fmt = "deployment for lease {} already exists", _0)]
    #[from(ignore)]
    AlreadyDeployed(#[error(not(source))] u64),

    #[display(fmt = "deployment for lease {} is stopped", _0)]
    #[from(ignore)]
    Stopped(#[error(not(source))] u64),

    #[display(fmt = "deployment for lease {} has no container", _0)]
    #[from(ignore)]
    NoContainer(#[error(not(source))] u64),

    #[display(fmt = "container runtime failure for lease {}: {}", lease_id, cause)]
    #[from(ignore)]
    Runtime {
        lease_id: u64,
        #[error(source)]
        cause: RuntimeError,
    },

    #[display(fmt = "{} for lease {} timed out", operation, lease_id)]
    #[from(ignore)]
    TimedOut {
        lease_id: u64,
        operation: &'static str,
    },

    /// Order or provider lookup error.
    Directory(MarketError),

    /// Store-related error.
    Store(StoreError),
}

/// Result of a stop request.
#[derive(Clone, Debug, PartialEq)]
pub enum StopOutcome {
    /// No deployment exists for the lease.
    NotFound,

    /// Deployment is stopped, either by this call or an earlier one.
    Stopped(Deployment),
}

/// Deployment controller settings.
#[derive(Clone, Debug)]
pub struct Settings {
    pub container_prefix: String,
    pub log_tail: usize,
    pub failure_threshold: u32,
    pub check_timeout: Duration,
    pub health_check_interval: Duration,
    pub health_log_retention: usize,
    pub penalty_token: Option<String>,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            container_prefix: config.runtime.container_prefix.clone(),
            log_tail: config.runtime.log_tail,
            failure_threshold: config.monitoring.failure_threshold.max(1),
            check_timeout: Duration::from_secs(config.monitoring.check_timeout),
            health_check_interval: Duration::from_secs(config.monitoring.health_check_interval),
            health_log_retention: config.monitoring.health_log_retention,
            penalty_token: config.escrow.penalty_token.clone(),
        }
    }
}

/// Container started for a lease.
struct Launched {
    container_id: String,
    image: String,
    access_url: Option<String>,
}

/// Result of a single runtime inspection.
enum Observation {
    Healthy {
        started_at: Option<String>,
        stats: Option<Resources>,
    },
    Unhealthy(String),
}

pub struct DeploymentController {
    runtime: Arc<dyn ContainerRuntime>,
    directory: Arc<dyn Directory>,
    escrow: Arc<EscrowCoordinator>,
    deployments: Arc<dyn Store<u64, Deployment>>,
    locks: LeaseLocks,
    settings: Settings,
}

impl DeploymentController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        directory: Arc<dyn Directory>,
        escrow: Arc<EscrowCoordinator>,
        settings: Settings,
    ) -> Self {
        Self {
            runtime,
            directory,
            escrow,
            deployments: Arc::new(MemoryStore::new()),
            locks: LeaseLocks::default(),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Materialize the container of a lease.
    ///
    /// A failed attempt leaves a `pending` deployment whose health log
    /// holds the failure.
    #[instrument(skip_all, fields(lease_id = lease.id), err)]
    pub async fn deploy(&self, lease: &Lease) -> Result<Deployment, DeploymentError> {
        let _guard = self.locks.acquire(lease.id).await;

        match self.deployments.get(&lease.id).await? {
            Some(existing) if existing.status == Status::Stopped => {
                return Err(DeploymentError::Stopped(lease.id))
            }
            Some(existing) if existing.status != Status::Pending => {
                return Err(DeploymentError::AlreadyDeployed(lease.id))
            }
            _ => {}
        }

        let lease_ref = LeaseRef::from(lease);

        match self.launch(lease_ref).await {
            Ok(launched) => {
                let mut deployment = self.new_deployment(lease_ref, launched.image);
                deployment.container_id = Some(launched.container_id.clone());
                deployment.access_url = launched.access_url;
                deployment.status = Status::Running;
                deployment.note(format!("deployed container {}", launched.container_id));

                self.deployments
                    .insert(lease.id, deployment.clone())
                    .await?;

                info!(container_id = %launched.container_id, "deployment started");

                Ok(deployment)
            }
            Err(err) => {
                let message = format!("deployment failed: {err}");

                let updated = self
                    .deployments
                    .update(
                        &lease.id,
                        Box::new(|deployment| {
                            deployment.note(message.clone());
                            Update::Commit
                        }),
                    )
                    .await?;

                if let Updated::Missing = updated {
                    let mut deployment = self.new_deployment(lease_ref, String::new());
                    deployment.note(message);
                    self.deployments.insert(lease.id, deployment).await?;
                }

                Err(err)
            }
        }
    }

    /// Stop and remove the container of a lease.
    #[instrument(skip(self), err)]
    pub async fn stop(&self, lease_id: u64) -> Result<StopOutcome, DeploymentError> {
        let guard = self.locks.acquire(lease_id).await;

        let Some(deployment) = self.deployments.get(&lease_id).await? else {
            self.locks.release(lease_id, guard);
            return Ok(StopOutcome::NotFound);
        };

        if deployment.status == Status::Stopped {
            self.locks.release(lease_id, guard);
            return Ok(StopOutcome::Stopped(deployment));
        }

        if let Some(container_id) = &deployment.container_id {
            self.discard_container(lease_id, container_id).await?;
        }

        match self
            .deployments
            .update(
                &lease_id,
                Box::new(|deployment| {
                    deployment.stop("container stopped");
                    Update::Commit
                }),
            )
            .await?
        {
            Updated::Committed(deployment) | Updated::Aborted(deployment) => {
                info!("deployment stopped");
                self.locks.release(lease_id, guard);
                Ok(StopOutcome::Stopped(deployment))
            }
            Updated::Missing => Ok(StopOutcome::NotFound),
        }
    }

    /// Check container health, remediating once the failure threshold is reached.
    #[instrument(skip(self), err)]
    pub async fn check_health(&self, lease_id: u64) -> Result<Deployment, DeploymentError> {
        let _guard = self.locks.acquire(lease_id).await;

        let deployment = self
            .deployments
            .get(&lease_id)
            .await?
            .ok_or(DeploymentError::NotFound(lease_id))?;

        if deployment.status == Status::Stopped {
            return Err(DeploymentError::Stopped(lease_id));
        }

        let container_id = deployment
            .container_id
            .clone()
            .ok_or(DeploymentError::NoContainer(lease_id))?;

        let observation = match self
            .bounded(lease_id, "inspection", self.runtime.inspect(&container_id))
            .await
        {
            Ok(ContainerState::Running { started_at, stats }) => {
                Observation::Healthy { started_at, stats }
            }
            Ok(ContainerState::Exited { exit_code }) => {
                Observation::Unhealthy(format!("container exited with code {exit_code}"))
            }
            Err(DeploymentError::Runtime {
                cause: RuntimeError::NotFound { .. },
                ..
            }) => Observation::Unhealthy(String::from("container not found")),
            Err(err) => return Err(err),
        };

        let deployment = match self
            .deployments
            .update(
                &lease_id,
                Box::new(move |deployment| {
                    if deployment.status == Status::Stopped
                        || deployment.container_id.as_deref() != Some(container_id.as_str())
                    {
                        return Update::Abort;
                    }

                    match observation {
                        Observation::Healthy { started_at, stats } => {
                            let message = match started_at {
                                Some(started_at) => format!("container running since {started_at}"),
                                None => String::from("container running"),
                            };
                            deployment.observe_healthy(stats, message);
                        }
                        Observation::Unhealthy(message) => {
                            deployment.observe_unhealthy(message);
                        }
                    }

                    Update::Commit
                }),
            )
            .await?
        {
            Updated::Committed(deployment) => deployment,
            Updated::Aborted(_) => return Err(DeploymentError::Stopped(lease_id)),
            Updated::Missing => return Err(DeploymentError::NotFound(lease_id)),
        };

        if deployment.health == Health::Unhealthy
            && !deployment.escalated
            && deployment.consecutive_failures == self.settings.failure_threshold
        {
            return self.remediate(deployment).await;
        }

        Ok(deployment)
    }

    /// Get recent container output of a lease.
    pub async fn logs(&self, lease_id: u64) -> Result<String, DeploymentError> {
        let deployment = self.get(lease_id).await?;

        let container_id = deployment
            .container_id
            .ok_or(DeploymentError::NoContainer(lease_id))?;

        self.runtime
            .logs(&container_id, self.settings.log_tail)
            .await
            .map_err(|cause| DeploymentError::Runtime { lease_id, cause })
    }

    pub async fn get(&self, lease_id: u64) -> Result<Deployment, DeploymentError> {
        self.deployments
            .get(&lease_id)
            .await?
            .ok_or(DeploymentError::NotFound(lease_id))
    }

    pub async fn list(&self) -> Result<Vec<Deployment>, DeploymentError> {
        Ok(self.deployments.values().await?)
    }

    /// Check every supervised deployment once.
    ///
    /// Failures are logged per deployment and never interrupt the sweep.
    pub async fn sweep(&self) {
        let deployments = match self.deployments.values().await {
            Ok(deployments) => deployments,
            Err(err) => {
                error!(%err, "unable to list deployments");
                return;
            }
        };

        for deployment in deployments.iter().filter(|d| d.is_supervised()) {
            if let Err(err) = self.check_health(deployment.lease_id).await {
                warn!(lease_id = deployment.lease_id, %err, "health check failed");
            }
        }
    }

    /// Replace an unhealthy container, escalating if that fails.
    ///
    /// Must be called with the lease lock held.
    #[instrument(skip_all, fields(lease_id = deployment.lease_id))]
    async fn remediate(&self, deployment: Deployment) -> Result<Deployment, DeploymentError> {
        let lease_id = deployment.lease_id;
        let lease_ref = LeaseRef {
            lease_id,
            order_id: deployment.order_id,
            provider_id: deployment.provider_id,
        };

        if let Some(container_id) = &deployment.container_id {
            match self
                .bounded(
                    lease_id,
                    "log retrieval",
                    self.runtime.logs(container_id, self.settings.log_tail),
                )
                .await
            {
                Ok(logs) => warn!(%logs, "remediating unhealthy deployment"),
                Err(err) => warn!(%err, "remediating unhealthy deployment without logs"),
            }
        }

        let replacement = async {
            if let Some(container_id) = &deployment.container_id {
                self.discard_container(lease_id, container_id).await?;
            }

            self.launch(lease_ref).await
        }
        .await;

        match replacement {
            Ok(launched) => {
                let container_id = launched.container_id.clone();

                let updated = self
                    .deployments
                    .update(
                        &lease_id,
                        Box::new(move |deployment| {
                            if deployment.status == Status::Stopped {
                                return Update::Abort;
                            }

                            deployment.access_url = launched.access_url;
                            deployment.restarted(
                                launched.container_id,
                                "restarted after being unhealthy",
                            );
                            Update::Commit
                        }),
                    )
                    .await?;

                match updated {
                    Updated::Committed(deployment) => {
                        info!(%container_id, "deployment restarted");
                        Ok(deployment)
                    }
                    Updated::Aborted(_) | Updated::Missing => {
                        self.discard_container(lease_id, &container_id).await?;
                        Err(DeploymentError::Stopped(lease_id))
                    }
                }
            }
            Err(err) => {
                error!(%err, "remediation failed");

                let message = format!("remediation failed: {err}");

                let deployment = match self
                    .deployments
                    .update(
                        &lease_id,
                        Box::new(move |deployment| {
                            if deployment.status == Status::Stopped {
                                return Update::Abort;
                            }

                            deployment.escalate(message);
                            Update::Commit
                        }),
                    )
                    .await?
                {
                    Updated::Committed(deployment) => deployment,
                    Updated::Aborted(_) => return Err(DeploymentError::Stopped(lease_id)),
                    Updated::Missing => return Err(DeploymentError::NotFound(lease_id)),
                };

                self.penalize(&deployment).await;

                Ok(deployment)
            }
        }
    }

    /// Penalize the provider of a deployment, logging any failure.
    async fn penalize(&self, deployment: &Deployment) {
        let Some(token) = &self.settings.penalty_token else {
            warn!(
                lease_id = deployment.lease_id,
                "penalty token is not configured, skipping provider penalty"
            );
            return;
        };

        let target = async {
            let provider = self.directory.provider(deployment.provider_id).await?;
            let order = self.directory.order(deployment.order_id).await?;
            Ok::<_, MarketError>((provider, order))
        };

        let (provider, order) = match target.await {
            Ok(target) => target,
            Err(err) => {
                error!(lease_id = deployment.lease_id, %err, "unable to resolve penalty target");
                return;
            }
        };

        if let Err(err) = self
            .escrow
            .penalize_provider(token, &provider.address, order.max_price, deployment.lease_id)
            .await
        {
            error!(lease_id = deployment.lease_id, %err, "unable to penalize provider");
        }
    }

    /// Look up lease inputs and start a container.
    async fn launch(&self, lease: LeaseRef) -> Result<Launched, DeploymentError> {
        let order = self.directory.order(lease.order_id).await?;
        let provider = self.directory.provider(lease.provider_id).await?;

        let spec = launch_spec(&self.settings.container_prefix, &lease, &order);

        let container_id = self
            .bounded(
                lease.lease_id,
                "container start",
                self.runtime.create_and_start(&spec),
            )
            .await?;

        Ok(Launched {
            container_id,
            image: spec.image,
            access_url: access_url(&provider, &order),
        })
    }

    /// Stop and remove a container, ignoring containers that no longer exist.
    async fn discard_container(
        &self,
        lease_id: u64,
        container_id: &str,
    ) -> Result<(), DeploymentError> {
        let stopped = self
            .bounded(lease_id, "container stop", self.runtime.stop(container_id))
            .await;
        tolerate_missing(container_id, stopped)?;

        let removed = self
            .bounded(lease_id, "container removal", self.runtime.remove(container_id))
            .await;
        tolerate_missing(container_id, removed)
    }

    /// Bound a runtime call with the configured check timeout.
    async fn bounded<T>(
        &self,
        lease_id: u64,
        operation: &'static str,
        call: impl Future<Output = Result<T, RuntimeError>>,
    ) -> Result<T, DeploymentError> {
        timeout(self.settings.check_timeout, call)
            .await
            .map_err(|_| DeploymentError::TimedOut {
                lease_id,
                operation,
            })?
            .map_err(|cause| DeploymentError::Runtime { lease_id, cause })
    }

    fn new_deployment(&self, lease: LeaseRef, image: String) -> Deployment {
        Deployment::new(
            lease.lease_id,
            lease.order_id,
            lease.provider_id,
            image,
            self.settings.health_log_retention,
        )
    }
}

fn tolerate_missing(
    container_id: &str,
    result: Result<(), DeploymentError>,
) -> Result<(), DeploymentError> {
    match result {
        Err(DeploymentError::Runtime {
            cause: RuntimeError::NotFound { .. },
            ..
        }) => {
            info!(%container_id, "container already gone");
            Ok(())
        }
        result => result,
    }
}
