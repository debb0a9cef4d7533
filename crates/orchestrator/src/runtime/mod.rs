//! Container runtime seam.
//!
//! The deployment controller only talks to containers through
//! [`ContainerRuntime`]. [`DockerRuntime`] is the production implementation.

mod docker;

use std::collections::BTreeMap;

use async_trait::async_trait;
use db::{
    deployment::Resources,
    order::{PortMapping, VolumeMapping},
};
use derive_more::{Display, Error, From};

pub use docker::DockerRuntime;

/// Container runtime errors.
#[derive(Debug, Display, Error, From)]
pub enum RuntimeError {
    /// Requested container does not exist.
    #[display(fmt = "container {} not found", container_id)]
    #[from(ignore)]
    NotFound { container_id: String },

    /// Docker-related error.
    Docker(bollard::errors::Error),

    /// Any other runtime failure.
    #[display(fmt = "container runtime failure: {}", _0)]
    #[from(ignore)]
    Failure(#[error(not(source))] String),
}

/// Everything needed to create a workload container.
#[derive(Clone, Debug, PartialEq)]
pub struct LaunchSpec {
    /// Unique container name.
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,

    /// Entrypoint override.
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,

    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMapping>,

    /// Memory limit, in megabytes.
    pub memory: u64,

    /// CPU limit, in cores.
    pub cpu: f64,
}

/// Observed container state.
#[derive(Clone, Debug, PartialEq)]
pub enum ContainerState {
    Running {
        started_at: Option<String>,
        stats: Option<Resources>,
    },
    Exited {
        exit_code: i64,
    },
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a new container, returning its identifier.
    async fn create_and_start(&self, spec: &LaunchSpec) -> Result<String, RuntimeError>;

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Forcefully remove a container together with its anonymous volumes.
    async fn remove(&self, container_id: &str) -> Result<(), RuntimeError>;

    async fn inspect(&self, container_id: &str) -> Result<ContainerState, RuntimeError>;

    /// Get the last `tail` lines of container output, with timestamps.
    async fn logs(&self, container_id: &str, tail: usize) -> Result<String, RuntimeError>;
}
