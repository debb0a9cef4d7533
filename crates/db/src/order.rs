//! Tenant resource orders.

use std::collections::BTreeMap;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// Provider trust level required by an order.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrustLevel {
    One,
    Two,
    Three,
    Four,
    Five,
}

/// Order book state.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Active,
    Closed,
    Complete,
}

/// Published container port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,

    /// Host port, a random one is assigned if absent.
    #[serde(default)]
    pub host_port: Option<u16>,

    /// Either `tcp` or `udp`, defaults to `tcp`.
    #[serde(default)]
    pub protocol: Option<String>,
}

/// Host path mounted into the container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMapping {
    pub host_path: String,
    pub container_path: String,

    #[serde(default)]
    pub read_only: bool,
}

/// Workload container specification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Image reference, e.g. `nginx:1.25`.
    pub image: String,

    /// CPU limit, in cores.
    pub cpu: f64,

    /// Memory limit, in megabytes.
    pub memory: u64,

    /// Storage requirement, in megabytes.
    #[serde(default)]
    pub storage: Option<u64>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub ports: Vec<PortMapping>,

    #[serde(default)]
    pub volumes: Vec<VolumeMapping>,

    /// Entrypoint override.
    #[serde(default)]
    pub command: Option<Vec<String>>,

    #[serde(default)]
    pub args: Option<Vec<String>>,
}

/// Order details, merged from the ledger and local records.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Order {
    pub id: u64,

    /// Tenant account that created the order, if it was created locally.
    pub tenant: Option<String>,

    pub max_price: Amount,

    /// Lease duration, in ledger blocks.
    pub duration_blocks: u64,

    pub quantity: u32,

    pub trust_levels: Vec<TrustLevel>,

    pub specification: ContainerSpec,

    pub state: State,
}
