//! Compute providers.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::order::TrustLevel;

/// Provider registry status.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Registered,
    Active,

    // Spelled the way the registry contract spells it.
    #[serde(rename = "Maintanance")]
    Maintenance,

    Suspended,
    Deactivated,
}

/// Capacity advertised by a provider.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    /// CPU cores.
    pub cpu: f64,

    /// Memory, in megabytes.
    pub memory: u64,

    /// Storage, in megabytes.
    pub storage: u64,
}

/// Provider details, merged from the ledger and local records.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Provider {
    pub id: u64,
    pub address: String,
    pub trust_level: TrustLevel,
    pub status: Status,

    /// Hostname, workloads of the provider are reachable at.
    pub hostname: Option<String>,

    pub port: Option<u16>,

    pub capacity: Capacity,
}
