//! Tenant-provider compute agreement.

use std::time::Duration;

use derive_more::Display;
use serde::Serialize;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Lease lifecycle state.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    #[display(fmt = "active")]
    Active,

    #[display(fmt = "completed")]
    Completed,

    #[display(fmt = "canceled")]
    Canceled,
}

impl State {
    /// Check if no further transitions are allowed from the current state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Completed | State::Canceled)
    }
}

/// Lease record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Lease {
    /// Locally assigned lease identifier.
    pub id: u64,

    /// Order the lease was created for.
    pub order_id: u64,

    /// Provider that won the order.
    pub provider_id: u64,

    /// Tenant account address.
    pub tenant: String,

    /// First ledger block of the lease validity window.
    pub start_block: u64,

    /// Last ledger block of the lease validity window.
    pub end_block: u64,

    /// Wall-clock estimate of the lease end.
    #[serde(with = "time::serde::rfc3339")]
    pub estimated_end: OffsetDateTime,

    pub state: State,

    /// Identifier of the container running the lease workload.
    pub container_id: Option<String>,

    /// Externally reachable workload URL.
    pub access_url: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Estimate when a range of `blocks` starting at `from` ends, given a fixed block interval.
///
/// Saturates at the latest representable date.
pub fn estimate_end(from: OffsetDateTime, blocks: u64, block_interval: Duration) -> OffsetDateTime {
    let seconds = blocks.saturating_mul(block_interval.as_secs());

    i64::try_from(seconds)
        .ok()
        .and_then(|seconds| from.checked_add(time::Duration::seconds(seconds)))
        .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
}
