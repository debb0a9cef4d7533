//! Provider bids placed on orders.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::amount::Amount;

/// Bid state.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Active,
    Canceled,
    Matched,
}

/// Bid record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Bid {
    /// Ledger-assigned bid identifier.
    pub id: u64,
    pub order_id: u64,
    pub provider_id: u64,
    pub price: Amount,
    pub state: State,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
