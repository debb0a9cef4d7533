//! Ledger settlement log.
//!
//! Payments are a record of what was asked of the ledger, never a source
//! of truth for balances. Records are written once and never mutated.

use derive_more::Display;
use serde::Serialize;
use time::OffsetDateTime;

use crate::amount::Amount;

/// Kind of a money movement.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    #[display(fmt = "deposit")]
    Deposit,

    #[display(fmt = "lock")]
    Lock,

    #[display(fmt = "unlock")]
    Unlock,

    #[display(fmt = "transfer")]
    Transfer,

    #[display(fmt = "withdrawal")]
    Withdrawal,

    #[display(fmt = "earnings_withdrawal")]
    EarningsWithdrawal,

    #[display(fmt = "penalty")]
    Penalty,
}

/// Settlement status at the time the record was written.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[display(fmt = "pending")]
    Pending,

    #[display(fmt = "completed")]
    Completed,

    #[display(fmt = "failed")]
    Failed,
}

/// Payment record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Payment {
    pub id: u64,
    pub kind: Kind,

    /// Related lease, absent for account-level operations.
    pub lease_id: Option<u64>,

    /// Tenant account address.
    pub tenant: Option<String>,

    /// Provider account address.
    pub provider: Option<String>,

    /// Token contract identifier.
    pub token: String,

    /// Moved amount, absent when the ledger does not report it.
    pub amount: Option<Amount>,

    pub status: Status,

    /// Hash of the ledger transaction that carried the operation.
    pub tx_hash: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
