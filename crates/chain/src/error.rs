use derive_more::{Display, Error};

use crate::{rpc::RpcError, signer::SigningError, transaction::TxHash};

/// Ledger call errors.
///
/// [`ChainError::Timeout`] and [`ChainError::Unconfirmed`] are indeterminate:
/// the transaction may or may not have been applied.
#[derive(Debug, Display, Error)]
pub enum ChainError {
    /// Contract rejected the call during simulation.
    #[display(fmt = "simulation of {} failed: {}", method, reason)]
    Simulation { method: String, reason: String },

    /// Unable to estimate fees or resources.
    #[display(fmt = "unable to prepare {}: {}", method, reason)]
    Preparation { method: String, reason: String },

    #[display(fmt = "unable to sign {}: {}", method, cause)]
    Signing {
        method: String,
        #[error(source)]
        cause: SigningError,
    },

    /// Ledger refused the transaction, or could not be reached at all.
    #[display(fmt = "broadcast of {} failed: {}", method, reason)]
    Broadcast { method: String, reason: String },

    /// Transaction finalized, but contract execution failed.
    #[display(fmt = "transaction {} failed with status {}", hash, status)]
    Execution { hash: TxHash, status: String },

    /// Transaction was not finalized within the polling budget.
    #[display(fmt = "transaction {} not finalized after {} attempts", hash, attempts)]
    Timeout { hash: TxHash, attempts: u32 },

    /// Broadcast result was lost in transit.
    #[display(fmt = "broadcast of transaction {} is unconfirmed: {}", hash, reason)]
    Unconfirmed { hash: TxHash, reason: String },

    /// Transaction was broadcast, but its finality was never awaited.
    #[display(fmt = "transaction {} is still pending", hash)]
    Pending { hash: TxHash },

    /// Return value has an unexpected shape.
    #[display(fmt = "unable to decode return value: {}", _0)]
    Decode(#[error(not(source))] String),

    /// Node could not answer a query or simulation.
    Rpc(RpcError),
}

impl ChainError {
    /// Check if the failed call may still have been applied by the ledger.
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            ChainError::Timeout { .. } | ChainError::Unconfirmed { .. } | ChainError::Pending { .. }
        )
    }

    /// Hash of the transaction the error refers to, if it was ever broadcast.
    pub fn tx_hash(&self) -> Option<&TxHash> {
        match self {
            ChainError::Execution { hash, .. }
            | ChainError::Timeout { hash, .. }
            | ChainError::Unconfirmed { hash, .. }
            | ChainError::Pending { hash } => Some(hash),
            _ => None,
        }
    }
}
