use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{error::ChainError, transaction::TxHash};

/// Finalized transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct Receipt {
    pub hash: TxHash,

    /// Decoded contract return value, if any.
    pub value: Option<Value>,
}

/// Result of a ledger call.
#[derive(Debug)]
pub enum Outcome {
    /// Read-only call, answered by simulation without broadcast.
    Read(Value),

    /// Mutating call was accepted by the ledger, finality was not awaited.
    Accepted(TxHash),

    /// Mutating call was finalized successfully.
    Final(Receipt),

    /// Call definitely failed and had no effect on the ledger.
    Failed(ChainError),

    /// Call may or may not have been applied, it has to be reconciled.
    Indeterminate(ChainError),
}

/// Successfully confirmed call.
#[derive(Clone, Debug, PartialEq)]
pub struct Confirmation {
    /// Hash of the carrying transaction, absent for read-only calls.
    pub hash: Option<TxHash>,

    pub value: Option<Value>,
}

impl Confirmation {
    /// Decode the return value into the requested type.
    ///
    /// A missing return value is decoded as JSON `null`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, ChainError> {
        serde_json::from_value(self.value.unwrap_or(Value::Null))
            .map_err(|err| ChainError::Decode(err.to_string()))
    }
}

impl Outcome {
    /// Convert into a [`Result`], treating only read and final outcomes as success.
    pub fn into_result(self) -> Result<Confirmation, ChainError> {
        match self {
            Outcome::Read(value) => Ok(Confirmation {
                hash: None,
                value: Some(value),
            }),
            Outcome::Final(Receipt { hash, value }) => Ok(Confirmation {
                hash: Some(hash),
                value,
            }),
            Outcome::Accepted(hash) => Err(ChainError::Pending { hash }),
            Outcome::Failed(err) | Outcome::Indeterminate(err) => Err(err),
        }
    }

    /// Shorthand for [`Outcome::into_result`] followed by [`Confirmation::decode`].
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, ChainError> {
        self.into_result()?.decode()
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Outcome::Accepted(_) | Outcome::Indeterminate(_))
    }
}
