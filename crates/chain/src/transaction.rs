//! Ledger transaction model.

use std::fmt;

use common::hash;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Contract method invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub contract_id: String,
    pub method: String,
    pub args: Vec<Value>,
}

impl Invocation {
    pub fn new(contract_id: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            contract_id: contract_id.into(),
            method: method.into(),
            args: Vec::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }
}

/// Ledger entries touched by a transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footprint {
    #[serde(default)]
    pub read_only: Vec<String>,

    #[serde(default)]
    pub read_write: Vec<String>,
}

impl Footprint {
    /// Check if applying the transaction would leave ledger state untouched.
    pub fn is_read_only(&self) -> bool {
        self.read_write.is_empty()
    }
}

/// Unsigned transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Source account address.
    pub source: String,
    pub sequence: u64,
    pub fee: u64,

    /// Validity window, in seconds.
    pub timeout: u64,

    pub invocation: Invocation,

    /// Footprint attached during preparation.
    #[serde(default)]
    pub footprint: Option<Footprint>,
}

impl Transaction {
    /// Hex-encoded transaction envelope, as accepted by the ledger RPC.
    pub fn envelope(&self) -> Result<String, serde_json::Error> {
        Ok(hex::encode(serde_json::to_vec(self)?))
    }

    /// Compute the digest that gets signed, bound to the provided network.
    pub fn signature_payload(&self, network_passphrase: &str) -> Result<[u8; 32], serde_json::Error> {
        let envelope = serde_json::to_vec(self)?;

        Ok(hash::blake2_chunks([
            network_passphrase.as_bytes(),
            &envelope[..],
        ]))
    }
}

/// Signed transaction, ready for broadcast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,

    pub hash: TxHash,

    /// Hex-encoded signer public key.
    pub public_key: String,

    /// Hex-encoded signature of the transaction hash.
    pub signature: String,
}

impl SignedTransaction {
    pub fn envelope(&self) -> Result<String, serde_json::Error> {
        Ok(hex::encode(serde_json::to_vec(self)?))
    }
}

/// Hex-encoded transaction hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<[u8; 32]> for TxHash {
    fn from(value: [u8; 32]) -> Self {
        Self(hex::encode(value))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
