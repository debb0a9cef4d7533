//! # Ledger transaction adapter
//!
//! Turns a logical "call contract method with arguments" request into a
//! ledger operation without the caller knowing whether the method only
//! reads state or mutates it.
//!
//! Every call is simulated first. A simulation whose read-write footprint
//! is empty is answered straight from the simulation result and never
//! broadcast. Anything else is prepared (fee and footprint), signed,
//! broadcast and polled until the ledger reports a terminal status or the
//! [`PollPolicy`] budget runs out.
//!
//! Results are reported as an [`Outcome`], which keeps "definitely failed"
//! apart from "submitted, but finality is unknown". The latter must be
//! reconciled with [`ChainAdapter::reconcile`] instead of being retried, since
//! the transaction may have already been applied.

mod adapter;
mod error;
mod outcome;
pub mod rpc;
pub mod signer;
pub mod transaction;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use adapter::{AdapterSettings, ChainAdapter, PollPolicy};
pub use error::ChainError;
pub use outcome::{Confirmation, Outcome, Receipt};
pub use rpc::{HttpLedgerRpc, LedgerRpc, RpcError};
pub use signer::{Keypair, SigningError, TransactionSigner};
pub use transaction::{Invocation, TxHash};

pub use serde_json::{json, Value};
