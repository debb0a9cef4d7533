//! Scripted in-memory ledger for tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use common::config;
use serde_json::Value;

use crate::{
    adapter::ChainAdapter,
    rpc::{
        LedgerRpc, RpcError, SendResponse, SendStatus, Simulation, TransactionResponse,
        TransactionStatus,
    },
    signer::Keypair,
    transaction::{Footprint, SignedTransaction, Transaction, TxHash},
};

/// Computes a return value from call arguments, or a contract error.
pub type Responder = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Scripted ledger behavior of a single contract method.
#[derive(Clone)]
pub enum Behavior {
    /// Read-only method, answered by simulation.
    Read(Responder),

    /// Mutating method, finalized with the returned value.
    ///
    /// The responder runs once, when the transaction is broadcast.
    /// A responder error fails the transaction on execution.
    Write(Responder),

    /// Contract rejects the call during simulation.
    Reject(String),

    /// Transaction is accepted, but fails on execution.
    FailOnLedger,

    /// Transaction is accepted, but never shows up as finalized.
    NeverFinalize,

    /// Node can't be reached during broadcast.
    Unreachable,

    /// Node can't be reached at all, simulation included.
    Offline,

    /// Transaction is applied, but the broadcast response is lost.
    LostResponse,
}

impl Behavior {
    pub fn read(value: Value) -> Self {
        Behavior::Read(Arc::new(move |_| Ok(value.clone())))
    }

    pub fn read_with(
        f: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Behavior::Read(Arc::new(f))
    }

    pub fn write(value: Value) -> Self {
        Behavior::Write(Arc::new(move |_| Ok(value.clone())))
    }

    pub fn write_with(
        f: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Behavior::Write(Arc::new(f))
    }
}

enum Pending {
    Finalized(Option<Value>),
    Failed(String),
    Unknown,
}

#[derive(Default)]
struct State {
    behaviors: HashMap<String, Behavior>,
    pending: HashMap<TxHash, Pending>,
    sent: Vec<SignedTransaction>,
}

/// [`LedgerRpc`] implementation with per-method scripted behavior.
///
/// Methods without a scripted behavior are rejected during simulation.
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<State>,
    latest_ledger: AtomicU64,
}

impl FakeLedger {
    /// Resource fee reported by every simulation of a mutating call.
    pub const RESOURCE_FEE: u64 = 10;

    pub fn new() -> Self {
        Self::default()
    }

    /// Build a [`ChainAdapter`] on top of the current ledger.
    pub fn adapter(self: &Arc<Self>, config: &config::Ledger) -> ChainAdapter {
        ChainAdapter::new(
            self.clone(),
            Arc::new(Keypair::from_hex(&config.signer_secret_key).expect("invalid test key")),
            config.into(),
        )
    }

    pub fn respond(&self, method: &str, behavior: Behavior) {
        self.lock().behaviors.insert(method.to_string(), behavior);
    }

    pub fn set_latest_ledger(&self, sequence: u64) {
        self.latest_ledger.store(sequence, Ordering::SeqCst);
    }

    /// Mark a broadcast transaction as successfully finalized.
    pub fn finalize(&self, hash: &TxHash, value: Option<Value>) {
        self.lock()
            .pending
            .insert(hash.clone(), Pending::Finalized(value));
    }

    /// Number of broadcast transactions invoking the provided method.
    pub fn sent_count(&self, method: &str) -> usize {
        self.lock()
            .sent
            .iter()
            .filter(|tx| tx.transaction.invocation.method == method)
            .count()
    }

    pub fn sent_transactions(&self) -> Vec<SignedTransaction> {
        self.lock().sent.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake ledger state poisoned")
    }

    fn behavior(&self, method: &str) -> Option<Behavior> {
        self.lock().behaviors.get(method).cloned()
    }
}

#[async_trait]
impl LedgerRpc for FakeLedger {
    async fn account_sequence(&self, _address: &str) -> Result<u64, RpcError> {
        Ok(self.lock().sent.len() as u64)
    }

    async fn latest_ledger(&self) -> Result<u64, RpcError> {
        Ok(self.latest_ledger.load(Ordering::SeqCst))
    }

    async fn simulate(&self, transaction: &Transaction) -> Result<Simulation, RpcError> {
        let invocation = &transaction.invocation;

        if let Some(Behavior::Offline) = self.behavior(&invocation.method) {
            return Err(RpcError::Transport(String::from("operation timed out")));
        }

        let write_footprint = || Footprint {
            read_only: Vec::new(),
            read_write: vec![invocation.contract_id.clone()],
        };

        Ok(match self.behavior(&invocation.method) {
            None => Simulation {
                error: Some(format!("unknown method {}", invocation.method)),
                ..Default::default()
            },
            Some(Behavior::Read(responder)) => match responder(&invocation.args) {
                Ok(value) => Simulation {
                    result: Some(value),
                    ..Default::default()
                },
                Err(reason) => Simulation {
                    error: Some(reason),
                    ..Default::default()
                },
            },
            Some(Behavior::Reject(reason)) => Simulation {
                error: Some(reason),
                ..Default::default()
            },
            Some(_) => Simulation {
                footprint: write_footprint(),
                min_resource_fee: Self::RESOURCE_FEE,
                ..Default::default()
            },
        })
    }

    async fn send(&self, transaction: &SignedTransaction) -> Result<SendResponse, RpcError> {
        let invocation = &transaction.transaction.invocation;

        let pending = match self.behavior(&invocation.method) {
            Some(Behavior::Unreachable) => {
                return Err(RpcError::Unreachable(String::from("connection refused")))
            }
            Some(Behavior::Write(responder)) => match responder(&invocation.args) {
                Ok(value) => Pending::Finalized(Some(value)),
                Err(reason) => Pending::Failed(reason),
            },
            Some(Behavior::FailOnLedger) => Pending::Failed(String::from("FAILED")),
            Some(Behavior::LostResponse) => Pending::Finalized(None),
            _ => Pending::Unknown,
        };

        let lost = matches!(self.behavior(&invocation.method), Some(Behavior::LostResponse));

        {
            let mut state = self.lock();
            state.sent.push(transaction.clone());
            state.pending.insert(transaction.hash.clone(), pending);
        }

        if lost {
            return Err(RpcError::Transport(String::from("connection reset")));
        }

        Ok(SendResponse {
            hash: transaction.hash.clone(),
            status: SendStatus::Pending,
            error: None,
        })
    }

    async fn transaction(&self, hash: &TxHash) -> Result<TransactionResponse, RpcError> {
        let response = match self.lock().pending.get(hash) {
            Some(Pending::Finalized(value)) => TransactionResponse {
                status: TransactionStatus::Success,
                return_value: value.clone(),
                error: None,
            },
            Some(Pending::Failed(reason)) => TransactionResponse {
                status: TransactionStatus::Failed,
                return_value: None,
                error: Some(reason.clone()),
            },
            Some(Pending::Unknown) | None => TransactionResponse {
                status: TransactionStatus::NotFound,
                return_value: None,
                error: None,
            },
        };

        Ok(response)
    }
}
