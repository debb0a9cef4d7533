use std::{sync::Arc, time::Duration};

use common::config;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::ChainError,
    outcome::{Outcome, Receipt},
    rpc::{HttpLedgerRpc, LedgerRpc, RpcError, SendStatus, TransactionStatus},
    signer::{Keypair, SigningError, TransactionSigner},
    transaction::{Invocation, SignedTransaction, Transaction, TxHash},
};

/// Bounded transaction status polling.
#[derive(Clone, Copy, Debug)]
pub struct PollPolicy {
    /// Delay before each status request.
    pub interval: Duration,

    /// Max number of status requests.
    pub attempts: u32,
}

/// Ledger adapter settings.
#[derive(Clone, Debug)]
pub struct AdapterSettings {
    pub network_passphrase: String,
    pub base_fee: u64,

    /// Transaction validity window, in seconds.
    pub transaction_timeout: u64,

    pub poll: PollPolicy,
}

impl From<&config::Ledger> for AdapterSettings {
    fn from(config: &config::Ledger) -> Self {
        Self {
            network_passphrase: config.network_passphrase.clone(),
            base_fee: config.base_fee,
            transaction_timeout: config.transaction_timeout,
            poll: PollPolicy {
                interval: Duration::from_millis(config.poll_interval),
                attempts: config.poll_attempts,
            },
        }
    }
}

/// Result of the simulate-prepare-sign-broadcast sequence.
enum Submission {
    Read(Value),
    Accepted(TxHash),
}

/// Stateless ledger adapter, holding only the default signer identity.
pub struct ChainAdapter {
    rpc: Arc<dyn LedgerRpc>,
    signer: Arc<dyn TransactionSigner>,
    settings: AdapterSettings,
}

impl ChainAdapter {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        signer: Arc<dyn TransactionSigner>,
        settings: AdapterSettings,
    ) -> Self {
        Self {
            rpc,
            signer,
            settings,
        }
    }

    /// Create an adapter talking JSON-RPC to the configured node.
    pub fn from_config(config: &config::Ledger) -> Result<Self, SigningError> {
        Ok(Self::new(
            Arc::new(HttpLedgerRpc::new(&config.rpc_url)),
            Arc::new(Keypair::from_hex(&config.signer_secret_key)?),
            config.into(),
        ))
    }

    /// Address of the adapter's own signer.
    pub fn address(&self) -> &str {
        self.signer.address()
    }

    /// Default signer identity.
    pub fn signer(&self) -> Arc<dyn TransactionSigner> {
        self.signer.clone()
    }

    /// Execute an invocation with the adapter's own signer.
    pub async fn execute(&self, invocation: Invocation) -> Outcome {
        self.execute_as(&*self.signer, invocation).await
    }

    /// Execute an invocation and, for mutating calls, wait for finality.
    #[instrument(skip_all, fields(contract = %invocation.contract_id, method = %invocation.method))]
    pub async fn execute_as(&self, signer: &dyn TransactionSigner, invocation: Invocation) -> Outcome {
        match self.submit(signer, invocation).await {
            Ok(Submission::Read(value)) => Outcome::Read(value),
            Ok(Submission::Accepted(hash)) => self.await_final(&hash).await,
            Err(outcome) => outcome,
        }
    }

    /// Execute an invocation without waiting for finality.
    ///
    /// Mutating calls resolve to [`Outcome::Accepted`] once the ledger
    /// acknowledges the transaction. Use [`ChainAdapter::reconcile`] to learn
    /// its final status.
    #[instrument(skip_all, fields(contract = %invocation.contract_id, method = %invocation.method))]
    pub async fn broadcast(&self, signer: &dyn TransactionSigner, invocation: Invocation) -> Outcome {
        match self.submit(signer, invocation).await {
            Ok(Submission::Read(value)) => Outcome::Read(value),
            Ok(Submission::Accepted(hash)) => Outcome::Accepted(hash),
            Err(outcome) => outcome,
        }
    }

    /// Poll the status of an already broadcast transaction without resubmitting it.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, hash: &TxHash) -> Outcome {
        self.await_final(hash).await
    }

    /// Sequence number of the latest closed ledger.
    pub async fn latest_ledger(&self) -> Result<u64, ChainError> {
        self.rpc.latest_ledger().await.map_err(ChainError::Rpc)
    }

    async fn submit(
        &self,
        signer: &dyn TransactionSigner,
        invocation: Invocation,
    ) -> Result<Submission, Outcome> {
        let method = invocation.method.clone();

        let sequence = self
            .rpc
            .account_sequence(signer.address())
            .await
            .map_err(|err| Outcome::Failed(ChainError::Rpc(err)))?;

        let mut transaction = Transaction {
            source: signer.address().to_string(),
            sequence: sequence + 1,
            fee: self.settings.base_fee,
            timeout: self.settings.transaction_timeout,
            invocation,
            footprint: None,
        };

        let simulation = self
            .rpc
            .simulate(&transaction)
            .await
            .map_err(|err| Outcome::Failed(ChainError::Rpc(err)))?;

        if let Some(reason) = simulation.error {
            return Err(Outcome::Failed(ChainError::Simulation { method, reason }));
        }

        if simulation.footprint.is_read_only() {
            debug!("read-only call answered by simulation");
            return Ok(Submission::Read(simulation.result.unwrap_or(Value::Null)));
        }

        transaction.fee = self
            .settings
            .base_fee
            .checked_add(simulation.min_resource_fee)
            .ok_or_else(|| {
                Outcome::Failed(ChainError::Preparation {
                    method: method.clone(),
                    reason: String::from("fee overflow"),
                })
            })?;
        transaction.footprint = Some(simulation.footprint);

        let payload = transaction
            .signature_payload(&self.settings.network_passphrase)
            .map_err(|err| {
                Outcome::Failed(ChainError::Preparation {
                    method: method.clone(),
                    reason: err.to_string(),
                })
            })?;

        let signature = signer.sign(&payload).map_err(|cause| {
            Outcome::Failed(ChainError::Signing {
                method: method.clone(),
                cause,
            })
        })?;

        let signed = SignedTransaction {
            transaction,
            hash: TxHash::from(payload),
            public_key: signature.public_key,
            signature: signature.signature,
        };

        self.send(&method, &signed).await.map(Submission::Accepted)
    }

    async fn send(&self, method: &str, signed: &SignedTransaction) -> Result<TxHash, Outcome> {
        let attempts = self.settings.poll.attempts.max(1);

        for attempt in 1..=attempts {
            match self.rpc.send(signed).await {
                Ok(response) => match response.status {
                    SendStatus::Pending | SendStatus::Duplicate => {
                        info!(hash = %signed.hash, "transaction accepted");
                        return Ok(signed.hash.clone());
                    }
                    SendStatus::TryAgainLater => {
                        debug!(attempt, "ledger asked to retry broadcast");
                        tokio::time::sleep(self.settings.poll.interval).await;
                    }
                    SendStatus::Error => {
                        return Err(Outcome::Failed(ChainError::Broadcast {
                            method: method.to_string(),
                            reason: response
                                .error
                                .unwrap_or_else(|| String::from("transaction rejected")),
                        }));
                    }
                },
                Err(err @ (RpcError::Unreachable(_) | RpcError::Remote { .. } | RpcError::Json(_))) => {
                    return Err(Outcome::Failed(ChainError::Broadcast {
                        method: method.to_string(),
                        reason: err.to_string(),
                    }));
                }
                Err(err) => {
                    warn!(hash = %signed.hash, ?err, "broadcast result unknown");

                    return Err(Outcome::Indeterminate(ChainError::Unconfirmed {
                        hash: signed.hash.clone(),
                        reason: err.to_string(),
                    }));
                }
            }
        }

        Err(Outcome::Failed(ChainError::Broadcast {
            method: method.to_string(),
            reason: format!("ledger kept deferring the transaction after {attempts} attempts"),
        }))
    }

    async fn await_final(&self, hash: &TxHash) -> Outcome {
        let PollPolicy { interval, attempts } = self.settings.poll;

        for attempt in 1..=attempts {
            tokio::time::sleep(interval).await;

            match self.rpc.transaction(hash).await {
                Ok(response) => match response.status {
                    TransactionStatus::Success => {
                        info!(%hash, "transaction finalized");

                        return Outcome::Final(Receipt {
                            hash: hash.clone(),
                            value: response.return_value,
                        });
                    }
                    TransactionStatus::Failed => {
                        return Outcome::Failed(ChainError::Execution {
                            hash: hash.clone(),
                            status: response.error.unwrap_or_else(|| String::from("FAILED")),
                        });
                    }
                    TransactionStatus::NotFound => {
                        debug!(%hash, attempt, "transaction not found yet");
                    }
                },
                Err(err) => warn!(%hash, attempt, ?err, "unable to poll transaction status"),
            }
        }

        Outcome::Indeterminate(ChainError::Timeout {
            hash: hash.clone(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{Behavior, FakeLedger};

    fn adapter(ledger: &Arc<FakeLedger>) -> ChainAdapter {
        ledger.adapter(&common::config::Config::for_tests().ledger)
    }

    #[tokio::test]
    async fn read_only_call_is_never_broadcast() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.respond("get_order", Behavior::read(json!({ "max_price": "5" })));

        let outcome = adapter(&ledger)
            .execute(Invocation::new("orders", "get_order").arg(1))
            .await;

        assert!(matches!(outcome, Outcome::Read(value) if value["max_price"] == "5"));
        assert_eq!(ledger.sent_count("get_order"), 0);
    }

    #[tokio::test]
    async fn mutating_call_is_finalized() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.respond("create_order", Behavior::write(json!(42)));

        let confirmation = adapter(&ledger)
            .execute(Invocation::new("orders", "create_order"))
            .await
            .into_result()
            .unwrap();

        assert_eq!(confirmation.value, Some(json!(42)));
        assert!(confirmation.hash.is_some());
        assert_eq!(ledger.sent_count("create_order"), 1);
    }

    #[tokio::test]
    async fn simulation_rejection_is_definite() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.respond("lock", Behavior::Reject(String::from("insufficient balance")));

        let outcome = adapter(&ledger)
            .execute(Invocation::new("escrow", "lock"))
            .await;

        assert!(matches!(outcome, Outcome::Failed(ChainError::Simulation { .. })));
        assert_eq!(ledger.sent_count("lock"), 0);
    }

    #[tokio::test]
    async fn unreachable_node_is_not_a_rejection() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.respond("get_order", Behavior::Offline);

        let outcome = adapter(&ledger)
            .execute(Invocation::new("orders", "get_order").arg(1))
            .await;

        match outcome {
            Outcome::Failed(err @ ChainError::Rpc(RpcError::Transport(_))) => {
                assert!(!err.is_indeterminate());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(ledger.sent_count("get_order"), 0);
    }

    #[tokio::test]
    async fn execution_failure_embeds_status() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.respond("lock", Behavior::FailOnLedger);

        let outcome = adapter(&ledger)
            .execute(Invocation::new("escrow", "lock"))
            .await;

        match outcome {
            Outcome::Failed(err @ ChainError::Execution { .. }) => {
                assert!(!err.is_indeterminate());
                assert!(err.to_string().contains("FAILED"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn polling_budget_exhaustion_is_indeterminate() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.respond("deposit", Behavior::NeverFinalize);

        let outcome = adapter(&ledger)
            .execute(Invocation::new("escrow", "deposit"))
            .await;

        match outcome {
            Outcome::Indeterminate(ChainError::Timeout { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_node_is_definite_broadcast_failure() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.respond("deposit", Behavior::Unreachable);

        let outcome = adapter(&ledger)
            .execute(Invocation::new("escrow", "deposit"))
            .await;

        assert!(matches!(outcome, Outcome::Failed(ChainError::Broadcast { .. })));
    }

    #[tokio::test]
    async fn lost_broadcast_response_is_indeterminate() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.respond("deposit", Behavior::LostResponse);

        let outcome = adapter(&ledger)
            .execute(Invocation::new("escrow", "deposit"))
            .await;

        assert!(matches!(
            outcome,
            Outcome::Indeterminate(ChainError::Unconfirmed { .. })
        ));
    }

    #[tokio::test]
    async fn reconcile_does_not_resubmit() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.respond("deposit", Behavior::NeverFinalize);
        let adapter = adapter(&ledger);

        let Outcome::Indeterminate(err) = adapter.execute(Invocation::new("escrow", "deposit")).await
        else {
            panic!("expected indeterminate outcome");
        };
        let hash = err.tx_hash().cloned().unwrap();

        ledger.finalize(&hash, Some(json!(true)));

        let outcome = adapter.reconcile(&hash).await;

        assert!(matches!(outcome, Outcome::Final(Receipt { value: Some(_), .. })));
        assert_eq!(ledger.sent_count("deposit"), 1);
    }

    #[tokio::test]
    async fn broadcast_returns_accepted() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.respond("deposit", Behavior::write(json!(null)));
        let adapter = adapter(&ledger);

        let outcome = adapter
            .broadcast(&*adapter.signer(), Invocation::new("escrow", "deposit"))
            .await;

        assert!(matches!(outcome, Outcome::Accepted(_)));
    }

    #[tokio::test]
    async fn transactions_carry_simulated_fee() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.respond("deposit", Behavior::write(json!(null)));

        adapter(&ledger)
            .execute(Invocation::new("escrow", "deposit"))
            .await
            .into_result()
            .unwrap();

        let sent = ledger.sent_transactions();
        assert_eq!(sent[0].transaction.fee, 100 + FakeLedger::RESOURCE_FEE);
        assert!(sent[0].transaction.footprint.is_some());
    }
}
