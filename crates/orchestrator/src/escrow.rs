//! Escrow coordinator.
//!
//! Moves value between tenant and provider balances through the escrow
//! contract. Every confirmed call is logged as an immutable [`Payment`];
//! unconfirmed calls leave no record.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chain::{ChainAdapter, ChainError, Confirmation, TransactionSigner};
use db::{
    amount::Amount,
    payment::{self, Payment},
    MemoryStore, OffsetDateTime, Store, StoreError,
};
use derive_more::{Display, Error, From};
use tracing::{info, instrument, warn};

use crate::contracts::{
    escrow::{ProviderEarnings, TenantBalance},
    EscrowContract,
};

/// Escrow coordinator errors.
#[derive(Debug, Display, Error, From)]
pub enum EscrowError {
    #[display(fmt = "deposit by {} failed: {}", tenant, cause)]
    #[from(ignore)]
    DepositFailed {
        tenant: String,
        #[error(source)]
        cause: ChainError,
    },

    #[display(fmt = "lock by {} failed: {}", tenant, cause)]
    #[from(ignore)]
    LockFailed {
        tenant: String,
        #[error(source)]
        cause: ChainError,
    },

    #[display(fmt = "unlock by {} failed: {}", tenant, cause)]
    #[from(ignore)]
    UnlockFailed {
        tenant: String,
        #[error(source)]
        cause: ChainError,
    },

    #[display(fmt = "withdrawal by {} failed: {}", tenant, cause)]
    #[from(ignore)]
    WithdrawFailed {
        tenant: String,
        #[error(source)]
        cause: ChainError,
    },

    #[display(fmt = "transfer for lease {} failed: {}", lease_id, cause)]
    #[from(ignore)]
    TransferFailed {
        lease_id: u64,
        #[error(source)]
        cause: ChainError,
    },

    #[display(fmt = "earnings withdrawal by {} failed: {}", provider, cause)]
    #[from(ignore)]
    EarningsWithdrawalFailed {
        provider: String,
        #[error(source)]
        cause: ChainError,
    },

    #[display(fmt = "penalty of {} for lease {} failed: {}", provider, lease_id, cause)]
    #[from(ignore)]
    PenaltyFailed {
        provider: String,
        lease_id: u64,
        #[error(source)]
        cause: ChainError,
    },

    #[display(fmt = "balance query failed: {}", _0)]
    BalanceQueryFailed(ChainError),

    #[display(fmt = "{} amount must be positive", _0)]
    #[from(ignore)]
    ZeroAmount(#[error(not(source))] payment::Kind),

    #[display(fmt = "payment {} not found", _0)]
    #[from(ignore)]
    PaymentNotFound(#[error(not(source))] u64),

    /// Store-related error.
    Store(StoreError),
}

impl EscrowError {
    /// Check if the failed ledger call may still have been applied.
    pub fn is_indeterminate(&self) -> bool {
        self.chain_error().map_or(false, ChainError::is_indeterminate)
    }

    fn chain_error(&self) -> Option<&ChainError> {
        match self {
            EscrowError::DepositFailed { cause, .. }
            | EscrowError::LockFailed { cause, .. }
            | EscrowError::UnlockFailed { cause, .. }
            | EscrowError::WithdrawFailed { cause, .. }
            | EscrowError::TransferFailed { cause, .. }
            | EscrowError::EarningsWithdrawalFailed { cause, .. }
            | EscrowError::PenaltyFailed { cause, .. }
            | EscrowError::BalanceQueryFailed(cause) => Some(cause),
            EscrowError::ZeroAmount(_)
            | EscrowError::PaymentNotFound(_)
            | EscrowError::Store(_) => None,
        }
    }
}

/// Transfer of locked tenant funds to a provider.
#[derive(Clone, Debug)]
pub struct Transfer<'a> {
    pub token: &'a str,
    pub tenant: &'a str,
    pub amount: Amount,
    pub provider_id: u64,

    /// Provider address, recorded on the payment if known.
    pub provider_address: Option<&'a str>,

    pub lease_id: u64,
}

/// Payment fields known before a ledger call is made.
struct Draft {
    kind: payment::Kind,
    status: payment::Status,
    lease_id: Option<u64>,
    tenant: Option<String>,
    provider: Option<String>,
    token: String,
    amount: Option<Amount>,
}

pub struct EscrowCoordinator {
    contract: EscrowContract,
    adapter: Arc<ChainAdapter>,
    payments: Arc<dyn Store<u64, Payment>>,
    next_id: AtomicU64,
}

impl EscrowCoordinator {
    pub fn new(adapter: Arc<ChainAdapter>, contract_id: &str) -> Self {
        Self::with_store(adapter, contract_id, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(
        adapter: Arc<ChainAdapter>,
        contract_id: &str,
        payments: Arc<dyn Store<u64, Payment>>,
    ) -> Self {
        Self {
            contract: EscrowContract::new(adapter.clone(), contract_id),
            adapter,
            payments,
            next_id: AtomicU64::new(1),
        }
    }

    /// Increase the tenant's unlocked balance.
    #[instrument(skip(self, signer), err)]
    pub async fn deposit(
        &self,
        token: &str,
        tenant: &str,
        amount: Amount,
        signer: &dyn TransactionSigner,
    ) -> Result<Payment, EscrowError> {
        ensure_positive(payment::Kind::Deposit, &amount)?;

        let confirmation = self
            .contract
            .deposit(signer, token, tenant, &amount)
            .await
            .map_err(|cause| EscrowError::DepositFailed {
                tenant: tenant.to_string(),
                cause,
            })?;

        self.record(
            Draft {
                kind: payment::Kind::Deposit,
                status: payment::Status::Completed,
                lease_id: None,
                tenant: Some(tenant.to_string()),
                provider: None,
                token: token.to_string(),
                amount: Some(amount),
            },
            confirmation,
        )
        .await
    }

    /// Move tenant funds from unlocked to locked balance.
    ///
    /// The payment stays pending until a transfer spends the locked funds.
    #[instrument(skip(self, signer), err)]
    pub async fn lock(
        &self,
        token: &str,
        tenant: &str,
        amount: Amount,
        signer: &dyn TransactionSigner,
    ) -> Result<Payment, EscrowError> {
        ensure_positive(payment::Kind::Lock, &amount)?;

        let confirmation = self
            .contract
            .lock(signer, token, tenant, &amount)
            .await
            .map_err(|cause| EscrowError::LockFailed {
                tenant: tenant.to_string(),
                cause,
            })?;

        self.record(
            Draft {
                kind: payment::Kind::Lock,
                status: payment::Status::Pending,
                lease_id: None,
                tenant: Some(tenant.to_string()),
                provider: None,
                token: token.to_string(),
                amount: Some(amount),
            },
            confirmation,
        )
        .await
    }

    /// Move tenant funds from locked back to unlocked balance.
    #[instrument(skip(self, signer), err)]
    pub async fn unlock(
        &self,
        token: &str,
        tenant: &str,
        amount: Amount,
        signer: &dyn TransactionSigner,
    ) -> Result<Payment, EscrowError> {
        ensure_positive(payment::Kind::Unlock, &amount)?;

        let confirmation = self
            .contract
            .unlock(signer, token, tenant, &amount)
            .await
            .map_err(|cause| EscrowError::UnlockFailed {
                tenant: tenant.to_string(),
                cause,
            })?;

        self.record(
            Draft {
                kind: payment::Kind::Unlock,
                status: payment::Status::Completed,
                lease_id: None,
                tenant: Some(tenant.to_string()),
                provider: None,
                token: token.to_string(),
                amount: Some(amount),
            },
            confirmation,
        )
        .await
    }

    /// Withdraw unlocked tenant funds to the tenant's wallet.
    #[instrument(skip(self, signer), err)]
    pub async fn withdraw(
        &self,
        token: &str,
        tenant: &str,
        amount: Amount,
        signer: &dyn TransactionSigner,
    ) -> Result<Payment, EscrowError> {
        ensure_positive(payment::Kind::Withdrawal, &amount)?;

        let confirmation = self
            .contract
            .withdraw(signer, token, tenant, &amount)
            .await
            .map_err(|cause| EscrowError::WithdrawFailed {
                tenant: tenant.to_string(),
                cause,
            })?;

        self.record(
            Draft {
                kind: payment::Kind::Withdrawal,
                status: payment::Status::Completed,
                lease_id: None,
                tenant: Some(tenant.to_string()),
                provider: None,
                token: token.to_string(),
                amount: Some(amount),
            },
            confirmation,
        )
        .await
    }

    /// Move locked tenant funds to the provider's earned balance.
    #[instrument(skip_all, fields(lease_id = transfer.lease_id), err)]
    pub async fn transfer_locked(
        &self,
        transfer: Transfer<'_>,
        signer: &dyn TransactionSigner,
    ) -> Result<Payment, EscrowError> {
        ensure_positive(payment::Kind::Transfer, &transfer.amount)?;

        let confirmation = self
            .contract
            .transfer_locked(
                signer,
                transfer.token,
                transfer.tenant,
                &transfer.amount,
                transfer.provider_id,
            )
            .await
            .map_err(|cause| EscrowError::TransferFailed {
                lease_id: transfer.lease_id,
                cause,
            })?;

        self.record(
            Draft {
                kind: payment::Kind::Transfer,
                status: payment::Status::Completed,
                lease_id: Some(transfer.lease_id),
                tenant: Some(transfer.tenant.to_string()),
                provider: transfer.provider_address.map(str::to_string),
                token: transfer.token.to_string(),
                amount: Some(transfer.amount),
            },
            confirmation,
        )
        .await
    }

    /// Withdraw the provider's earned balance to its wallet.
    ///
    /// The amount is only recorded if the contract reports it.
    #[instrument(skip(self, signer), err)]
    pub async fn withdraw_provider_earnings(
        &self,
        token: &str,
        provider: &str,
        signer: &dyn TransactionSigner,
    ) -> Result<Payment, EscrowError> {
        let (confirmation, amount) = self
            .contract
            .withdraw_provider_earnings(signer, provider, token)
            .await
            .map_err(|cause| EscrowError::EarningsWithdrawalFailed {
                provider: provider.to_string(),
                cause,
            })?;

        self.record(
            Draft {
                kind: payment::Kind::EarningsWithdrawal,
                status: payment::Status::Completed,
                lease_id: None,
                tenant: None,
                provider: Some(provider.to_string()),
                token: token.to_string(),
                amount,
            },
            confirmation,
        )
        .await
    }

    /// Lock provider funds as a penalty for an unrecoverable deployment.
    ///
    /// Signed with the orchestrator's own account.
    #[instrument(skip(self), err)]
    pub async fn penalize_provider(
        &self,
        token: &str,
        provider: &str,
        amount: Amount,
        lease_id: u64,
    ) -> Result<Payment, EscrowError> {
        ensure_positive(payment::Kind::Penalty, &amount)?;

        let signer = self.adapter.signer();

        let confirmation = self
            .contract
            .lock(&*signer, token, provider, &amount)
            .await
            .map_err(|cause| EscrowError::PenaltyFailed {
                provider: provider.to_string(),
                lease_id,
                cause,
            })?;

        warn!(%provider, lease_id, %amount, "provider penalized");

        self.record(
            Draft {
                kind: payment::Kind::Penalty,
                status: payment::Status::Pending,
                lease_id: Some(lease_id),
                tenant: None,
                provider: Some(provider.to_string()),
                token: token.to_string(),
                amount: Some(amount),
            },
            confirmation,
        )
        .await
    }

    pub async fn tenant_balance(&self, token: &str, tenant: &str) -> Result<TenantBalance, EscrowError> {
        self.contract
            .tenant_balance(token, tenant)
            .await
            .map_err(EscrowError::BalanceQueryFailed)
    }

    pub async fn provider_earnings(
        &self,
        provider_id: u64,
        token: &str,
    ) -> Result<ProviderEarnings, EscrowError> {
        self.contract
            .provider_earnings(provider_id, token)
            .await
            .map_err(EscrowError::BalanceQueryFailed)
    }

    pub async fn payment(&self, id: u64) -> Result<Payment, EscrowError> {
        self.payments
            .get(&id)
            .await?
            .ok_or(EscrowError::PaymentNotFound(id))
    }

    pub async fn payments(&self) -> Result<Vec<Payment>, EscrowError> {
        Ok(self.payments.values().await?)
    }

    pub async fn payments_for_lease(&self, lease_id: u64) -> Result<Vec<Payment>, EscrowError> {
        self.filtered(|payment| payment.lease_id == Some(lease_id))
            .await
    }

    pub async fn payments_for_tenant(&self, tenant: &str) -> Result<Vec<Payment>, EscrowError> {
        self.filtered(|payment| payment.tenant.as_deref() == Some(tenant))
            .await
    }

    pub async fn payments_for_provider(&self, provider: &str) -> Result<Vec<Payment>, EscrowError> {
        self.filtered(|payment| payment.provider.as_deref() == Some(provider))
            .await
    }

    async fn filtered(
        &self,
        predicate: impl Fn(&Payment) -> bool,
    ) -> Result<Vec<Payment>, EscrowError> {
        Ok(self
            .payments
            .values()
            .await?
            .into_iter()
            .filter(predicate)
            .collect())
    }

    async fn record(&self, draft: Draft, confirmation: Confirmation) -> Result<Payment, EscrowError> {
        let payment = Payment {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            kind: draft.kind,
            lease_id: draft.lease_id,
            tenant: draft.tenant,
            provider: draft.provider,
            token: draft.token,
            amount: draft.amount,
            status: draft.status,
            tx_hash: confirmation.hash.map(|hash| hash.to_string()),
            created_at: OffsetDateTime::now_utc(),
        };

        if !self.payments.insert_new(payment.id, payment.clone()).await? {
            return Err(StoreError::Backend(format!("payment {} already recorded", payment.id)).into());
        }

        info!(id = payment.id, kind = %payment.kind, "payment recorded");

        Ok(payment)
    }
}

fn ensure_positive(kind: payment::Kind, amount: &Amount) -> Result<(), EscrowError> {
    if amount.is_zero() {
        Err(EscrowError::ZeroAmount(kind))
    } else {
        Ok(())
    }
}
