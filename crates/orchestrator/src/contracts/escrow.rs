use std::sync::Arc;

use chain::{ChainAdapter, ChainError, Confirmation, Invocation, TransactionSigner};
use db::amount::Amount;
use serde::{Deserialize, Serialize};

/// Tenant escrow balance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TenantBalance {
    pub locked_balance: Amount,
    pub unlocked_balance: Amount,
}

/// Provider earnings balance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderEarnings {
    pub earned: Amount,
    pub withdrawn: Amount,
    pub balance: Amount,
}

/// Escrow contract client.
pub struct EscrowContract {
    adapter: Arc<ChainAdapter>,
    contract_id: String,
}

impl EscrowContract {
    pub fn new(adapter: Arc<ChainAdapter>, contract_id: impl Into<String>) -> Self {
        Self {
            adapter,
            contract_id: contract_id.into(),
        }
    }

    fn invocation(&self, method: &str) -> Invocation {
        Invocation::new(&self.contract_id, method)
    }

    pub async fn deposit(
        &self,
        signer: &dyn TransactionSigner,
        token: &str,
        from: &str,
        amount: &Amount,
    ) -> Result<Confirmation, ChainError> {
        let invocation = self
            .invocation("deposit")
            .arg(token)
            .arg(from)
            .arg(amount.as_str());

        self.adapter.execute_as(signer, invocation).await.into_result()
    }

    pub async fn withdraw(
        &self,
        signer: &dyn TransactionSigner,
        token: &str,
        to: &str,
        amount: &Amount,
    ) -> Result<Confirmation, ChainError> {
        let invocation = self
            .invocation("withdraw")
            .arg(token)
            .arg(to)
            .arg(amount.as_str());

        self.adapter.execute_as(signer, invocation).await.into_result()
    }

    pub async fn lock(
        &self,
        signer: &dyn TransactionSigner,
        token: &str,
        from: &str,
        amount: &Amount,
    ) -> Result<Confirmation, ChainError> {
        let invocation = self
            .invocation("lock")
            .arg(token)
            .arg(from)
            .arg(amount.as_str());

        self.adapter.execute_as(signer, invocation).await.into_result()
    }

    pub async fn unlock(
        &self,
        signer: &dyn TransactionSigner,
        token: &str,
        from: &str,
        amount: &Amount,
    ) -> Result<Confirmation, ChainError> {
        let invocation = self
            .invocation("unlock_tokens")
            .arg(token)
            .arg(from)
            .arg(amount.as_str());

        self.adapter.execute_as(signer, invocation).await.into_result()
    }

    pub async fn transfer_locked(
        &self,
        signer: &dyn TransactionSigner,
        token: &str,
        from: &str,
        amount: &Amount,
        provider_id: u64,
    ) -> Result<Confirmation, ChainError> {
        let invocation = self
            .invocation("transfer_locked")
            .arg(token)
            .arg(from)
            .arg(amount.as_str())
            .arg(provider_id);

        self.adapter.execute_as(signer, invocation).await.into_result()
    }

    /// Withdraw provider earnings, returning the withdrawn amount if the contract reports it.
    pub async fn withdraw_provider_earnings(
        &self,
        signer: &dyn TransactionSigner,
        from: &str,
        token: &str,
    ) -> Result<(Confirmation, Option<Amount>), ChainError> {
        let invocation = self
            .invocation("withdraw_provider_earnings")
            .arg(from)
            .arg(token);

        let confirmation = self
            .adapter
            .execute_as(signer, invocation)
            .await
            .into_result()?;

        let amount = confirmation
            .value
            .clone()
            .and_then(|value| serde_json::from_value::<Amount>(value).ok());

        Ok((confirmation, amount))
    }

    pub async fn tenant_balance(&self, token: &str, tenant: &str) -> Result<TenantBalance, ChainError> {
        let invocation = self.invocation("get_tenant_balance").arg(token).arg(tenant);

        self.adapter.execute(invocation).await.decode()
    }

    pub async fn provider_earnings(
        &self,
        provider_id: u64,
        token: &str,
    ) -> Result<ProviderEarnings, ChainError> {
        let invocation = self
            .invocation("get_provider_earnings")
            .arg(provider_id)
            .arg(token);

        self.adapter.execute(invocation).await.decode()
    }
}
