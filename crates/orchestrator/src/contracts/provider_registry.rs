use std::sync::Arc;

use chain::{ChainAdapter, ChainError, Confirmation, Invocation, TransactionSigner};
use db::{order::TrustLevel, provider};
use serde::Deserialize;

/// Provider as stored by the registry.
#[derive(Clone, Debug, Deserialize)]
pub struct LedgerProvider {
    pub address: String,
    pub trust_level: TrustLevel,
    pub status: provider::Status,
}

/// Provider registry contract client.
pub struct ProviderRegistryContract {
    adapter: Arc<ChainAdapter>,
    contract_id: String,
}

impl ProviderRegistryContract {
    pub fn new(adapter: Arc<ChainAdapter>, contract_id: impl Into<String>) -> Self {
        Self {
            adapter,
            contract_id: contract_id.into(),
        }
    }

    fn invocation(&self, method: &str) -> Invocation {
        Invocation::new(&self.contract_id, method)
    }

    /// Register the signer's account, returning the new provider identifier.
    pub async fn add_provider(&self, signer: &dyn TransactionSigner) -> Result<u64, ChainError> {
        let invocation = self.invocation("add_provider").arg(signer.address());

        self.adapter.execute_as(signer, invocation).await.decode()
    }

    pub async fn set_trust_level(
        &self,
        signer: &dyn TransactionSigner,
        provider_id: u64,
        level: TrustLevel,
    ) -> Result<Confirmation, ChainError> {
        let invocation = self
            .invocation("set_trust_level")
            .arg(signer.address())
            .arg(provider_id)
            .arg(level.to_string());

        self.adapter.execute_as(signer, invocation).await.into_result()
    }

    pub async fn set_provider_status(
        &self,
        signer: &dyn TransactionSigner,
        provider_id: u64,
        status: provider::Status,
    ) -> Result<Confirmation, ChainError> {
        let status =
            serde_json::to_value(status).map_err(|err| ChainError::Decode(err.to_string()))?;

        let invocation = self
            .invocation("set_provider_status")
            .arg(signer.address())
            .arg(provider_id)
            .arg(status);

        self.adapter.execute_as(signer, invocation).await.into_result()
    }

    pub async fn get_provider(&self, provider_id: u64) -> Result<LedgerProvider, ChainError> {
        self.adapter
            .execute(self.invocation("get_provider").arg(provider_id))
            .await
            .decode()
    }

    pub async fn get_provider_by_address(
        &self,
        address: &str,
    ) -> Result<(u64, LedgerProvider), ChainError> {
        self.adapter
            .execute(self.invocation("get_provider_by_address").arg(address))
            .await
            .decode()
    }
}
