use chain::{ChainError, TransactionSigner};
use db::{
    order::TrustLevel,
    provider::{self, Provider},
    Update, Updated,
};
use futures_util::future::try_join_all;
use tracing::{info, instrument};

use super::{Market, MarketError, ProviderProfile};
use crate::contracts::provider_registry::LedgerProvider;

impl Market {
    /// Register the signer's account as a provider.
    ///
    /// The `id` field of the provided profile is ignored.
    #[instrument(skip_all, err)]
    pub async fn register_provider(
        &self,
        signer: &dyn TransactionSigner,
        profile: ProviderProfile,
    ) -> Result<Provider, MarketError> {
        let id = self.registry.add_provider(signer).await?;

        self.profiles
            .insert(id, ProviderProfile { id, ..profile })
            .await?;

        info!(provider_id = id, address = %signer.address(), "provider registered");

        self.get_provider(id).await
    }

    pub async fn update_provider_status(
        &self,
        signer: &dyn TransactionSigner,
        provider_id: u64,
        status: provider::Status,
    ) -> Result<Provider, MarketError> {
        self.registry
            .set_provider_status(signer, provider_id, status)
            .await?;

        self.get_provider(provider_id).await
    }

    pub async fn update_provider_trust_level(
        &self,
        signer: &dyn TransactionSigner,
        provider_id: u64,
        level: TrustLevel,
    ) -> Result<Provider, MarketError> {
        self.registry
            .set_trust_level(signer, provider_id, level)
            .await?;

        self.get_provider(provider_id).await
    }

    /// Replace connectivity and capacity information of a provider.
    pub async fn update_provider_profile(
        &self,
        provider_id: u64,
        profile: ProviderProfile,
    ) -> Result<Provider, MarketError> {
        let profile = ProviderProfile {
            id: provider_id,
            ..profile
        };

        match self
            .profiles
            .update(
                &provider_id,
                Box::new(move |current| {
                    *current = profile;
                    Update::Commit
                }),
            )
            .await?
        {
            Updated::Missing => Err(MarketError::ProviderNotFound(provider_id)),
            _ => self.get_provider(provider_id).await,
        }
    }

    /// Get provider details from the registry, enriched with local records.
    pub async fn get_provider(&self, provider_id: u64) -> Result<Provider, MarketError> {
        let ledger = match self.registry.get_provider(provider_id).await {
            Err(ChainError::Simulation { .. }) => {
                return Err(MarketError::ProviderNotFound(provider_id))
            }
            result => result?,
        };

        self.merge_provider(provider_id, ledger).await
    }

    pub async fn get_provider_by_address(&self, address: &str) -> Result<Provider, MarketError> {
        let (id, ledger) = match self.registry.get_provider_by_address(address).await {
            Err(ChainError::Simulation { .. }) => {
                return Err(MarketError::UnknownProviderAddress(address.to_string()))
            }
            result => result?,
        };

        self.merge_provider(id, ledger).await
    }

    /// List all providers registered through this orchestrator.
    pub async fn list_providers(&self) -> Result<Vec<Provider>, MarketError> {
        let profiles = self.profiles.values().await?;

        try_join_all(profiles.iter().map(|profile| self.get_provider(profile.id))).await
    }

    async fn merge_provider(
        &self,
        id: u64,
        ledger: LedgerProvider,
    ) -> Result<Provider, MarketError> {
        let profile = self.profiles.get(&id).await?.unwrap_or_default();

        Ok(Provider {
            id,
            address: ledger.address,
            trust_level: ledger.trust_level,
            status: ledger.status,
            hostname: profile.hostname,
            port: profile.port,
            capacity: profile.capacity,
        })
    }
}
