//! Orders, bids and providers.
//!
//! Contracts only keep part of the marketplace state: the order book does not
//! remember who created an order and keeps no queryable bid index, while the
//! provider registry stores no connectivity information. The missing parts are
//! persisted locally and merged with ledger data on every read.

mod bids;
mod orders;
mod providers;

use std::sync::Arc;

use async_trait::async_trait;
use chain::{ChainAdapter, ChainError};
use db::{
    bid::{self, Bid},
    order::{self, ContainerSpec, Order},
    provider::{Capacity, Provider},
    MemoryStore, Store, StoreError,
};
use derive_more::{Display, Error, From};

use crate::{
    contracts::{OrderBookContract, ProviderRegistryContract},
    directory::Directory,
};

pub use bids::BidAccepted;
pub use orders::NewOrder;

/// Marketplace errors.
#[derive(Debug, Display, Error, From)]
pub enum MarketError {
    /// Ledger-related error.
    Chain(ChainError),

    /// Store-related error.
    Store(StoreError),

    #[display(fmt = "order {} not found", _0)]
    #[from(ignore)]
    OrderNotFound(#[error(not(source))] u64),

    #[display(fmt = "bid {} not found", _0)]
    #[from(ignore)]
    BidNotFound(#[error(not(source))] u64),

    #[display(fmt = "provider {} not found", _0)]
    #[from(ignore)]
    ProviderNotFound(#[error(not(source))] u64),

    #[display(fmt = "tenant of order {} is unknown", _0)]
    #[from(ignore)]
    UnknownTenant(#[error(not(source))] u64),

    #[display(fmt = "provider with address {} not found", _0)]
    #[from(ignore)]
    UnknownProviderAddress(#[error(not(source))] String),

    #[display(fmt = "order {} is {}", id, state)]
    #[from(ignore)]
    OrderNotActive { id: u64, state: order::State },

    #[display(fmt = "bid {} is {}", id, state)]
    #[from(ignore)]
    BidNotActive { id: u64, state: bid::State },

    /// Container specification can't be encoded or decoded.
    #[display(fmt = "invalid container specification: {}", _0)]
    #[from(ignore)]
    InvalidSpecification(serde_json::Error),
}

/// Locally known part of an order.
#[derive(Clone, Debug)]
pub struct OrderRecord {
    pub id: u64,
    pub tenant: String,
    pub specification: ContainerSpec,
}

/// Locally known part of a provider.
#[derive(Clone, Debug, Default)]
pub struct ProviderProfile {
    pub id: u64,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub capacity: Capacity,
}

/// Marketplace facade over the order book and provider registry contracts.
pub struct Market {
    adapter: Arc<ChainAdapter>,
    order_book: OrderBookContract,
    registry: ProviderRegistryContract,
    orders: Arc<dyn Store<u64, OrderRecord>>,
    bids: Arc<dyn Store<u64, Bid>>,
    profiles: Arc<dyn Store<u64, ProviderProfile>>,
}

impl Market {
    pub fn new(
        adapter: Arc<ChainAdapter>,
        order_book_contract: &str,
        provider_registry_contract: &str,
    ) -> Self {
        Self {
            order_book: OrderBookContract::new(adapter.clone(), order_book_contract),
            registry: ProviderRegistryContract::new(adapter.clone(), provider_registry_contract),
            adapter,
            orders: Arc::new(MemoryStore::new()),
            bids: Arc::new(MemoryStore::new()),
            profiles: Arc::new(MemoryStore::new()),
        }
    }
}

#[async_trait]
impl Directory for Market {
    async fn order(&self, order_id: u64) -> Result<Order, MarketError> {
        self.get_order(order_id).await
    }

    async fn provider(&self, provider_id: u64) -> Result<Provider, MarketError> {
        self.get_provider(provider_id).await
    }
}
