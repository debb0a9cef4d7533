use async_trait::async_trait;
use db::{order::Order, provider::Provider};

use crate::market::MarketError;

/// Lookup of orders and providers the orchestrator treats as authoritative.
///
/// Values are fetched on every call and never cached.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn order(&self, order_id: u64) -> Result<Order, MarketError>;

    async fn provider(&self, provider_id: u64) -> Result<Provider, MarketError>;
}
