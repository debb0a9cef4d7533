use std::sync::Arc;

use chain::{ChainAdapter, ChainError, Confirmation, Invocation, TransactionSigner};
use db::{
    amount::Amount,
    order::{self, TrustLevel},
};
use serde::Deserialize;

/// Order specification as stored by the order book.
#[derive(Clone, Debug, Deserialize)]
pub struct LedgerOrderSpec {
    /// JSON-encoded container specification.
    pub spec: String,
    pub trust_levels: Vec<TrustLevel>,
    pub quantity: u32,
    pub max_price: Amount,
}

/// Order as stored by the order book.
#[derive(Clone, Debug, Deserialize)]
pub struct LedgerOrder {
    pub max_price: Amount,
    pub state: order::State,
    pub spec: LedgerOrderSpec,
    pub number_of_blocks: u64,
}

/// Order book contract client.
pub struct OrderBookContract {
    adapter: Arc<ChainAdapter>,
    contract_id: String,
}

impl OrderBookContract {
    pub fn new(adapter: Arc<ChainAdapter>, contract_id: impl Into<String>) -> Self {
        Self {
            adapter,
            contract_id: contract_id.into(),
        }
    }

    fn invocation(&self, method: &str) -> Invocation {
        Invocation::new(&self.contract_id, method)
    }

    /// Create an order, returning its ledger-assigned identifier.
    pub async fn create_order(
        &self,
        signer: &dyn TransactionSigner,
        max_price: &Amount,
        number_of_blocks: u64,
        quantity: u32,
        spec: &str,
        trust_levels: &[TrustLevel],
    ) -> Result<u64, ChainError> {
        let trust_levels = serde_json::to_value(trust_levels)
            .map_err(|err| ChainError::Decode(err.to_string()))?;

        let invocation = self
            .invocation("create_order")
            .arg(max_price.as_str())
            .arg(number_of_blocks)
            .arg(quantity)
            .arg(spec)
            .arg(trust_levels);

        self.adapter.execute_as(signer, invocation).await.decode()
    }

    pub async fn close_order(
        &self,
        signer: &dyn TransactionSigner,
        order_id: u64,
    ) -> Result<Confirmation, ChainError> {
        let invocation = self.invocation("update_order_to_closed").arg(order_id);

        self.adapter.execute_as(signer, invocation).await.into_result()
    }

    pub async fn get_order(&self, order_id: u64) -> Result<LedgerOrder, ChainError> {
        self.adapter
            .execute(self.invocation("get_order").arg(order_id))
            .await
            .decode()
    }

    /// Place a bid, returning its ledger-assigned identifier.
    pub async fn place_bid(
        &self,
        signer: &dyn TransactionSigner,
        order_id: u64,
        provider_id: u64,
        price: &Amount,
    ) -> Result<u64, ChainError> {
        let invocation = self
            .invocation("place_bid")
            .arg(order_id)
            .arg(provider_id)
            .arg(price.as_str());

        self.adapter.execute_as(signer, invocation).await.decode()
    }

    pub async fn accept_bid(
        &self,
        signer: &dyn TransactionSigner,
        bid_id: u64,
    ) -> Result<Confirmation, ChainError> {
        let invocation = self.invocation("accept_bid").arg(bid_id);

        self.adapter.execute_as(signer, invocation).await.into_result()
    }
}
