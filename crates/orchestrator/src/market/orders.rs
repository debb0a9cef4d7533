use chain::{ChainError, TransactionSigner};
use db::{
    amount::Amount,
    order::{self, ContainerSpec, Order, TrustLevel},
};
use futures_util::future::try_join_all;
use tracing::{info, instrument};

use super::{Market, MarketError, OrderRecord};

/// Order creation request.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub max_price: Amount,
    pub specification: ContainerSpec,
    pub trust_levels: Vec<TrustLevel>,
    pub quantity: u32,
    pub duration_blocks: u64,
}

impl Market {
    /// Publish a new order on the order book on behalf of the signer.
    #[instrument(skip_all, err)]
    pub async fn create_order(
        &self,
        signer: &dyn TransactionSigner,
        request: NewOrder,
    ) -> Result<Order, MarketError> {
        let spec =
            serde_json::to_string(&request.specification).map_err(MarketError::InvalidSpecification)?;

        let id = self
            .order_book
            .create_order(
                signer,
                &request.max_price,
                request.duration_blocks,
                request.quantity,
                &spec,
                &request.trust_levels,
            )
            .await?;

        self.orders
            .insert(
                id,
                OrderRecord {
                    id,
                    tenant: signer.address().to_string(),
                    specification: request.specification.clone(),
                },
            )
            .await?;

        info!(order_id = id, "order created");

        Ok(Order {
            id,
            tenant: Some(signer.address().to_string()),
            max_price: request.max_price,
            duration_blocks: request.duration_blocks,
            quantity: request.quantity,
            trust_levels: request.trust_levels,
            specification: request.specification,
            state: order::State::Active,
        })
    }

    pub async fn close_order(
        &self,
        signer: &dyn TransactionSigner,
        order_id: u64,
    ) -> Result<(), MarketError> {
        self.order_book.close_order(signer, order_id).await?;
        info!(order_id, "order closed");
        Ok(())
    }

    /// Get order details from the ledger, enriched with local records.
    pub async fn get_order(&self, order_id: u64) -> Result<Order, MarketError> {
        let ledger = match self.order_book.get_order(order_id).await {
            Err(ChainError::Simulation { .. }) => return Err(MarketError::OrderNotFound(order_id)),
            result => result?,
        };

        let record = self.orders.get(&order_id).await?;

        let specification = match &record {
            Some(record) => record.specification.clone(),
            None => serde_json::from_str(&ledger.spec.spec)
                .map_err(MarketError::InvalidSpecification)?,
        };

        Ok(Order {
            id: order_id,
            tenant: record.map(|record| record.tenant),
            max_price: ledger.max_price,
            duration_blocks: ledger.number_of_blocks,
            quantity: ledger.spec.quantity,
            trust_levels: ledger.spec.trust_levels,
            specification,
            state: ledger.state,
        })
    }

    /// List all orders created through this orchestrator.
    pub async fn list_orders(&self) -> Result<Vec<Order>, MarketError> {
        let records = self.orders.values().await?;

        try_join_all(records.iter().map(|record| self.get_order(record.id))).await
    }
}
