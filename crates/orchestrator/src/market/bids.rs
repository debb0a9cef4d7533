use chain::TransactionSigner;
use db::{
    amount::Amount,
    bid::{self, Bid},
    order, OffsetDateTime, Update, Updated,
};
use tracing::{info, instrument, warn};

use super::{Market, MarketError};

/// Bid acceptance event, consumed by the lease state machine.
#[derive(Clone, Debug, PartialEq)]
pub struct BidAccepted {
    pub bid_id: u64,
    pub order_id: u64,
    pub provider_id: u64,

    /// Address of the tenant who created the order.
    pub tenant: String,

    pub start_block: u64,
    pub end_block: u64,
}

impl Market {
    /// Place a bid on an active order.
    #[instrument(skip(self, signer, price), err)]
    pub async fn place_bid(
        &self,
        signer: &dyn TransactionSigner,
        order_id: u64,
        provider_id: u64,
        price: Amount,
    ) -> Result<Bid, MarketError> {
        let order = self.get_order(order_id).await?;

        if order.state != order::State::Active {
            return Err(MarketError::OrderNotActive {
                id: order_id,
                state: order.state,
            });
        }

        let id = self
            .order_book
            .place_bid(signer, order_id, provider_id, &price)
            .await?;

        let bid = Bid {
            id,
            order_id,
            provider_id,
            price,
            state: bid::State::Active,
            created_at: OffsetDateTime::now_utc(),
        };

        self.bids.insert(id, bid.clone()).await?;

        info!(bid_id = id, "bid placed");

        Ok(bid)
    }

    /// Accept a bid, fixing the lease block range from the latest ledger.
    ///
    /// The bid is claimed locally before the ledger call and released only
    /// if the ledger definitely did not apply it.
    #[instrument(skip(self, signer), err)]
    pub async fn accept_bid(
        &self,
        signer: &dyn TransactionSigner,
        bid_id: u64,
    ) -> Result<BidAccepted, MarketError> {
        let bid = self.bid(bid_id).await?;

        if bid.state != bid::State::Active {
            return Err(MarketError::BidNotActive {
                id: bid_id,
                state: bid.state,
            });
        }

        let order = self.get_order(bid.order_id).await?;

        if order.state != order::State::Active {
            return Err(MarketError::OrderNotActive {
                id: order.id,
                state: order.state,
            });
        }

        let tenant = order.tenant.ok_or(MarketError::UnknownTenant(order.id))?;

        let start_block = self.adapter.latest_ledger().await?;
        let end_block = start_block.saturating_add(order.duration_blocks);

        self.transition_bid(bid_id, bid::State::Active, bid::State::Matched)
            .await?;

        if let Err(err) = self.order_book.accept_bid(signer, bid_id).await {
            if err.is_indeterminate() {
                warn!(bid_id, %err, "bid acceptance is unconfirmed, keeping the claim");
            } else if let Err(release) = self
                .transition_bid(bid_id, bid::State::Matched, bid::State::Active)
                .await
            {
                warn!(bid_id, %release, "unable to release bid");
            }

            return Err(err.into());
        }

        info!(bid_id, order_id = bid.order_id, "bid accepted");

        Ok(BidAccepted {
            bid_id,
            order_id: bid.order_id,
            provider_id: bid.provider_id,
            tenant,
            start_block,
            end_block,
        })
    }

    pub async fn bid(&self, bid_id: u64) -> Result<Bid, MarketError> {
        self.bids
            .get(&bid_id)
            .await?
            .ok_or(MarketError::BidNotFound(bid_id))
    }

    pub async fn bids_for_order(&self, order_id: u64) -> Result<Vec<Bid>, MarketError> {
        Ok(self
            .bids
            .values()
            .await?
            .into_iter()
            .filter(|bid| bid.order_id == order_id)
            .collect())
    }

    /// Move a bid from one state to another, unless it already left `from`.
    async fn transition_bid(
        &self,
        bid_id: u64,
        from: bid::State,
        to: bid::State,
    ) -> Result<Bid, MarketError> {
        let updated = self
            .bids
            .update(
                &bid_id,
                Box::new(move |bid| {
                    if bid.state != from {
                        return Update::Abort;
                    }

                    bid.state = to;
                    Update::Commit
                }),
            )
            .await?;

        match updated {
            Updated::Committed(bid) => Ok(bid),
            Updated::Aborted(bid) => Err(MarketError::BidNotActive {
                id: bid_id,
                state: bid.state,
            }),
            Updated::Missing => Err(MarketError::BidNotFound(bid_id)),
        }
    }
}
