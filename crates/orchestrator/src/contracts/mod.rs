//! Typed clients of the marketplace smart contracts.
//!
//! Each client only knows the method names and argument order of its
//! contract. Finality handling is left to [`chain::ChainAdapter`].

pub mod escrow;
pub mod order_book;
pub mod provider_registry;

pub use escrow::EscrowContract;
pub use order_book::OrderBookContract;
pub use provider_registry::ProviderRegistryContract;
