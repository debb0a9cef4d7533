//! # Lease and deployment orchestrator
//!
//! Turns accepted bids into running workload containers and keeps them alive.
//!
//! # Components
//!
//! - [`market`] publishes orders, bids and providers through ledger contracts;
//! - [`escrow`] moves tenant and provider funds, logging every confirmed payment;
//! - [`lease`] drives the lease lifecycle from creation to completion or cancellation;
//! - [`deployment`] runs lease containers and supervises their health.
//!
//! All ledger calls go through the [`chain`] adapter, all container calls
//! go through the [`ContainerRuntime`] trait.
//!
//! [`ContainerRuntime`]: runtime::ContainerRuntime

pub mod app;
pub mod contracts;
pub mod deployment;
pub mod directory;
pub mod escrow;
pub mod lease;
pub mod market;
pub mod runtime;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod tests;
