//! Orchestrator state models and their persistence interface.
//!
//! Every entity the orchestrator tracks (leases, deployments, payments and
//! the locally known part of orders, bids and providers) lives behind the
//! [`Store`] trait. [`MemoryStore`] is the only bundled implementation and
//! keeps everything in process memory, so state does not survive restarts.
//!
//! # Concurrency
//!
//! Stores serialize all mutating access internally. Callers must never keep
//! a value checked out across I/O: read a copy, release, perform I/O, then
//! apply the result with [`Store::update`], whose mutation callback may
//! inspect the current value and [`Update::Abort`] if it changed state in
//! the meantime.

pub mod amount;
pub mod bid;
pub mod deployment;
pub mod lease;
pub mod order;
pub mod payment;
pub mod provider;

mod memory;

use async_trait::async_trait;
use derive_more::{Display, Error};

pub use memory::MemoryStore;
pub use time::OffsetDateTime;

/// Errors raised by a [`Store`] backend.
#[derive(Debug, Display, Error)]
pub enum StoreError {
    /// Backend-specific failure.
    #[display(fmt = "store backend error: {}", _0)]
    Backend(#[error(not(source))] String),
}

/// Decision made by a [`Mutation`] after inspecting the current value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Update {
    /// Persist the changes made to the value.
    Commit,

    /// Discard the changes made to the value.
    Abort,
}

/// Result of a [`Store::update`] call.
#[derive(Clone, Debug, PartialEq)]
pub enum Updated<V> {
    /// Changes were persisted, contains the new value.
    Committed(V),

    /// Mutation refused to apply changes, contains the untouched value.
    Aborted(V),

    /// No value is associated with the requested key.
    Missing,
}

/// Compare-and-swap style mutation of a single stored value.
pub type Mutation<'a, V> = Box<dyn FnOnce(&mut V) -> Update + Send + 'a>;

/// Key-value persistence interface.
#[async_trait]
pub trait Store<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Get a copy of the value associated with the provided key.
    async fn get(&self, key: &K) -> Result<Option<V>, StoreError>;

    /// Insert or replace a value, returning the previous one.
    async fn insert(&self, key: K, value: V) -> Result<Option<V>, StoreError>;

    /// Insert a value only if the key is vacant.
    ///
    /// Returns `false` if the key was already taken.
    async fn insert_new(&self, key: K, value: V) -> Result<bool, StoreError>;

    /// Atomically apply a [`Mutation`] to the value under the provided key.
    async fn update(&self, key: &K, mutation: Mutation<'_, V>) -> Result<Updated<V>, StoreError>;

    /// Copy out all stored values, ordered by key.
    async fn values(&self) -> Result<Vec<V>, StoreError>;
}
