use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{Mutation, Store, StoreError, Update, Updated};

/// [`Store`] implementation backed by an in-process map.
pub struct MemoryStore<K, V> {
    entries: Mutex<BTreeMap<K, V>>,
}

impl<K, V> MemoryStore<K, V> {
    /// Create new empty [`MemoryStore`].
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<K, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Store<K, V> for MemoryStore<K, V>
where
    K: Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn insert(&self, key: K, value: V) -> Result<Option<V>, StoreError> {
        Ok(self.entries.lock().await.insert(key, value))
    }

    async fn insert_new(&self, key: K, value: V) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;

        if entries.contains_key(&key) {
            return Ok(false);
        }

        entries.insert(key, value);
        Ok(true)
    }

    async fn update(&self, key: &K, mutation: Mutation<'_, V>) -> Result<Updated<V>, StoreError> {
        let mut entries = self.entries.lock().await;

        let Some(current) = entries.get_mut(key) else {
            return Ok(Updated::Missing);
        };

        // Mutate a copy, so that an aborted mutation leaves no trace.
        let mut candidate = current.clone();

        match mutation(&mut candidate) {
            Update::Commit => {
                *current = candidate.clone();
                Ok(Updated::Committed(candidate))
            }
            Update::Abort => Ok(Updated::Aborted(current.clone())),
        }
    }

    async fn values(&self) -> Result<Vec<V>, StoreError> {
        Ok(self.entries.lock().await.values().cloned().collect())
    }
}
