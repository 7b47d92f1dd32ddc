//! Port-mapping cache storage.

use async_trait::async_trait;
use dashmap::DashMap;
use rallypoint_types::{PortMappingEntry, StoreError};

/// Lookup table mirroring the accelerator's port-mapping set.
///
/// Entries are keyed by backend destination address. Batch writes may report
/// an unprocessed remainder when the backend is capacity-limited; callers
/// retry those. Writes to distinct keys are safe to issue concurrently.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Writes a batch of entries. Returns the subset the store could not
    /// accept this call (capacity throttling); an empty vec means the whole
    /// batch landed.
    async fn write_batch(
        &self,
        batch: &[PortMappingEntry],
    ) -> Result<Vec<PortMappingEntry>, StoreError>;

    /// Looks up the mapping for a backend destination address.
    async fn lookup(
        &self,
        destination_address: &str,
    ) -> Result<Option<PortMappingEntry>, StoreError>;

    /// All destination addresses currently present.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Removes the given destination addresses. Returns how many were
    /// actually present.
    async fn remove(&self, keys: &[String]) -> Result<usize, StoreError>;
}

/// In-memory port-mapping cache.
#[derive(Default)]
pub struct MemoryMappingStore {
    entries: DashMap<String, PortMappingEntry>,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached mappings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MappingStore for MemoryMappingStore {
    async fn write_batch(
        &self,
        batch: &[PortMappingEntry],
    ) -> Result<Vec<PortMappingEntry>, StoreError> {
        for entry in batch {
            self.entries
                .insert(entry.destination_address.clone(), entry.clone());
        }
        Ok(Vec::new())
    }

    async fn lookup(
        &self,
        destination_address: &str,
    ) -> Result<Option<PortMappingEntry>, StoreError> {
        Ok(self
            .entries
            .get(destination_address)
            .map(|entry| entry.value().clone()))
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }

    async fn remove(&self, keys: &[String]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
