//! Connection-record storage.

use async_trait::async_trait;
use dashmap::DashMap;
use rallypoint_types::{current_timestamp, ConnectionRecord, ConnectionStatus, StoreError};

/// Key/value store for connection records.
///
/// Writers (the match router) use `put`; the polling path uses `resolve`,
/// which performs the one-time `Matching` → `Complete` transition
/// atomically with the read. Expired records are the store's problem: a
/// record past its expiry must never be returned.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Writes one record, replacing any previous record under the same key.
    async fn put(&self, record: ConnectionRecord) -> Result<(), StoreError>;

    /// Reads a record without touching its status.
    async fn get(&self, key: &str) -> Result<Option<ConnectionRecord>, StoreError>;

    /// Reads a record for delivery to a poller. A `Matching` record is
    /// transitioned to `Complete` in the same operation; an absent or
    /// expired record yields `None`.
    async fn resolve(&self, key: &str) -> Result<Option<ConnectionRecord>, StoreError>;
}

/// In-memory connection store.
///
/// Expiry is enforced on read: a lookup that finds an expired record drops
/// it and reports the key absent, standing in for the native TTL mechanism
/// of a durable backend.
#[derive(Default)]
pub struct MemoryConnectionStore {
    records: DashMap<String, ConnectionRecord>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, key: &str) -> Option<ConnectionRecord> {
        let now = current_timestamp();
        let snapshot = self.records.get(key).map(|entry| entry.value().clone());
        match snapshot {
            Some(record) if record.is_expired(now) => {
                self.records.remove_if(key, |_, r| r.is_expired(now));
                None
            }
            other => other,
        }
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn put(&self, record: ConnectionRecord) -> Result<(), StoreError> {
        self.records.insert(record.key.clone(), record);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<ConnectionRecord>, StoreError> {
        Ok(self.live(key))
    }

    async fn resolve(&self, key: &str) -> Result<Option<ConnectionRecord>, StoreError> {
        let now = current_timestamp();
        let resolved = self.records.get_mut(key).and_then(|mut entry| {
            if entry.is_expired(now) {
                return None;
            }
            if entry.status == ConnectionStatus::Matching {
                entry.status = ConnectionStatus::Complete;
            }
            Some(entry.value().clone())
        });
        if resolved.is_none() {
            self.records.remove_if(key, |_, record| record.is_expired(now));
        }
        Ok(resolved)
    }
}
