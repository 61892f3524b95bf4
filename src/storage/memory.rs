use super::{Result, SagaStorage, StateStorage};
use crate::saga::PersistedSagaInstance;
use async_trait::async_trait;
use std::sync::RwLock;

/// In-memory state storage holding a single serialized snapshot.
///
/// Suitable for tests and ephemeral stores. The snapshot slot is guarded
/// by a `std::sync::RwLock`; none of the operations await while holding
/// the lock.
#[derive(Debug, Default)]
pub struct InMemoryStateStorage {
    snapshot: RwLock<Option<Vec<u8>>>,
}

impl InMemoryStateStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStorage for InMemoryStateStorage {
    async fn save(&self, state: &[u8]) -> Result<()> {
        *self.snapshot.write().expect("snapshot lock poisoned") = Some(state.to_vec());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.snapshot.read().expect("snapshot lock poisoned").clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.snapshot.write().expect("snapshot lock poisoned") = None;
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.snapshot.read().expect("snapshot lock poisoned").is_some())
    }
}

/// In-memory saga storage using DashMap for concurrent access.
///
/// DashMap provides concurrent access through sharding, so saves from
/// concurrently running saga tasks never contend on a single mutex.
///
/// Reference: https://github.com/xacrimon/dashmap
#[derive(Debug, Default)]
pub struct InMemorySagaStorage {
    instances: dashmap::DashMap<String, PersistedSagaInstance>,
}

impl InMemorySagaStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[async_trait]
impl SagaStorage for InMemorySagaStorage {
    async fn all_ids(&self) -> Result<Vec<String>> {
        Ok(self.instances.iter().map(|e| e.key().clone()).collect())
    }

    async fn save(&self, id: &str, instance: &PersistedSagaInstance) -> Result<()> {
        self.instances.insert(id.to_string(), instance.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<PersistedSagaInstance>> {
        Ok(self.instances.get(id).map(|e| e.value().clone()))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.instances.remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.instances.clear();
        Ok(())
    }
}
