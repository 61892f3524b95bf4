//! Storage contracts for the rheo state-management runtime.
//!
//! The core never implements durable storage itself; it consumes two
//! minimal trait-based contracts:
//!
//! - [`StateStorage`]: persists the single serialized state snapshot
//! - [`SagaStorage`]: persists live saga instances keyed by instance id
//!
//! [`InMemoryStateStorage`] and [`InMemorySagaStorage`] are fast reference
//! implementations for testing and ephemeral stores. Durable backends
//! (files, key-value stores) live in host applications and plug in through
//! the same traits.
//!
//! # Example
//!
//! ```no_run
//! use rheo::storage::{InMemoryStateStorage, StateStorage};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = InMemoryStateStorage::new();
//! storage.save(b"{\"counter\":8}").await?;
//! assert!(storage.exists().await?);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

mod error;
pub mod memory;

pub use error::{Result, StorageError};
pub use memory::{InMemorySagaStorage, InMemoryStateStorage};

use crate::saga::PersistedSagaInstance;

/// Contract for persisting the store's state snapshot.
///
/// Implementations must be thread-safe. Errors propagate to the
/// persistence middleware's configured error handler; they never crash
/// the store.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Persist the serialized state, replacing any prior snapshot.
    async fn save(&self, state: &[u8]) -> Result<()>;

    /// Load the previously saved state, if any.
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Remove any saved state.
    async fn clear(&self) -> Result<()>;

    /// Returns true if a saved state exists.
    async fn exists(&self) -> Result<bool>;
}

/// Contract for persisting live saga instances.
///
/// Instances are keyed by their stable instance id; `all_ids` drives
/// rehydration on store startup.
#[async_trait]
pub trait SagaStorage: Send + Sync {
    /// Returns the ids of all persisted instances.
    async fn all_ids(&self) -> Result<Vec<String>>;

    /// Persist an instance, replacing any prior record with the same id.
    async fn save(&self, id: &str, instance: &PersistedSagaInstance) -> Result<()>;

    /// Load a persisted instance by id.
    async fn load(&self, id: &str) -> Result<Option<PersistedSagaInstance>>;

    /// Remove a persisted instance. Removing an unknown id is not an error.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Remove all persisted instances.
    async fn clear(&self) -> Result<()>;
}

// Allow type-erased storage handles to be used wherever the traits are.
#[async_trait]
impl StateStorage for Box<dyn StateStorage> {
    async fn save(&self, state: &[u8]) -> Result<()> {
        (**self).save(state).await
    }

    async fn load(&self) -> Result<Option<Vec<u8>>> {
        (**self).load().await
    }

    async fn clear(&self) -> Result<()> {
        (**self).clear().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }
}

#[async_trait]
impl SagaStorage for Box<dyn SagaStorage> {
    async fn all_ids(&self) -> Result<Vec<String>> {
        (**self).all_ids().await
    }

    async fn save(&self, id: &str, instance: &PersistedSagaInstance) -> Result<()> {
        (**self).save(id, instance).await
    }

    async fn load(&self, id: &str) -> Result<Option<PersistedSagaInstance>> {
        (**self).load(id).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        (**self).remove(id).await
    }

    async fn clear(&self) -> Result<()> {
        (**self).clear().await
    }
}
