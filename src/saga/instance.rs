use super::effect::SagaState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A live execution of a saga definition.
///
/// Owned exclusively by the engine's instance table: created on a matching
/// start trigger, mutated on each matching transition, destroyed on a
/// `Complete` transition.
pub struct SagaInstance {
    id: String,
    name: String,
    pub(crate) state: SagaState,
    created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl SagaInstance {
    /// Creates a new instance with a fresh id.
    pub fn new(name: &str, state: SagaState) -> Self {
        let now = Utc::now();
        Self {
            id: new_instance_id(name, now),
            name: name.to_string(),
            state,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn rehydrated(
        id: String,
        name: String,
        state: SagaState,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            state,
            created_at,
            updated_at,
        }
    }

    /// Stable instance id, `{name}-{timestamp}-{random}`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the saga definition this instance runs.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Downcasts the current saga state to a concrete type.
    pub fn state<T: 'static>(&self) -> Option<&T> {
        self.state.downcast_ref::<T>()
    }
}

impl fmt::Debug for SagaInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaInstance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

fn new_instance_id(name: &str, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", name, now.timestamp_millis(), &suffix[..8])
}

/// Serialized form of a saga instance for the storage contract.
///
/// The `state` bytes are produced by the definition's registered codec;
/// rehydration looks the definition up by `name` to decode them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSagaInstance {
    pub id: String,
    pub name: String,
    pub state: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
