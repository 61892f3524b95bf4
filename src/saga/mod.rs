//! Saga engine: named, independently-instantiated state machines reacting
//! to dispatched actions with side-effecting transitions.
//!
//! # Domain Model
//! - [`SagaDefinition`]: immutable description of a state machine,
//!   registered at store-configuration time
//! - [`SagaInstance`]: a live execution with a stable id and opaque state
//! - [`SagaTransition`]: `Continue` (new state + effects) or `Complete`
//!   (effects, instance removed)
//! - [`SagaEffect`]: declarative `Dispatch` / `Delay` / `StartSaga`
//!   instructions, executed strictly in list order by the engine
//!
//! # Concurrency
//! Each dispatched action's saga processing runs in its own store-scoped
//! task. Handler selection and instance mutation are synchronized by a
//! single mutex around the instance table; effect execution happens after
//! the lock is released, one task per transition, so a `Delay` in one
//! saga's effects never stalls siblings or the main dispatch loop. A
//! handler failure is logged and isolated from other sagas.
//!
//! Sagas interact only by dispatching actions that other sagas' handlers
//! may match; there are no direct references between instances.

use crate::storage::StorageError;
use std::time::Duration;
use thiserror::Error;

mod definition;
mod effect;
mod engine;
mod instance;

pub use definition::SagaDefinition;
pub use effect::{SagaEffect, SagaState, SagaTransition};
pub use engine::{SagaEngine, SagaMiddleware};
pub use instance::{PersistedSagaInstance, SagaInstance};

/// Saga layer error type for the rheo state-management runtime.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SagaError {
    /// A saga handler failed with the given reason.
    #[error("saga handler failed: {0}")]
    Handler(String),

    /// A persisted instance references a definition that is not
    /// registered.
    #[error("unknown saga definition: {0}")]
    UnknownDefinition(String),

    /// A storage operation failed.
    #[error("storage error")]
    Storage(#[from] StorageError),

    /// A core serialization or deserialization error occurred.
    #[error("core error")]
    Core(#[from] crate::core::CoreError),
}

pub type Result<T> = std::result::Result<T, SagaError>;

/// When the engine persists saga instances.
///
/// `OnCheckpoint` persists only on an explicit
/// [`SagaEngine::checkpoint`] call; there is no implicit trigger.
/// `OnCompletion` keeps no intermediate snapshots; completion always
/// removes the instance from the backend regardless of mode. `Combined`
/// saves when any member mode would, with an immediate member taking
/// precedence over a debounced one.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SagaPersistMode {
    OnEveryChange,
    Debounced(Duration),
    OnCheckpoint,
    OnCompletion,
    Combined(Vec<SagaPersistMode>),
}

impl SagaPersistMode {
    /// True when a create/update should be written out immediately.
    pub(crate) fn wants_immediate(&self) -> bool {
        match self {
            SagaPersistMode::OnEveryChange => true,
            SagaPersistMode::Combined(modes) => modes.iter().any(SagaPersistMode::wants_immediate),
            _ => false,
        }
    }

    /// Debounce delay for a create/update, when no immediate member fires.
    pub(crate) fn debounce_delay(&self) -> Option<Duration> {
        match self {
            SagaPersistMode::Debounced(delay) => Some(*delay),
            SagaPersistMode::Combined(modes) => {
                modes.iter().find_map(SagaPersistMode::debounce_delay)
            }
            _ => None,
        }
    }
}
