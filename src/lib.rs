//! Rheo: Unidirectional State Management for Rust
//!
//! `rheo` (ῥέω, Greek for "to flow") is a unidirectional state-management
//! runtime: a single mutable state store updated only through pure
//! reducers, with side effects mediated by a composable middleware
//! pipeline.
//!
//! # Features
//!
//! - **Pure reducers**: state is replaced, never mutated, under a single
//!   writer lock
//! - **Composable middleware**: an interceptor chain with strict LIFO
//!   nesting, short-circuiting and action substitution
//! - **Async lifecycle**: async actions emit processing/result/error/
//!   complete actions through the full pipeline
//! - **Sagas**: named, independently-instantiated state machines with
//!   declarative effects and optional persistence
//! - **Action cache**: memoize a dispatch's downstream effect until an
//!   expiration instant
//! - **Strategy-driven persistence**: every-change, debounced, on-action,
//!   conditional and combined save scheduling with restore-on-startup
//!
//! # Quick Start
//!
//! ```ignore
//! use rheo::prelude::*;
//!
//! #[derive(Debug, Clone)]
//! struct AppState {
//!     counter: i64,
//! }
//!
//! #[derive(Debug)]
//! struct Increment {
//!     value: i64,
//! }
//!
//! impl Action for Increment {
//!     fn as_any(&self) -> &(dyn std::any::Any + Send + Sync) {
//!         self
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::builder(AppState { counter: 0 }, |state, action| {
//!         match action.downcast_ref::<Increment>() {
//!             Some(inc) => AppState {
//!                 counter: state.counter + inc.value,
//!             },
//!             None => state.clone(),
//!         }
//!     })
//!     .build()
//!     .await?;
//!
//!     store.dispatch(Arc::new(Increment { value: 5 })).await?;
//!     assert_eq!(store.state().counter, 5);
//!     store.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! Each module hides a design decision that is likely to change:
//!
//! - [`core`]: action/state model and serialization (hides the encoding)
//! - [`middleware`]: the dispatch chain, caching and the async lifecycle
//! - [`saga`]: the saga registry, instance table and effect execution
//! - [`persist`]: save scheduling strategies and restore-on-startup
//! - [`storage`]: the consumed storage contracts and in-memory backends
//! - [`store`]: the store handle, builder and observable state stream
//! - [`log`]: the consumed leveled log sink with template formatting

pub mod core;
pub mod log;
pub mod middleware;
pub mod persist;
pub mod saga;
pub mod storage;
pub mod store;

// Re-export commonly used types for convenience
pub use crate::core::{
    deserialize_value, hash_state, serialize_value, Action, AnyAction, CoreError, Reducer,
    StateModel,
};

pub use crate::log::{format_template, LogLevel, LogSink, StoreLogger, TracingSink};

pub use crate::middleware::{
    ActionCache, AsyncAction, AsyncComplete, AsyncError, AsyncFailure, AsyncFlowAction,
    AsyncMiddleware, AsyncProcessing, AsyncResult, AsyncValue, CacheableAction, CachedActions,
    CachingMiddleware, DispatchError, FailureHandlingMiddleware, LoggingMiddleware, Middleware,
    Next, TrackingMiddleware,
};

pub use crate::persist::{PersistStrategy, PersistenceMiddleware, RestoreState};

pub use crate::saga::{
    PersistedSagaInstance, SagaDefinition, SagaEffect, SagaEngine, SagaError, SagaInstance,
    SagaMiddleware, SagaPersistMode, SagaState, SagaTransition,
};

pub use crate::storage::{
    InMemorySagaStorage, InMemoryStateStorage, SagaStorage, StateStorage, StorageError,
};

pub use crate::store::{Store, StoreBuilder};

// Re-export dependencies used in public API so hosts don't hit version
// mismatches.
pub use chrono;
pub use serde;
pub use tokio;

/// Prelude module for convenient glob imports
///
/// # Example
///
/// ```ignore
/// use rheo::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{Action, AnyAction, Reducer, StateModel};

    pub use crate::log::{LogLevel, LogSink, StoreLogger};

    pub use crate::middleware::{
        ActionCache, AsyncAction, AsyncFailure, AsyncFlowAction, AsyncValue, CacheableAction,
        CachingMiddleware, DispatchError, FailureHandlingMiddleware, LoggingMiddleware, Middleware,
        Next, TrackingMiddleware,
    };

    pub use crate::persist::PersistStrategy;

    pub use crate::saga::{
        SagaDefinition, SagaEffect, SagaEngine, SagaPersistMode, SagaTransition,
    };

    pub use crate::storage::{
        InMemorySagaStorage, InMemoryStateStorage, SagaStorage, StateStorage,
    };

    pub use crate::store::{Store, StoreBuilder};

    // Re-export commonly used external types
    pub use std::sync::Arc;
}
