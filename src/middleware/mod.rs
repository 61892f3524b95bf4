//! The dispatch pipeline: composable middleware around the reducer.
//!
//! A dispatch runs the configured middleware in declared order, each
//! wrapping the rest of the chain through its [`Next`] continuation, with
//! the reducer as the terminal stage. "Before" code therefore executes
//! outer-to-inner and "after" code inner-to-outer, strict LIFO nesting,
//! like a classic interceptor chain.
//!
//! A middleware chooses whether and when to call `next`: it may skip it
//! (short-circuiting the reducer), call it more than once, or call it with
//! a different action (substitution). Side effects such as additional
//! dispatches are independent asynchronous events, not part of the current
//! chain's return value; they go through [`Store::dispatch_background`].
//!
//! [`Store::dispatch_background`]: crate::store::Store::dispatch_background

use crate::core::{AnyAction, StateModel};
use crate::store::Store;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::error;

pub mod cache;
pub mod lifecycle;

pub use cache::{ActionCache, CacheableAction, CachedActions, CachingMiddleware};
pub use lifecycle::{
    AsyncAction, AsyncComplete, AsyncError, AsyncFailure, AsyncFlowAction, AsyncMiddleware,
    AsyncProcessing, AsyncResult, AsyncValue,
};

/// Dispatch layer error type for the rheo state-management runtime.
///
/// Middleware failures are values, not panics: a failing middleware
/// returns an error that propagates outward through the chain unless a
/// [`FailureHandlingMiddleware`] positioned earlier intercepts it. An
/// unintercepted error is fatal to that one dispatch only; the reducer
/// runs last, so shared state is never left half-updated.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// A middleware failed with the given reason.
    #[error("dispatch failed: {0}")]
    Failed(String),

    /// A storage operation failed inside the pipeline.
    #[error("storage error")]
    Storage(#[from] crate::storage::StorageError),

    /// A core serialization or deserialization error occurred.
    #[error("core error")]
    Core(#[from] crate::core::CoreError),

    /// The caching middleware was asked to cache a result that is itself
    /// cacheable. This is a configuration bug: the caching middleware must
    /// not wrap a transformation whose output is again cacheable.
    #[error("refusing to cache a cacheable result: {action}")]
    RecursiveCache { action: String },

    /// The store has been closed; no further dispatches are accepted.
    #[error("store is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// An interceptor in the dispatch chain.
///
/// `handle` receives the store (for state reads and background
/// re-dispatch), the current action, and the continuation for the rest of
/// the chain.
#[async_trait]
pub trait Middleware<S: StateModel>: Send + Sync {
    async fn handle(
        &self,
        store: &Store<S>,
        action: AnyAction,
        next: Next<'_, S>,
    ) -> Result<AnyAction>;
}

/// Continuation over the remaining middleware chain.
///
/// `Next` is `Copy`, so a middleware may invoke the downstream chain more
/// than once (or not at all). The empty continuation applies the reducer
/// under the store's state lock and publishes the new state.
pub struct Next<'a, S: StateModel> {
    store: &'a Store<S>,
    chain: &'a [Arc<dyn Middleware<S>>],
}

impl<S: StateModel> Clone for Next<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: StateModel> Copy for Next<'_, S> {}

impl<'a, S: StateModel> Next<'a, S> {
    pub(crate) fn new(store: &'a Store<S>, chain: &'a [Arc<dyn Middleware<S>>]) -> Self {
        Self { store, chain }
    }

    /// Forwards the action to the rest of the chain.
    pub async fn run(self, action: AnyAction) -> Result<AnyAction> {
        match self.chain.split_first() {
            Some((mw, rest)) => {
                mw.handle(self.store, action, Next::new(self.store, rest))
                    .await
            }
            None => self.store.apply(action).await,
        }
    }
}

/// Outer middleware that contains failures from the rest of the chain.
///
/// On an error from `next`, it logs the failure and returns the original
/// action, keeping the dispatch loop alive. Position it before (outer
/// than) the middleware it should guard.
#[derive(Debug, Default)]
pub struct FailureHandlingMiddleware;

impl FailureHandlingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: StateModel> Middleware<S> for FailureHandlingMiddleware {
    async fn handle(
        &self,
        store: &Store<S>,
        action: AnyAction,
        next: Next<'_, S>,
    ) -> Result<AnyAction> {
        match next.run(action.clone()).await {
            Ok(out) => Ok(out),
            Err(e) => {
                error!(action = ?action, error = %e, "dispatch failed; continuing");
                store
                    .logger()
                    .error("dispatch of {action} failed: {error}", &[&format!("{action:?}"), &e]);
                Ok(action)
            }
        }
    }
}

/// Logs every action passing through the chain at debug level.
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: StateModel> Middleware<S> for LoggingMiddleware {
    async fn handle(
        &self,
        store: &Store<S>,
        action: AnyAction,
        next: Next<'_, S>,
    ) -> Result<AnyAction> {
        store
            .logger()
            .debug("dispatching {action}", &[&format!("{action:?}")]);
        let out = next.run(action).await?;
        store
            .logger()
            .debug("dispatched {action}", &[&format!("{out:?}")]);
        Ok(out)
    }
}

/// Records every action it sees, in dispatch order.
///
/// Diagnostic support: useful in tests and for action-timeline debugging.
#[derive(Debug, Default)]
pub struct TrackingMiddleware {
    seen: Mutex<Vec<AnyAction>>,
}

impl TrackingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded actions in the order they were dispatched.
    pub fn recorded(&self) -> Vec<AnyAction> {
        self.seen.lock().expect("tracking lock poisoned").clone()
    }

    /// Recorded actions of a concrete type, in dispatch order.
    pub fn recorded_of<T: crate::core::Action + Clone>(&self) -> Vec<T> {
        self.recorded()
            .iter()
            .filter_map(|a| a.downcast_ref::<T>().cloned())
            .collect()
    }
}

#[async_trait]
impl<S: StateModel> Middleware<S> for TrackingMiddleware {
    async fn handle(
        &self,
        _store: &Store<S>,
        action: AnyAction,
        next: Next<'_, S>,
    ) -> Result<AnyAction> {
        self.seen
            .lock()
            .expect("tracking lock poisoned")
            .push(action.clone());
        next.run(action).await
    }
}
