//! Asynchronous action lifecycle engine.
//!
//! An [`AsyncAction`] wraps a deferred computation producing a
//! `Result<AsyncValue, AsyncFailure>`. The [`AsyncMiddleware`] drives each
//! one through the state machine
//!
//! ```text
//! Dispatched -> Processing -> { Result | Error } -> Complete
//! ```
//!
//! Every lifecycle action is dispatched through the full store pipeline
//! (not handed to the local reducer), so other middleware and sagas
//! observe it. Lifecycle actions carry an owned back-reference to the
//! initiating action; actions are immutable and short-lived, so this is a
//! plain non-cyclic value copy.
//!
//! Contract: `execute` must capture its own failures into `Err`. An
//! implementation that panics instead of returning a failure escapes the
//! lifecycle contract; the engine does not catch panics.

use super::{Middleware, Next, Result};
use crate::core::{Action, AnyAction, StateModel};
use crate::store::Store;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Type-erased success value of an async computation.
pub type AsyncValue = Arc<dyn Any + Send + Sync>;

/// Failure cause of an async computation.
///
/// A value, not an exception: `execute` implementations convert their
/// internal errors into this type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AsyncFailure {
    pub message: String,
}

impl AsyncFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An action that wraps a deferred computation.
///
/// The four `*_action` hooks shape the emitted lifecycle actions; the
/// defaults produce [`AsyncProcessing`], [`AsyncResult`], [`AsyncError`]
/// and [`AsyncComplete`], each carrying the initiating action. Override
/// them to emit domain-specific lifecycle actions for a given action type.
///
/// Implementors also override [`Action::as_async`] to return `Some(self)`.
#[async_trait]
pub trait AsyncAction: Action {
    /// The deferred computation. Must return failures as `Err`, never
    /// panic.
    async fn execute(&self) -> std::result::Result<AsyncValue, AsyncFailure>;

    /// Action emitted when processing begins.
    fn processing_action(&self, initiator: AnyAction) -> AnyAction {
        Arc::new(AsyncProcessing { initiator })
    }

    /// Action emitted on success, carrying the computed value.
    fn result_action(&self, initiator: AnyAction, value: AsyncValue) -> AnyAction {
        Arc::new(AsyncResult { initiator, value })
    }

    /// Action emitted on failure, carrying the cause.
    fn error_action(&self, initiator: AnyAction, error: AsyncFailure) -> AnyAction {
        Arc::new(AsyncError { initiator, error })
    }

    /// Action emitted unconditionally after the result or error.
    fn complete_action(&self, initiator: AnyAction) -> AnyAction {
        Arc::new(AsyncComplete { initiator })
    }
}

/// An action producing a finite ordered sequence of arbitrary actions.
///
/// The engine forwards each produced action to full dispatch in sequence
/// order, draining the whole sequence before finishing; elements of one
/// flow never run concurrently with each other, though distinct async
/// actions do.
///
/// Implementors also override [`Action::as_flow`] to return `Some(self)`.
#[async_trait]
pub trait AsyncFlowAction: Action {
    async fn actions(&self) -> Vec<AnyAction>;
}

/// Default "processing" lifecycle action.
#[derive(Debug, Clone)]
pub struct AsyncProcessing {
    pub initiator: AnyAction,
}

impl Action for AsyncProcessing {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// Default "result" lifecycle action carrying the success value.
#[derive(Clone)]
pub struct AsyncResult {
    pub initiator: AnyAction,
    pub value: AsyncValue,
}

impl AsyncResult {
    /// Downcasts the carried value to a concrete type.
    pub fn value<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult")
            .field("initiator", &self.initiator)
            .field("value", &"<opaque>")
            .finish()
    }
}

impl Action for AsyncResult {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// Default "error" lifecycle action carrying the failure cause.
#[derive(Debug, Clone)]
pub struct AsyncError {
    pub initiator: AnyAction,
    pub error: AsyncFailure,
}

impl Action for AsyncError {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// Default "complete" lifecycle action.
#[derive(Debug, Clone)]
pub struct AsyncComplete {
    pub initiator: AnyAction,
}

impl Action for AsyncComplete {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// Middleware that runs async actions through their lifecycle.
///
/// Intercepted actions are forwarded unchanged down the chain; the
/// lifecycle itself runs in a store-scoped background task, re-entering
/// the store's dispatch entrypoint for each emitted action. Multiple
/// distinct async actions run concurrently.
#[derive(Debug, Default)]
pub struct AsyncMiddleware;

impl AsyncMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: StateModel> Middleware<S> for AsyncMiddleware {
    async fn handle(
        &self,
        store: &Store<S>,
        action: AnyAction,
        next: Next<'_, S>,
    ) -> Result<AnyAction> {
        if let Some(async_action) = action.clone().as_async() {
            let task_store = store.clone();
            let initiator = action.clone();
            store.spawn_scoped(async move {
                run_lifecycle(&task_store, initiator, async_action).await;
            });
        } else if let Some(flow) = action.clone().as_flow() {
            let task_store = store.clone();
            store.spawn_scoped(async move {
                run_flow(&task_store, flow).await;
            });
        }
        next.run(action).await
    }
}

async fn run_lifecycle<S: StateModel>(
    store: &Store<S>,
    initiator: AnyAction,
    action: Arc<dyn AsyncAction>,
) {
    debug!(action = ?initiator, "async lifecycle started");
    dispatch_logged(store, action.processing_action(initiator.clone())).await;
    match action.execute().await {
        Ok(value) => {
            dispatch_logged(store, action.result_action(initiator.clone(), value)).await;
        }
        Err(error) => {
            dispatch_logged(store, action.error_action(initiator.clone(), error)).await;
        }
    }
    dispatch_logged(store, action.complete_action(initiator)).await;
}

async fn run_flow<S: StateModel>(store: &Store<S>, flow: Arc<dyn AsyncFlowAction>) {
    for action in flow.actions().await {
        dispatch_logged(store, action).await;
    }
}

async fn dispatch_logged<S: StateModel>(store: &Store<S>, action: AnyAction) {
    if let Err(e) = store.dispatch(action.clone()).await {
        tracing::warn!(action = ?action, error = %e, "lifecycle dispatch failed");
    }
}
