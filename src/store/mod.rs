//! The store: single owner of the current state, entry point of every
//! dispatch.
//!
//! A dispatch hands the action to the composed middleware chain; the
//! terminal stage applies the pure reducer under a mutual-exclusion lock
//! held only for read-compute-publish, then publishes the new state on a
//! `tokio::sync::watch` channel. Late subscribers immediately receive the
//! latest value, then every subsequent one.
//!
//! Async and saga middleware re-enter the dispatch entrypoint through
//! store-scoped background tasks; closing the store cancels that scope and
//! waits for outstanding work.

use crate::core::{deserialize_value, Action, AnyAction, Reducer, StateModel};
use crate::log::{LogSink, StoreLogger};
use crate::middleware::{AsyncMiddleware, DispatchError, Middleware, Next, Result};
use crate::persist::{PersistStrategy, PersistenceMiddleware, RestoreState};
use crate::saga::{SagaDefinition, SagaEngine, SagaMiddleware, SagaPersistMode};
use crate::storage::{SagaStorage, StateStorage, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

type StorageErrorHandler = Arc<dyn Fn(&StorageError) + Send + Sync>;
type DecodeState<S> = Arc<dyn Fn(&[u8]) -> crate::core::Result<S> + Send + Sync>;

struct StoreInner<S: StateModel> {
    state_tx: watch::Sender<S>,
    /// Serializes reducer application; never held across middleware, saga
    /// matching or IO.
    reduce_lock: tokio::sync::Mutex<()>,
    reducer: Reducer<S>,
    chain: Vec<Arc<dyn Middleware<S>>>,
    saga_engine: Option<Arc<SagaEngine>>,
    logger: StoreLogger,
    scope: CancellationToken,
    tasks: TaskTracker,
}

/// A single mutable state store updated only through its reducer.
///
/// `Store` is a cheap handle (`Clone` shares the same store); middleware
/// and background tasks hold clones for re-entrant dispatch.
pub struct Store<S: StateModel> {
    inner: Arc<StoreInner<S>>,
}

impl<S: StateModel> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StateModel> Store<S> {
    /// Starts configuring a store with an initial state and reducer.
    pub fn builder(
        initial: S,
        reducer: impl Fn(&S, &dyn Action) -> S + Send + Sync + 'static,
    ) -> StoreBuilder<S> {
        StoreBuilder::new(initial, reducer)
    }

    /// Dispatches an action through the full middleware chain and returns
    /// the action the chain resolved to.
    pub async fn dispatch(&self, action: AnyAction) -> Result<AnyAction> {
        if self.inner.scope.is_cancelled() {
            return Err(DispatchError::Closed);
        }
        Next::new(self, &self.inner.chain).run(action).await
    }

    /// Fire-and-forget dispatch on the store scope.
    ///
    /// Used by middleware whose side effects are independent asynchronous
    /// events rather than part of the current chain's return value.
    pub fn dispatch_background(&self, action: AnyAction) {
        let store = self.clone();
        self.spawn_scoped(async move {
            if let Err(e) = store.dispatch(action.clone()).await {
                warn!(action = ?action, error = %e, "background dispatch failed");
            }
        });
    }

    /// Terminal stage: applies the reducer under the state lock and
    /// publishes the new state.
    pub(crate) async fn apply(&self, action: AnyAction) -> Result<AnyAction> {
        let _guard = self.inner.reduce_lock.lock().await;
        if let Some(restore) = action.downcast_ref::<RestoreState<S>>() {
            self.inner.state_tx.send_replace(restore.state.clone());
            debug!("state restored from storage");
            return Ok(action);
        }
        let next_state = {
            let current = self.inner.state_tx.borrow();
            (self.inner.reducer)(&current, action.as_ref())
        };
        self.inner.state_tx.send_replace(next_state);
        Ok(action)
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> S {
        self.inner.state_tx.borrow().clone()
    }

    /// Last-value-cached, multi-subscriber state stream.
    ///
    /// A subscriber joining late immediately observes the latest value,
    /// then all subsequent values.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.inner.state_tx.subscribe()
    }

    /// The saga engine, when sagas are configured.
    pub fn saga_engine(&self) -> Option<&Arc<SagaEngine>> {
        self.inner.saga_engine.as_ref()
    }

    /// The configured log sink, wrapped for template formatting.
    pub fn logger(&self) -> &StoreLogger {
        &self.inner.logger
    }

    /// Spawns a task tied to the store's lifetime: closing the store
    /// cancels it.
    pub fn spawn_scoped<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.scope.is_cancelled() {
            return;
        }
        let token = self.inner.scope.clone();
        self.inner.tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                () = future => {}
            }
        });
    }

    /// True once [`Store::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.scope.is_cancelled()
    }

    /// Stops the store: rejects further dispatches, cancels pending saga
    /// delays, async computations and debounce timers, and waits for the
    /// scoped tasks to wind down.
    pub async fn close(&self) {
        self.inner.scope.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }
}

impl<S: StateModel> std::fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("state", &*self.inner.state_tx.borrow())
            .field("middleware", &self.inner.chain.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct PersistSetup<S: StateModel> {
    storage: Arc<dyn StateStorage>,
    decode: DecodeState<S>,
    make_middleware:
        Box<dyn FnOnce(StorageErrorHandler) -> Arc<dyn Middleware<S>> + Send>,
}

/// Configures and builds a [`Store`].
///
/// Middleware runs in the order added, wrapping the built-in middleware
/// appended at build time: the async lifecycle engine, then the saga
/// engine (when sagas are registered), then state persistence (when a
/// state storage is configured), with the reducer as the terminal stage.
pub struct StoreBuilder<S: StateModel> {
    initial: S,
    reducer: Reducer<S>,
    middleware: Vec<Arc<dyn Middleware<S>>>,
    sagas: Vec<SagaDefinition>,
    saga_storage: Option<(Arc<dyn SagaStorage>, SagaPersistMode)>,
    persist: Option<PersistSetup<S>>,
    sink: Option<Arc<dyn LogSink>>,
    on_storage_error: Option<StorageErrorHandler>,
}

impl<S: StateModel> StoreBuilder<S> {
    fn new(initial: S, reducer: impl Fn(&S, &dyn Action) -> S + Send + Sync + 'static) -> Self {
        Self {
            initial,
            reducer: Arc::new(reducer),
            middleware: Vec::new(),
            sagas: Vec::new(),
            saga_storage: None,
            persist: None,
            sink: None,
            on_storage_error: None,
        }
    }

    /// Appends a middleware to the chain.
    pub fn middleware(mut self, middleware: impl Middleware<S> + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Appends an already-shared middleware to the chain.
    pub fn middleware_arc(mut self, middleware: Arc<dyn Middleware<S>>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Registers a saga definition.
    pub fn saga(mut self, definition: SagaDefinition) -> Self {
        self.sagas.push(definition);
        self
    }

    /// Persists saga instances through the given backend.
    pub fn with_saga_storage(
        mut self,
        storage: Arc<dyn SagaStorage>,
        mode: SagaPersistMode,
    ) -> Self {
        self.saga_storage = Some((storage, mode));
        self
    }

    /// Persists the state through the given backend, restoring any prior
    /// snapshot on build.
    pub fn with_state_storage(
        mut self,
        storage: Arc<dyn StateStorage>,
        strategy: PersistStrategy<S>,
    ) -> Self
    where
        S: Serialize + DeserializeOwned,
    {
        let storage_for_mw = Arc::clone(&storage);
        self.persist = Some(PersistSetup {
            storage,
            decode: Arc::new(|bytes| deserialize_value::<S>(bytes)),
            make_middleware: Box::new(move |handler| {
                Arc::new(
                    PersistenceMiddleware::new(storage_for_mw, strategy)
                        .with_error_handler_arc(handler),
                )
            }),
        });
        self
    }

    /// Routes persistence failures (state and saga) to the handler instead
    /// of the default error-level log.
    pub fn with_storage_error_handler(
        mut self,
        handler: impl Fn(&StorageError) + Send + Sync + 'static,
    ) -> Self {
        self.on_storage_error = Some(Arc::new(handler));
        self
    }

    /// Replaces the default `tracing`-backed log sink.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds the store: assembles the chain, restores persisted state,
    /// rehydrates saga instances, and only then returns.
    pub async fn build(self) -> Result<Store<S>> {
        let on_storage_error: StorageErrorHandler = self
            .on_storage_error
            .unwrap_or_else(|| Arc::new(|e| error!(error = %e, "storage operation failed")));

        let mut chain = self.middleware;
        chain.push(Arc::new(AsyncMiddleware::new()));

        let saga_engine = if self.sagas.is_empty() {
            None
        } else {
            let mut engine = SagaEngine::new(self.sagas);
            if let Some((storage, mode)) = self.saga_storage {
                engine = engine.with_storage(storage, mode);
            }
            let handler = Arc::clone(&on_storage_error);
            engine = engine.with_storage_error_handler(move |e| handler(e));
            let engine = Arc::new(engine);
            chain.push(Arc::new(SagaMiddleware::new(Arc::clone(&engine))));
            Some(engine)
        };

        let mut restore = None;
        if let Some(PersistSetup {
            storage,
            decode,
            make_middleware,
        }) = self.persist
        {
            chain.push(make_middleware(Arc::clone(&on_storage_error)));
            restore = Some((storage, decode));
        }

        let (state_tx, _state_rx) = watch::channel(self.initial);
        let store = Store {
            inner: Arc::new(StoreInner {
                state_tx,
                reduce_lock: tokio::sync::Mutex::new(()),
                reducer: self.reducer,
                chain,
                saga_engine,
                logger: self
                    .sink
                    .map(StoreLogger::new)
                    .unwrap_or_default(),
                scope: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        };

        // Rehydrate saga instances before any action, including the
        // internal restore dispatch, reaches the pipeline.
        if let Some(engine) = &store.inner.saga_engine {
            if let Err(e) = engine.rehydrate().await {
                error!(error = %e, "saga rehydration failed");
            }
        }

        if let Some((storage, decode)) = restore {
            match storage.load().await {
                Ok(Some(bytes)) => match decode(&bytes) {
                    Ok(state) => {
                        store.dispatch(Arc::new(RestoreState::new(state))).await?;
                    }
                    Err(e) => on_storage_error(&StorageError::Core(e)),
                },
                Ok(None) => {}
                Err(e) => on_storage_error(&e),
            }
        }

        Ok(store)
    }
}

impl<S: StateModel> std::fmt::Debug for StoreBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("middleware", &self.middleware.len())
            .field("sagas", &self.sagas.len())
            .field("persisted", &self.persist.is_some())
            .finish_non_exhaustive()
    }
}
