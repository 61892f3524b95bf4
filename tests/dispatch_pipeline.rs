//! Dispatch pipeline tests: middleware ordering, caching, async lifecycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rheo::prelude::*;
use rheo::{AsyncComplete, AsyncError, AsyncProcessing, AsyncResult};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
struct AppState {
    counter: i64,
}

#[derive(Debug, Clone)]
struct Increment {
    value: i64,
}

impl Action for Increment {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

fn counter_reducer(state: &AppState, action: &dyn Action) -> AppState {
    match action.downcast_ref::<Increment>() {
        Some(inc) => AppState {
            counter: state.counter + inc.value,
        },
        None => state.clone(),
    }
}

async fn wait_until(timeout_ms: u64, mut condition: impl FnMut() -> bool) {
    let mut waited = 0;
    while !condition() {
        assert!(waited < timeout_ms, "condition not met within {timeout_ms}ms");
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 10;
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Middleware recording "before"/"after" markers around the chain.
struct LabelMiddleware {
    label: &'static str,
    events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl<S: StateModel> Middleware<S> for LabelMiddleware {
    async fn handle(
        &self,
        _store: &Store<S>,
        action: AnyAction,
        next: Next<'_, S>,
    ) -> Result<AnyAction, DispatchError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("before-{}", self.label));
        let out = next.run(action).await?;
        self.events
            .lock()
            .unwrap()
            .push(format!("after-{}", self.label));
        Ok(out)
    }
}

#[tokio::test]
async fn test_middleware_nesting_is_strict_lifo() {
    init_tracing();
    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let reducer_events = Arc::clone(&events);

    let store = Store::builder(AppState { counter: 0 }, move |state, action| {
        reducer_events.lock().unwrap().push("reduce".to_string());
        counter_reducer(state, action)
    })
    .middleware(LabelMiddleware {
        label: "outer",
        events: Arc::clone(&events),
    })
    .middleware(LabelMiddleware {
        label: "mid",
        events: Arc::clone(&events),
    })
    .middleware(LabelMiddleware {
        label: "inner",
        events: Arc::clone(&events),
    })
    .build()
    .await
    .unwrap();

    store.dispatch(Arc::new(Increment { value: 1 })).await.unwrap();

    let recorded = events.lock().unwrap().clone();
    assert_eq!(
        recorded,
        vec![
            "before-outer",
            "before-mid",
            "before-inner",
            "reduce",
            "after-inner",
            "after-mid",
            "after-outer",
        ]
    );
    store.close().await;
}

#[tokio::test]
async fn test_counter_scenario_with_tracking() {
    let tracker = Arc::new(TrackingMiddleware::new());
    let store = Store::builder(AppState { counter: 0 }, counter_reducer)
        .middleware_arc(tracker.clone())
        .build()
        .await
        .unwrap();

    store.dispatch(Arc::new(Increment { value: 5 })).await.unwrap();
    store.dispatch(Arc::new(Increment { value: 3 })).await.unwrap();

    assert_eq!(store.state().counter, 8);
    let seen: Vec<i64> = tracker
        .recorded_of::<Increment>()
        .iter()
        .map(|i| i.value)
        .collect();
    assert_eq!(seen, vec![5, 3]);
    store.close().await;
}

#[tokio::test]
async fn test_late_subscriber_receives_latest_value() {
    let store = Store::builder(AppState { counter: 0 }, counter_reducer)
        .build()
        .await
        .unwrap();

    store.dispatch(Arc::new(Increment { value: 4 })).await.unwrap();

    // Joined after the dispatch, still sees the latest value immediately.
    let rx = store.subscribe();
    assert_eq!(rx.borrow().counter, 4);

    let mut rx2 = store.subscribe();
    store.dispatch(Arc::new(Increment { value: 1 })).await.unwrap();
    rx2.changed().await.unwrap();
    assert_eq!(rx2.borrow().counter, 5);
    store.close().await;
}

#[tokio::test]
async fn test_failure_middleware_contains_errors() {
    struct FailingMiddleware;

    #[async_trait]
    impl<S: StateModel> Middleware<S> for FailingMiddleware {
        async fn handle(
            &self,
            _store: &Store<S>,
            _action: AnyAction,
            _next: Next<'_, S>,
        ) -> Result<AnyAction, DispatchError> {
            Err(DispatchError::Failed("broken middleware".to_string()))
        }
    }

    // Without a failure handler the error is fatal to this dispatch only.
    let store = Store::builder(AppState { counter: 0 }, counter_reducer)
        .middleware(FailingMiddleware)
        .build()
        .await
        .unwrap();
    assert!(store.dispatch(Arc::new(Increment { value: 1 })).await.is_err());
    assert_eq!(store.state().counter, 0);
    store.close().await;

    // With the handler positioned outer, the dispatch resolves to the
    // original action and the store keeps running.
    let store = Store::builder(AppState { counter: 0 }, counter_reducer)
        .middleware(FailureHandlingMiddleware::new())
        .middleware(FailingMiddleware)
        .build()
        .await
        .unwrap();
    let out = store.dispatch(Arc::new(Increment { value: 1 })).await.unwrap();
    assert!(out.is::<Increment>());
    store.close().await;
}

// ---------------------------------------------------------------------------
// Caching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Lookup {
    key: &'static str,
    ttl_millis: i64,
}

impl Action for Lookup {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn as_cacheable(self: Arc<Self>) -> Option<Arc<dyn CacheableAction>> {
        Some(self)
    }
}

impl CacheableAction for Lookup {
    fn expires_after(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::milliseconds(self.ttl_millis)
    }
}

#[derive(Debug, Clone)]
struct LookupResolved {
    key: &'static str,
}

impl Action for LookupResolved {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// The downstream transformation: resolves a lookup into its result
/// action, counting invocations.
struct ResolverMiddleware {
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl<S: StateModel> Middleware<S> for ResolverMiddleware {
    async fn handle(
        &self,
        _store: &Store<S>,
        action: AnyAction,
        next: Next<'_, S>,
    ) -> Result<AnyAction, DispatchError> {
        match action.downcast_ref::<Lookup>() {
            Some(lookup) => {
                self.invocations.fetch_add(1, Ordering::SeqCst);
                next.run(Arc::new(LookupResolved { key: lookup.key })).await
            }
            None => next.run(action).await,
        }
    }
}

#[tokio::test]
async fn test_unexpired_cache_skips_the_transformation() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(ActionCache::new());
    let store = Store::builder(AppState { counter: 0 }, counter_reducer)
        .middleware(CachingMiddleware::new(cache.clone()))
        .middleware(ResolverMiddleware {
            invocations: invocations.clone(),
        })
        .build()
        .await
        .unwrap();

    let first = store
        .dispatch(Arc::new(Lookup {
            key: "user:1",
            ttl_millis: 60_000,
        }))
        .await
        .unwrap();
    assert_eq!(first.downcast_ref::<LookupResolved>().unwrap().key, "user:1");
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    // Equal action, unexpired entry: the resolver must not run again and
    // the downstream-visible action is the cached substitute.
    let second = store
        .dispatch(Arc::new(Lookup {
            key: "user:1",
            ttl_millis: 60_000,
        }))
        .await
        .unwrap();
    assert_eq!(second.downcast_ref::<LookupResolved>().unwrap().key, "user:1");
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    store.close().await;
}

#[tokio::test]
async fn test_expired_cache_reinvokes_the_transformation() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(ActionCache::new());
    let store = Store::builder(AppState { counter: 0 }, counter_reducer)
        .middleware(CachingMiddleware::new(cache.clone()))
        .middleware(ResolverMiddleware {
            invocations: invocations.clone(),
        })
        .build()
        .await
        .unwrap();

    let lookup = Lookup {
        key: "user:2",
        ttl_millis: 30,
    };
    store.dispatch(Arc::new(lookup.clone())).await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    store.dispatch(Arc::new(lookup.clone())).await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 2);

    // Explicit expire-all also forces a re-resolve.
    cache.clear();
    store.dispatch(Arc::new(lookup)).await.unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    store.close().await;
}

#[tokio::test]
async fn test_caching_a_cacheable_result_fails_loudly() {
    // No resolver below the cache: the chain returns the cacheable action
    // itself, which must be rejected, not silently cached.
    let store = Store::builder(AppState { counter: 0 }, counter_reducer)
        .middleware(CachingMiddleware::new(Arc::new(ActionCache::new())))
        .build()
        .await
        .unwrap();

    let result = store
        .dispatch(Arc::new(Lookup {
            key: "user:3",
            ttl_millis: 60_000,
        }))
        .await;
    assert!(matches!(result, Err(DispatchError::RecursiveCache { .. })));
    store.close().await;
}

// ---------------------------------------------------------------------------
// Async lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Fetch {
    succeed: bool,
}

impl Action for Fetch {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn as_async(self: Arc<Self>) -> Option<Arc<dyn AsyncAction>> {
        Some(self)
    }
}

#[async_trait]
impl AsyncAction for Fetch {
    async fn execute(&self) -> Result<AsyncValue, AsyncFailure> {
        if self.succeed {
            Ok(Arc::new(42i32))
        } else {
            Err(AsyncFailure::new("fetch failed"))
        }
    }
}

fn lifecycle_markers(tracker: &TrackingMiddleware) -> Vec<&'static str> {
    tracker
        .recorded()
        .iter()
        .filter_map(|a| {
            if a.is::<AsyncProcessing>() {
                Some("processing")
            } else if a.is::<AsyncResult>() {
                Some("result")
            } else if a.is::<AsyncError>() {
                Some("error")
            } else if a.is::<AsyncComplete>() {
                Some("complete")
            } else {
                None
            }
        })
        .collect()
}

#[tokio::test]
async fn test_successful_async_action_emits_processing_result_complete() {
    init_tracing();
    let tracker = Arc::new(TrackingMiddleware::new());
    let store = Store::builder(AppState { counter: 0 }, counter_reducer)
        .middleware_arc(tracker.clone())
        .build()
        .await
        .unwrap();

    store.dispatch(Arc::new(Fetch { succeed: true })).await.unwrap();
    wait_until(1000, || {
        tracker.recorded().iter().any(|a| a.is::<AsyncComplete>())
    })
    .await;

    assert_eq!(lifecycle_markers(&tracker), vec!["processing", "result", "complete"]);

    let recorded = tracker.recorded();
    let result = recorded
        .iter()
        .find_map(|a| a.downcast_ref::<AsyncResult>())
        .unwrap();
    assert_eq!(result.value::<i32>(), Some(&42));
    assert!(result.initiator.is::<Fetch>());
    store.close().await;
}

#[tokio::test]
async fn test_failed_async_action_emits_processing_error_complete() {
    let tracker = Arc::new(TrackingMiddleware::new());
    let store = Store::builder(AppState { counter: 0 }, counter_reducer)
        .middleware_arc(tracker.clone())
        .build()
        .await
        .unwrap();

    store.dispatch(Arc::new(Fetch { succeed: false })).await.unwrap();
    wait_until(1000, || {
        tracker.recorded().iter().any(|a| a.is::<AsyncComplete>())
    })
    .await;

    assert_eq!(lifecycle_markers(&tracker), vec!["processing", "error", "complete"]);

    let recorded = tracker.recorded();
    let error = recorded
        .iter()
        .find_map(|a| a.downcast_ref::<AsyncError>())
        .unwrap();
    assert_eq!(error.error, AsyncFailure::new("fetch failed"));
    store.close().await;
}

#[derive(Debug)]
struct Seed;

impl Action for Seed {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn as_flow(self: Arc<Self>) -> Option<Arc<dyn AsyncFlowAction>> {
        Some(self)
    }
}

#[async_trait]
impl AsyncFlowAction for Seed {
    async fn actions(&self) -> Vec<AnyAction> {
        vec![
            Arc::new(Increment { value: 1 }),
            Arc::new(Increment { value: 2 }),
            Arc::new(Increment { value: 3 }),
        ]
    }
}

#[tokio::test]
async fn test_flow_action_dispatches_sequence_in_order() {
    let tracker = Arc::new(TrackingMiddleware::new());
    let store = Store::builder(AppState { counter: 0 }, counter_reducer)
        .middleware_arc(tracker.clone())
        .build()
        .await
        .unwrap();

    store.dispatch(Arc::new(Seed)).await.unwrap();
    wait_until(1000, || store.state().counter == 6).await;

    let seen: Vec<i64> = tracker
        .recorded_of::<Increment>()
        .iter()
        .map(|i| i.value)
        .collect();
    assert_eq!(seen, vec![1, 2, 3]);
    store.close().await;
}

#[tokio::test]
async fn test_closed_store_rejects_dispatch() {
    let store = Store::builder(AppState { counter: 0 }, counter_reducer)
        .build()
        .await
        .unwrap();
    store.close().await;
    let result = store.dispatch(Arc::new(Increment { value: 1 })).await;
    assert!(matches!(result, Err(DispatchError::Closed)));
}
