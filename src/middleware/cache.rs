//! Action cache with expiration, and the caching middleware that serves
//! cached substitute actions in place of re-running a transformation.

use super::{DispatchError, Middleware, Next, Result};
use crate::core::{Action, AnyAction, StateModel};
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Object-safe equality over type-erased values.
///
/// Automatically implemented for every `PartialEq + Any` type; values of
/// different concrete types are never equal.
pub trait DynEq {
    fn dyn_eq(&self, other: &dyn Any) -> bool;
}

impl<T: PartialEq + Any> DynEq for T {
    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|o| self == o)
    }
}

/// Object-safe hashing over type-erased values.
///
/// Automatically implemented for every `Hash` type.
pub trait DynHash {
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T: Hash> DynHash for T {
    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state);
    }
}

/// An action whose downstream effect may be memoized until an expiration
/// instant.
///
/// The action itself is the cache key, through its own `Eq`/`Hash`
/// (surfaced object-safely via [`DynEq`]/[`DynHash`]), not a derived key.
/// A cache entry for it is valid iff `now < expires_after()`.
///
/// Implementors also override [`Action::as_cacheable`] to return
/// `Some(self)` so the caching middleware can recover this view from the
/// type-erased pipeline action.
pub trait CacheableAction: Action + DynEq + DynHash {
    /// Instant after which any cached result for this action is stale.
    fn expires_after(&self) -> DateTime<Utc>;
}

/// An expiration instant paired with the action that substitutes for the
/// intercepted action's entire downstream effect.
#[derive(Debug, Clone)]
pub struct CachedActions {
    pub expires_after: DateTime<Utc>,
    pub action: AnyAction,
}

impl CachedActions {
    pub fn new(expires_after: DateTime<Utc>, action: AnyAction) -> Self {
        Self {
            expires_after,
            action,
        }
    }

    /// True while `now` has not reached the expiration instant.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_after
    }
}

/// Map key wrapping a cacheable action, delegating equality and hashing to
/// the action's own implementations.
struct CacheKey(Arc<dyn CacheableAction>);

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_any())
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state);
    }
}

/// Key-to-cached-result map with expiration.
///
/// Internally synchronized with its own mutex; entries are dropped on read
/// once expired and swept opportunistically on writes. At most one cached
/// result exists per distinct key; a later put overwrites.
#[derive(Default)]
pub struct ActionCache {
    entries: Mutex<HashMap<CacheKey, CachedActions>>,
}

impl ActionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a cached result under the given action key, overwriting any
    /// prior entry for an equal key, and sweeps expired entries.
    pub fn put(&self, key: Arc<dyn CacheableAction>, cached: CachedActions) {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.retain(|_, entry| entry.is_valid(now));
        entries.insert(CacheKey(key), cached);
    }

    /// Returns the unexpired substitute action for an equal key, if any.
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &Arc<dyn CacheableAction>) -> Option<AnyAction> {
        let probe = CacheKey(Arc::clone(key));
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(&probe) {
            Some(entry) if entry.is_valid(Utc::now()) => Some(Arc::clone(&entry.action)),
            Some(_) => {
                entries.remove(&probe);
                None
            }
            None => None,
        }
    }

    /// Removes the entry for an equal key, if present.
    pub fn remove(&self, key: &Arc<dyn CacheableAction>) {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .remove(&CacheKey(Arc::clone(key)));
    }

    /// Drops every entry, expired or not.
    pub fn clear(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
    }

    /// Number of entries currently held, including not-yet-swept expired
    /// ones.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ActionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionCache")
            .field("len", &self.len())
            .finish()
    }
}

/// Middleware serving cached substitutes for cacheable actions.
///
/// On a cache hit the unexpired substitute is forwarded through `next` in
/// place of the original (the downstream transformation never re-runs).
/// On a miss the original action is forwarded, whatever the chain returns
/// is cached under the action's key with its declared expiration, and
/// returned.
///
/// A downstream result that is itself cacheable aborts the dispatch with
/// [`DispatchError::RecursiveCache`]: that configuration would memoize a
/// transformation whose output would be intercepted again, and is a bug.
pub struct CachingMiddleware {
    cache: Arc<ActionCache>,
}

impl CachingMiddleware {
    pub fn new(cache: Arc<ActionCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<ActionCache> {
        &self.cache
    }
}

#[async_trait]
impl<S: StateModel> Middleware<S> for CachingMiddleware {
    async fn handle(
        &self,
        _store: &Store<S>,
        action: AnyAction,
        next: Next<'_, S>,
    ) -> Result<AnyAction> {
        let Some(cacheable) = action.clone().as_cacheable() else {
            return next.run(action).await;
        };

        if let Some(hit) = self.cache.get(&cacheable) {
            debug!(action = ?action, "serving cached substitute");
            return next.run(hit).await;
        }

        let result = next.run(action).await?;
        if result.clone().as_cacheable().is_some() {
            return Err(DispatchError::RecursiveCache {
                action: format!("{result:?}"),
            });
        }
        let expires_after = cacheable.expires_after();
        self.cache.put(
            Arc::clone(&cacheable),
            CachedActions::new(expires_after, Arc::clone(&result)),
        );
        Ok(result)
    }
}
