//! Strategy-driven state persistence.
//!
//! The [`PersistenceMiddleware`] watches successfully-processed actions
//! and saves the store's serialized state through the [`StateStorage`]
//! contract whenever the configured [`PersistStrategy`] fires. On store
//! startup a previously saved state is restored through the normal
//! dispatch path via [`RestoreState`], guaranteed before any caller
//! action; restoration itself never triggers a save, under any strategy.
//!
//! Save and load failures are caught at the call site and routed to a
//! configurable error handler; the store keeps operating.

use crate::core::{serialize_value, Action, AnyAction, StateModel};
use crate::middleware::{Middleware, Next, Result};
use crate::storage::{StateStorage, StorageError};
use crate::store::Store;
use async_trait::async_trait;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error};

/// Built-in action installing a restored state snapshot.
///
/// Dispatched once by the store builder when a prior state exists. The
/// terminal dispatch stage installs the carried state directly (the
/// reducer is skipped for this one action), so the state is updated before
/// any other action is processed.
#[derive(Debug, Clone)]
pub struct RestoreState<S: StateModel> {
    pub state: S,
}

impl<S: StateModel> RestoreState<S> {
    pub fn new(state: S) -> Self {
        Self { state }
    }
}

impl<S: StateModel> Action for RestoreState<S> {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

/// When the persistence middleware saves state.
///
/// `Combined` saves if any member strategy fires; `OnAction` members match
/// only their own action-type set. When every firing member is debounced
/// the save is debounced; one immediate member makes it immediate.
#[derive(Clone)]
#[non_exhaustive]
pub enum PersistStrategy<S> {
    /// Save after every successfully-processed action.
    EveryChange,
    /// Coalesce bursts of changes into one save after quiescence.
    Debounced(Duration),
    /// Save only when one of the listed action types was just dispatched.
    OnAction(HashSet<TypeId>),
    /// Save when the predicate over `(current, previous)` state holds.
    Conditional(Arc<dyn Fn(&S, &S) -> bool + Send + Sync>),
    /// Save if any member strategy fires.
    Combined(Vec<PersistStrategy<S>>),
}

impl<S: StateModel> PersistStrategy<S> {
    /// Strategy matching a single action type.
    pub fn on_action<A: Action>() -> Self {
        PersistStrategy::OnAction(HashSet::from([TypeId::of::<A>()]))
    }

    /// Strategy matching a set of action types.
    pub fn on_actions(types: impl IntoIterator<Item = TypeId>) -> Self {
        PersistStrategy::OnAction(types.into_iter().collect())
    }

    /// Strategy firing on a predicate over `(current, previous)` state.
    pub fn conditional(predicate: impl Fn(&S, &S) -> bool + Send + Sync + 'static) -> Self {
        PersistStrategy::Conditional(Arc::new(predicate))
    }

    /// Single evaluation point for every strategy shape.
    ///
    /// Returns `None` when no save is due, `Some(None)` for an immediate
    /// save and `Some(Some(delay))` for a debounced one. Inside
    /// `Combined`, an immediate member takes precedence over a debounced
    /// one.
    pub(crate) fn firing_delay(
        &self,
        action: &dyn Action,
        current: &S,
        previous: &S,
    ) -> Option<Option<Duration>> {
        match self {
            PersistStrategy::EveryChange => Some(None),
            PersistStrategy::Debounced(delay) => Some(Some(*delay)),
            PersistStrategy::OnAction(types) => types
                .contains(&action.as_any().type_id())
                .then_some(None),
            PersistStrategy::Conditional(predicate) => {
                predicate(current, previous).then_some(None)
            }
            PersistStrategy::Combined(members) => {
                let mut debounce = None;
                for member in members {
                    match member.firing_delay(action, current, previous) {
                        Some(None) => return Some(None),
                        Some(Some(delay)) if debounce.is_none() => debounce = Some(delay),
                        _ => {}
                    }
                }
                debounce.map(Some)
            }
        }
    }
}

impl<S> fmt::Debug for PersistStrategy<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistStrategy::EveryChange => f.write_str("EveryChange"),
            PersistStrategy::Debounced(d) => f.debug_tuple("Debounced").field(d).finish(),
            PersistStrategy::OnAction(types) => {
                f.debug_tuple("OnAction").field(&types.len()).finish()
            }
            PersistStrategy::Conditional(_) => f.write_str("Conditional"),
            PersistStrategy::Combined(members) => {
                f.debug_tuple("Combined").field(members).finish()
            }
        }
    }
}

pub(crate) type PersistErrorHandler = Arc<dyn Fn(&StorageError) + Send + Sync>;

/// Middleware saving state snapshots per the configured strategy.
pub struct PersistenceMiddleware<S: StateModel + Serialize> {
    storage: Arc<dyn StateStorage>,
    strategy: PersistStrategy<S>,
    on_error: PersistErrorHandler,
    /// Debounce bookkeeping: a scheduled save fires only if its
    /// generation is still current when the delay elapses.
    generation: Arc<AtomicU64>,
    pending: Arc<Mutex<Option<S>>>,
}

impl<S: StateModel + Serialize> PersistenceMiddleware<S> {
    pub fn new(storage: Arc<dyn StateStorage>, strategy: PersistStrategy<S>) -> Self {
        Self {
            storage,
            strategy,
            on_error: Arc::new(|e| error!(error = %e, "state save failed")),
            generation: Arc::new(AtomicU64::new(0)),
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Replaces the storage error handler (default: log at error level).
    pub fn with_error_handler(
        self,
        handler: impl Fn(&StorageError) + Send + Sync + 'static,
    ) -> Self {
        self.with_error_handler_arc(Arc::new(handler))
    }

    pub(crate) fn with_error_handler_arc(mut self, handler: PersistErrorHandler) -> Self {
        self.on_error = handler;
        self
    }

    async fn save_now(&self, state: &S) {
        match serialize_value(state) {
            Ok(bytes) => {
                if let Err(e) = self.storage.save(&bytes).await {
                    (self.on_error)(&e);
                }
            }
            Err(e) => (self.on_error)(&StorageError::Core(e)),
        }
    }

    fn schedule_debounced(&self, store: &Store<S>, state: S, delay: Duration) {
        *self.pending.lock().expect("pending lock poisoned") = Some(state);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let storage = Arc::clone(&self.storage);
        let on_error = Arc::clone(&self.on_error);
        let generations = Arc::clone(&self.generation);
        let pending = Arc::clone(&self.pending);
        store.spawn_scoped(async move {
            tokio::time::sleep(delay).await;
            if generations.load(Ordering::SeqCst) != generation {
                return;
            }
            let Some(state) = pending.lock().expect("pending lock poisoned").take() else {
                return;
            };
            match serialize_value(&state) {
                Ok(bytes) => {
                    if let Err(e) = storage.save(&bytes).await {
                        on_error(&e);
                    }
                }
                Err(e) => on_error(&StorageError::Core(e)),
            }
        });
    }
}

#[async_trait]
impl<S> Middleware<S> for PersistenceMiddleware<S>
where
    S: StateModel + Serialize,
{
    async fn handle(
        &self,
        store: &Store<S>,
        action: AnyAction,
        next: Next<'_, S>,
    ) -> Result<AnyAction> {
        let previous = store.state();
        let result = next.run(action.clone()).await?;

        // Restoration must never feed back into a save.
        if action.is::<RestoreState<S>>() {
            return Ok(result);
        }

        let current = store.state();
        match self
            .strategy
            .firing_delay(action.as_ref(), &current, &previous)
        {
            None => {}
            Some(None) => {
                debug!(action = ?action, "saving state");
                self.save_now(&current).await;
            }
            Some(Some(delay)) => {
                self.schedule_debounced(store, current, delay);
            }
        }
        Ok(result)
    }
}

impl<S: StateModel + Serialize> fmt::Debug for PersistenceMiddleware<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceMiddleware")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        value: i64,
    }

    #[derive(Debug)]
    struct Tick;

    impl Action for Tick {
        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    #[derive(Debug)]
    struct Other;

    impl Action for Other {
        fn as_any(&self) -> &(dyn Any + Send + Sync) {
            self
        }
    }

    fn states() -> (Counter, Counter) {
        (Counter { value: 1 }, Counter { value: 0 })
    }

    #[test]
    fn test_every_change_fires_immediately() {
        let strategy: PersistStrategy<Counter> = PersistStrategy::EveryChange;
        let (new, old) = states();
        assert_eq!(strategy.firing_delay(&Tick, &new, &old), Some(None));
    }

    #[test]
    fn test_on_action_matches_only_listed_types() {
        let strategy: PersistStrategy<Counter> = PersistStrategy::on_action::<Tick>();
        let (new, old) = states();
        assert_eq!(strategy.firing_delay(&Tick, &new, &old), Some(None));
        assert_eq!(strategy.firing_delay(&Other, &new, &old), None);
    }

    #[test]
    fn test_conditional_consults_both_states() {
        let strategy: PersistStrategy<Counter> =
            PersistStrategy::conditional(|current: &Counter, previous| current.value > previous.value);
        let (new, old) = states();
        assert_eq!(strategy.firing_delay(&Tick, &new, &old), Some(None));
        assert_eq!(strategy.firing_delay(&Tick, &old, &new), None);
    }

    #[test]
    fn test_combined_fires_if_any_member_fires() {
        let strategy: PersistStrategy<Counter> = PersistStrategy::Combined(vec![
            PersistStrategy::on_action::<Tick>(),
            PersistStrategy::conditional(|_, _| false),
        ]);
        let (new, old) = states();
        assert_eq!(strategy.firing_delay(&Tick, &new, &old), Some(None));
        assert_eq!(strategy.firing_delay(&Other, &new, &old), None);
    }

    #[test]
    fn test_combined_immediate_member_beats_debounce() {
        let strategy: PersistStrategy<Counter> = PersistStrategy::Combined(vec![
            PersistStrategy::Debounced(Duration::from_millis(100)),
            PersistStrategy::EveryChange,
        ]);
        let (new, old) = states();
        assert_eq!(strategy.firing_delay(&Tick, &new, &old), Some(None));
    }

    #[test]
    fn test_combined_debounces_when_only_debounced_member_fires() {
        let strategy: PersistStrategy<Counter> = PersistStrategy::Combined(vec![
            PersistStrategy::Debounced(Duration::from_millis(100)),
            PersistStrategy::on_action::<Tick>(),
        ]);
        let (new, old) = states();
        assert_eq!(
            strategy.firing_delay(&Other, &new, &old),
            Some(Some(Duration::from_millis(100)))
        );
    }
}
