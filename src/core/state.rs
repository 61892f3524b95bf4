use super::action::Action;
use std::fmt;
use std::sync::Arc;

/// An immutable snapshot of application state at a point in time.
///
/// Exactly one "current" instance is owned by the store. The reducer
/// replaces (never mutates) it on each dispatch; old snapshots are garbage
/// once no subscriber observes them.
pub trait StateModel: Clone + Send + Sync + fmt::Debug + 'static {}

impl<T> StateModel for T where T: Clone + Send + Sync + fmt::Debug + 'static {}

/// A pure reducer: `(current state, action) -> next state`.
///
/// Reducers must be side-effect free; side effects belong in middleware
/// and saga effects. The store applies the reducer under its state lock,
/// so reducers should also be cheap.
pub type Reducer<S> = Arc<dyn Fn(&S, &dyn Action) -> S + Send + Sync>;
