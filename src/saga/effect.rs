use crate::core::AnyAction;
use std::any::Any;
use std::fmt;
use std::time::Duration;

/// Opaque per-instance saga state.
///
/// Each saga definition fixes the concrete type behind the box; handlers
/// downcast at dispatch time and simply do not match when the runtime type
/// differs.
pub type SagaState = Box<dyn Any + Send>;

/// A declarative instruction executed by the saga engine, never by the
/// handler itself.
///
/// Effects of one transition execute strictly in list order. `Dispatch`
/// re-enters the store's dispatch path, visible to the whole pipeline.
/// `Delay` suspends only the current transition's effect sequence.
/// `StartSaga` is sugar for dispatching the given trigger action.
pub enum SagaEffect {
    Dispatch(AnyAction),
    Delay(Duration),
    StartSaga(AnyAction),
}

impl fmt::Debug for SagaEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaEffect::Dispatch(action) => f.debug_tuple("Dispatch").field(action).finish(),
            SagaEffect::Delay(d) => f.debug_tuple("Delay").field(d).finish(),
            SagaEffect::StartSaga(action) => f.debug_tuple("StartSaga").field(action).finish(),
        }
    }
}

/// Outcome of a saga handler.
///
/// `Continue` replaces the instance's state (or creates the instance, for
/// a start handler) and executes the effects. `Complete` removes the
/// instance regardless of effects; the effects still execute.
pub enum SagaTransition {
    Continue {
        state: SagaState,
        effects: Vec<SagaEffect>,
    },
    Complete {
        effects: Vec<SagaEffect>,
    },
}

impl SagaTransition {
    /// Continue with a new saga state and the given effects.
    pub fn advance<T: Any + Send>(state: T, effects: Vec<SagaEffect>) -> Self {
        SagaTransition::Continue {
            state: Box::new(state),
            effects,
        }
    }

    /// Complete the saga, executing the given effects.
    pub fn complete(effects: Vec<SagaEffect>) -> Self {
        SagaTransition::Complete { effects }
    }
}

impl fmt::Debug for SagaTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SagaTransition::Continue { effects, .. } => f
                .debug_struct("Continue")
                .field("effects", &effects.len())
                .finish_non_exhaustive(),
            SagaTransition::Complete { effects } => f
                .debug_struct("Complete")
                .field("effects", &effects.len())
                .finish(),
        }
    }
}
