use super::effect::{SagaState, SagaTransition};
use super::SagaError;
use crate::core::{deserialize_value, serialize_value, Action, AnyAction, CoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

type HandlerResult = Option<Result<SagaTransition, SagaError>>;
type StartHandler = Box<dyn Fn(&AnyAction) -> HandlerResult + Send + Sync>;
type RunningHandler = Box<dyn Fn(&AnyAction, &SagaState) -> HandlerResult + Send + Sync>;

pub(crate) struct SagaStateCodec {
    pub(crate) encode: Box<dyn Fn(&SagaState) -> crate::core::Result<Vec<u8>> + Send + Sync>,
    pub(crate) decode: Box<dyn Fn(&[u8]) -> crate::core::Result<SagaState> + Send + Sync>,
}

/// A named, immutable description of a saga state machine.
///
/// A definition holds an ordered list of start handlers (trigger type plus
/// optional guard predicate) and an ordered list of running handlers
/// (trigger type plus optional condition over the current saga state).
/// For each dispatched action the *first* matching handler wins; at most
/// one new instance is created per action per saga.
///
/// Definitions are registered at store-configuration time and never
/// mutated afterward.
///
/// # Example
///
/// ```ignore
/// let checkout = SagaDefinition::new("checkout")
///     .on_start(|t: &OrderPlaced| {
///         SagaTransition::advance(
///             CheckoutState { order: t.order_id },
///             vec![SagaEffect::Dispatch(Arc::new(ReserveStock { order: t.order_id }))],
///         )
///     })
///     .on_action(|p: &PaymentSettled, st: &CheckoutState| {
///         SagaTransition::complete(vec![SagaEffect::Dispatch(Arc::new(ShipOrder {
///             order: st.order,
///         }))])
///     })
///     .persist_state::<CheckoutState>();
/// ```
pub struct SagaDefinition {
    name: String,
    start_handlers: Vec<StartHandler>,
    running_handlers: Vec<RunningHandler>,
    codec: Option<SagaStateCodec>,
}

impl SagaDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_handlers: Vec::new(),
            running_handlers: Vec::new(),
            codec: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a start handler for trigger type `A`.
    pub fn on_start<A, F>(self, handler: F) -> Self
    where
        A: Action,
        F: Fn(&A) -> SagaTransition + Send + Sync + 'static,
    {
        self.on_start_when(|_: &A| true, handler)
    }

    /// Registers a guarded start handler: it matches only when the guard
    /// predicate returns true for the trigger.
    pub fn on_start_when<A, P, F>(mut self, guard: P, handler: F) -> Self
    where
        A: Action,
        P: Fn(&A) -> bool + Send + Sync + 'static,
        F: Fn(&A) -> SagaTransition + Send + Sync + 'static,
    {
        self.start_handlers.push(Box::new(move |action| {
            let trigger = action.downcast_ref::<A>()?;
            if !guard(trigger) {
                return None;
            }
            Some(Ok(handler(trigger)))
        }));
        self
    }

    /// Registers a fallible start handler; an `Err` is logged by the
    /// engine and isolated from sibling sagas.
    pub fn on_start_try<A, F>(mut self, handler: F) -> Self
    where
        A: Action,
        F: Fn(&A) -> Result<SagaTransition, SagaError> + Send + Sync + 'static,
    {
        self.start_handlers.push(Box::new(move |action| {
            let trigger = action.downcast_ref::<A>()?;
            Some(handler(trigger))
        }));
        self
    }

    /// Registers a running handler for trigger type `A` and saga state
    /// type `St`. The handler matches only on instances whose state holds
    /// an `St`.
    pub fn on_action<A, St, F>(self, handler: F) -> Self
    where
        A: Action,
        St: Send + 'static,
        F: Fn(&A, &St) -> SagaTransition + Send + Sync + 'static,
    {
        self.on_action_when(|_: &A, _: &St| true, handler)
    }

    /// Registers a conditional running handler: it matches only when the
    /// condition holds for the trigger and the instance's current state.
    pub fn on_action_when<A, St, P, F>(mut self, condition: P, handler: F) -> Self
    where
        A: Action,
        St: Send + 'static,
        P: Fn(&A, &St) -> bool + Send + Sync + 'static,
        F: Fn(&A, &St) -> SagaTransition + Send + Sync + 'static,
    {
        self.running_handlers.push(Box::new(move |action, state| {
            let trigger = action.downcast_ref::<A>()?;
            let state = state.downcast_ref::<St>()?;
            if !condition(trigger, state) {
                return None;
            }
            Some(Ok(handler(trigger, state)))
        }));
        self
    }

    /// Registers a fallible running handler.
    pub fn on_action_try<A, St, F>(mut self, handler: F) -> Self
    where
        A: Action,
        St: Send + 'static,
        F: Fn(&A, &St) -> Result<SagaTransition, SagaError> + Send + Sync + 'static,
    {
        self.running_handlers.push(Box::new(move |action, state| {
            let trigger = action.downcast_ref::<A>()?;
            let state = state.downcast_ref::<St>()?;
            Some(handler(trigger, state))
        }));
        self
    }

    /// Enables persistence for this saga, fixing `St` as the serialized
    /// saga-state type. Required when the engine is configured with a
    /// saga storage backend; instances of definitions without a codec are
    /// skipped by the persistence hooks.
    pub fn persist_state<St>(mut self) -> Self
    where
        St: Serialize + DeserializeOwned + Send + 'static,
    {
        self.codec = Some(SagaStateCodec {
            encode: Box::new(|state| {
                let typed = state.downcast_ref::<St>().ok_or(CoreError::TypeMismatch {
                    expected: std::any::type_name::<St>(),
                })?;
                serialize_value(typed)
            }),
            decode: Box::new(|bytes| {
                let typed: St = deserialize_value(bytes)?;
                Ok(Box::new(typed) as SagaState)
            }),
        });
        self
    }

    pub(crate) fn codec(&self) -> Option<&SagaStateCodec> {
        self.codec.as_ref()
    }

    /// First start handler matching the action, if any.
    pub(crate) fn evaluate_start(&self, action: &AnyAction) -> HandlerResult {
        self.start_handlers.iter().find_map(|h| h(action))
    }

    /// First running handler matching the action and instance state, if
    /// any.
    pub(crate) fn evaluate_running(&self, action: &AnyAction, state: &SagaState) -> HandlerResult {
        self.running_handlers.iter().find_map(|h| h(action, state))
    }
}

impl fmt::Debug for SagaDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaDefinition")
            .field("name", &self.name)
            .field("start_handlers", &self.start_handlers.len())
            .field("running_handlers", &self.running_handlers.len())
            .field("persisted", &self.codec.is_some())
            .finish()
    }
}
