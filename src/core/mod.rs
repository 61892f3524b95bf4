//! Core types for the rheo state-management runtime.
//!
//! This module provides the fundamental building blocks of the dispatch
//! pipeline:
//!
//! # Domain Model
//! - [`Action`]: an immutable event value dispatched into the store
//! - [`AnyAction`]: the type-erased form actions take in the pipeline
//! - [`StateModel`]: an immutable state snapshot owned by the store
//! - [`Reducer`]: pure function `(state, action) -> state`
//!
//! # Serialization
//! - [`serialize_value`] / [`deserialize_value`]: convert snapshots to and
//!   from bytes for the storage contract
//! - [`hash_state`]: stable fingerprints for change detection
//!
//! # Error Handling
//! - [`CoreError`]: core error type with proper error chains
//! - [`Result<T>`]: type alias for results using `CoreError`

mod action;
mod error;
mod serialization;
mod state;

pub use action::{Action, AnyAction};
pub use error::{CoreError, Result};
pub use serialization::{deserialize_value, hash_state, serialize_value};
pub use state::{Reducer, StateModel};
