//! Core types for model-dispatch
//!
//! This crate turns independent *models* into the pieces a Redux-style host
//! needs. A model declares a namespaced slice of state with synchronous
//! mutations, asynchronous effects and selectors; from it the crate derives
//! action identifiers, action creators, an immutable reducer, memoized
//! selectors and effect task descriptors.
//!
//! # Core Concepts
//!
//! - **Model**: namespace, initial state and handler tables, frozen at build time
//! - **ActionEnvelope**: `"{namespace}.{handler}"` identifier, payload, completion hooks
//! - **Reducer**: applies a mutation to a copy-on-write draft of the slice
//! - **Selectors**: memoized on the identity of the slice and arguments
//! - **Effects**: async handlers run as tokio tasks, settling the caller's [`Completion`]
//! - **ModelStore**: reference host combining models into one state tree
//!
//! # Basic Example
//!
//! ```ignore
//! use model_dispatch_core::prelude::*;
//!
//! let counter = Model::builder("counter")
//!     .state(Value::from_iter([("count".to_string(), Value::from(0))]))
//!     .mutation("increment", |draft, _| {
//!         let count = draft["count"].as_i64().unwrap_or(0);
//!         draft["count"] = Value::from(count + 1);
//!     })
//!     .effect("tryToIncrement", |_, toolkit, actions| async move {
//!         toolkit.put(actions.create("increment", Value::empty_map())?);
//!         Ok(Value::Null)
//!     })
//!     .build()?;
//!
//! let store = ModelStore::new([counter])?;
//! let _tasks = store.run_tasks()?;
//! let actions = store.bound_actions();
//!
//! actions.invoke("counter.tryToIncrement", Value::empty_map())?.await?;
//! assert_eq!(store.state().get_path("counter.count").and_then(Value::as_i64), Some(1));
//! ```
//!
//! # Effect Completion
//!
//! Bound action creators return a [`Completion`]. For mutations it is already
//! resolved when returned, since the store applies mutations synchronously.
//! For effects it settles once the effect task finishes: resolved with the
//! effect's value, or rejected with the very [`EffectFailure`] it returned.
//! Envelopes dispatched without completion hooks are refused by effect tasks
//! with [`ModelError::NonCompatibleAction`].

pub mod action;
pub mod bind;
pub mod config;
pub mod effect;
pub mod error;
pub mod logger;
pub mod model;
pub mod namespace;
pub mod reducer;
pub mod selector;
pub mod store;
pub mod tasks;
pub mod testing;
pub mod value;

// Value exports
pub use value::{produce, Map, Value};

// Error exports
pub use error::{EffectFailure, ModelError};

// Model exports
pub use action::{action_type, ActionEnvelope, CompletionHooks, EffectResult, HandlerKind};
pub use model::{ActionCreator, ActionCreators, Model, ModelBuilder};
pub use reducer::{ModelReducer, MutationFn};
pub use selector::{MemoizedSelector, ModelSelectors, SelectorFn};

// Effect exports
pub use effect::{
    retry, EffectFn, EffectPolicy, EffectToolkit, ModelEffects, Toolkit, WrappedEffect,
};
pub use tasks::{run_effect_task, TaskDescriptor, TaskHost};

// Binding exports
pub use bind::{
    bind_model_action_creators, ActionCreatorTree, BoundActionCreator, BoundActionTree,
    Completion, Dispatch,
};

// Store exports
pub use config::StoreConfig;
pub use logger::{
    ActionLog, ActionLogConfig, ActionLogEntry, ActionLoggerConfig, ActionLoggerMiddleware,
    SharedActionLog,
};
pub use store::{ComposedMiddleware, Middleware, ModelStore, NoopMiddleware};

// Testing exports
pub use testing::{DispatchHarness, RecordingToolkit};

#[cfg(feature = "testing-time")]
pub use testing::{advance_time, pause_time, resume_time};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{ActionEnvelope, HandlerKind};
    pub use crate::bind::{bind_model_action_creators, ActionCreatorTree, BoundActionTree, Completion};
    pub use crate::config::StoreConfig;
    pub use crate::effect::{retry, EffectPolicy, EffectToolkit, Toolkit};
    pub use crate::error::{EffectFailure, ModelError};
    pub use crate::logger::{ActionLoggerConfig, ActionLoggerMiddleware};
    pub use crate::model::{ActionCreators, Model};
    pub use crate::store::{Middleware, ModelStore};
    pub use crate::tasks::TaskHost;
    pub use crate::value::{produce, Value};
}
