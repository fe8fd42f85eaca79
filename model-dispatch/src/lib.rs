//! model-dispatch: namespaced models for Redux-style stores
//!
//! Declare a model once, with its slice of state, its mutations, effects and
//! selectors. Combine models into a [`ModelStore`], start their effect tasks,
//! and call bound action creators that return awaitable completions.
//!
//! # Example
//! ```ignore
//! use model_dispatch::prelude::*;
//!
//! let articles = Model::builder("projectA.articles")
//!     .state(Value::from_iter([("items".to_string(), Value::empty_list())]))
//!     .mutation("saveAll", |draft, payload| draft["items"] = payload.clone())
//!     .effect("fetchAll", |_, toolkit, actions| async move {
//!         let items = api::fetch_articles().await?;
//!         toolkit.put(actions.create("saveAll", items)?);
//!         Ok(Value::Null)
//!     })
//!     .selector("count", |slice, _, _| Value::from(slice["items"].len() as i64))
//!     .build()?;
//!
//! let store = ModelStore::new([articles])?;
//! let _tasks = store.run_tasks()?;
//! store.bound_actions().invoke("projectA.articles.fetchAll", Value::empty_map())?.await?;
//! let count = store.select("projectA.articles.count", &[])?;
//! ```

// Re-export everything from core
pub use model_dispatch_core::*;

/// Prelude for convenient imports
pub mod prelude {
    // Models
    pub use model_dispatch_core::{ActionCreators, ActionEnvelope, HandlerKind, Model};

    // State
    pub use model_dispatch_core::{produce, Value};

    // Errors
    pub use model_dispatch_core::{EffectFailure, ModelError};

    // Effects
    pub use model_dispatch_core::{retry, EffectPolicy, EffectToolkit, TaskHost, Toolkit};

    // Binding
    pub use model_dispatch_core::{
        bind_model_action_creators, ActionCreatorTree, BoundActionTree, Completion,
    };

    // Store
    pub use model_dispatch_core::{
        ActionLoggerConfig, ActionLoggerMiddleware, Middleware, ModelStore, StoreConfig,
    };
}
