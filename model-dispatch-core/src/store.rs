//! Model store: the reference host for combined models
//!
//! [`ModelStore`] merges models into one state tree, applies every model
//! reducer on dispatch, feeds dispatched envelopes to effect task loops, and
//! serves as the [`EffectToolkit`] effects run against.
//!
//! # Example
//!
//! ```ignore
//! let store = ModelStore::new([counter, articles])?;
//! let tasks = store.run_tasks()?;
//! let actions = store.bound_actions();
//!
//! actions.invoke("counter.increment", Value::empty_map())?.await?;
//! assert_eq!(store.state().get_path("counter.count").and_then(Value::as_i64), Some(1));
//!
//! tasks.join().await;
//! ```

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::action::ActionEnvelope;
use crate::bind::{bind_model_action_creators, ActionCreatorTree, BoundActionTree, Dispatch};
use crate::config::StoreConfig;
use crate::effect::{EffectToolkit, Toolkit};
use crate::error::ModelError;
use crate::logger::SharedActionLog;
use crate::model::Model;
use crate::namespace;
use crate::tasks::TaskHost;
use crate::value::{Map, Value};

/// Middleware trait for intercepting dispatches
///
/// Implement this trait to add logging, persistence, or other
/// cross-cutting concerns to a store. Middleware runs under the store's
/// dispatch lock and must not dispatch itself.
pub trait Middleware: Send {
    /// Called before reducers see the envelope
    fn before(&mut self, envelope: &ActionEnvelope);

    /// Called after every reducer ran
    fn after(&mut self, envelope: &ActionEnvelope, state_changed: bool);
}

/// A no-op middleware that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMiddleware;

impl Middleware for NoopMiddleware {
    fn before(&mut self, _envelope: &ActionEnvelope) {}
    fn after(&mut self, _envelope: &ActionEnvelope, _state_changed: bool) {}
}

/// Compose multiple middleware into a single middleware
#[derive(Default)]
pub struct ComposedMiddleware {
    middlewares: Vec<Box<dyn Middleware>>,
}

impl fmt::Debug for ComposedMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposedMiddleware")
            .field("middlewares_count", &self.middlewares.len())
            .finish()
    }
}

impl ComposedMiddleware {
    /// Create a new composed middleware
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the composition
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Box::new(middleware));
    }

    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.add(middleware);
        self
    }
}

impl Middleware for ComposedMiddleware {
    fn before(&mut self, envelope: &ActionEnvelope) {
        for middleware in &mut self.middlewares {
            middleware.before(envelope);
        }
    }

    fn after(&mut self, envelope: &ActionEnvelope, state_changed: bool) {
        // Call in reverse order for proper nesting
        for middleware in self.middlewares.iter_mut().rev() {
            middleware.after(envelope, state_changed);
        }
    }
}

struct StoreCore {
    state: Value,
    middleware: ComposedMiddleware,
    subscribers: Vec<mpsc::UnboundedSender<ActionEnvelope>>,
}

struct StoreInner {
    models: Vec<Model>,
    creators: ActionCreatorTree,
    core: Mutex<StoreCore>,
    context: Mutex<Map>,
    action_log: Option<SharedActionLog>,
    tasks: Mutex<Option<CancellationToken>>,
}

/// Combined models sharing one state tree.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct ModelStore {
    inner: Arc<StoreInner>,
}

impl ModelStore {
    /// Combine `models` with the default configuration.
    pub fn new(models: impl IntoIterator<Item = Model>) -> Result<Self, ModelError> {
        Self::with_config(models, StoreConfig::default())
    }

    pub fn with_config(
        models: impl IntoIterator<Item = Model>,
        config: StoreConfig,
    ) -> Result<Self, ModelError> {
        Self::with_middleware(models, config, NoopMiddleware)
    }

    /// Combine `models`, running `middleware` after the configured action
    /// logger on every dispatch.
    ///
    /// Fails when two models share a namespace or one namespace is nested in
    /// another. On success every model is marked loaded.
    pub fn with_middleware<M: Middleware + 'static>(
        models: impl IntoIterator<Item = Model>,
        config: StoreConfig,
        middleware: M,
    ) -> Result<Self, ModelError> {
        let models: Vec<Model> = models.into_iter().collect();
        check_namespaces(&models)?;

        let mut state = Value::empty_map();
        for model in &models {
            state
                .set_path(model.namespace(), model.initial_state().clone())
                .map_err(|segment| ModelError::StatePathConflict {
                    namespace: model.namespace().to_string(),
                    segment,
                })?;
        }
        let creators = ActionCreatorTree::from_models(&models)?;

        let logger = config.logger_middleware();
        let action_log = logger.log();
        let middleware = ComposedMiddleware::new().with(logger).with(middleware);

        for model in &models {
            model.mark_loaded();
        }
        tracing::debug!(
            models = models.len(),
            namespaces = ?models.iter().map(Model::namespace).collect::<Vec<_>>(),
            "Store created"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                models,
                creators,
                core: Mutex::new(StoreCore {
                    state,
                    middleware,
                    subscribers: Vec::new(),
                }),
                context: Mutex::new(Map::new()),
                action_log,
                tasks: Mutex::new(None),
            }),
        })
    }

    pub fn models(&self) -> &[Model] {
        &self.inner.models
    }

    pub fn model(&self, namespace: &str) -> Option<&Model> {
        self.inner
            .models
            .iter()
            .find(|model| model.namespace() == namespace)
    }

    /// Apply `envelope` to every model and forward it to subscribers.
    ///
    /// Mutations are applied before this returns. Returns whether the state
    /// changed. A panicking mutation propagates and leaves the state as it
    /// was before the call.
    pub fn dispatch(&self, envelope: ActionEnvelope) -> bool {
        let mut core = self.inner.core.lock();
        core.middleware.before(&envelope);

        let mut next = core.state.clone();
        let mut changed = false;
        for model in &self.inner.models {
            let reducer = model.model_reducer();
            if !reducer.handles(envelope.action_type()) {
                continue;
            }
            let slice = next.get_path(model.namespace());
            let reduced = reducer.reduce_or_init(slice, &envelope);
            if slice.is_some_and(|slice| slice.same(&reduced)) {
                continue;
            }
            match next.set_path(model.namespace(), reduced) {
                Ok(()) => changed = true,
                Err(segment) => tracing::error!(
                    namespace = %model.namespace(),
                    segment = %segment,
                    "State slot is not a map; mutation result dropped"
                ),
            }
        }
        if changed {
            core.state = next;
        }

        core.middleware.after(&envelope, changed);
        core.subscribers
            .retain(|subscriber| subscriber.send(envelope.clone()).is_ok());
        changed
    }

    /// Current whole state.
    pub fn state(&self) -> Value {
        self.inner.core.lock().state.clone()
    }

    /// Receiver of every envelope dispatched from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ActionEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.core.lock().subscribers.push(tx);
        rx
    }

    /// Dispatch primitive for [`bind_model_action_creators`].
    pub fn dispatcher(&self) -> Dispatch {
        let store = self.clone();
        Arc::new(move |envelope| {
            store.dispatch(envelope);
        })
    }

    /// Nested tree of every model's creators.
    pub fn action_creators(&self) -> &ActionCreatorTree {
        &self.inner.creators
    }

    /// Every model's creators bound to this store.
    pub fn bound_actions(&self) -> BoundActionTree {
        bind_model_action_creators(&self.inner.creators, self.dispatcher())
    }

    /// Run the selector at `path` (`"{namespace}.{selector}"`).
    pub fn select(&self, path: &str, args: &[Value]) -> Result<Value, ModelError> {
        let (namespace, name) = path.rsplit_once('.').unwrap_or(("", path));
        let model = self.model(namespace).ok_or_else(|| ModelError::UnknownModel {
            namespace: namespace.to_string(),
        })?;
        model.model_selectors().select(name, &self.state(), args)
    }

    /// Recent dispatches, when the config enabled the action log.
    pub fn action_log(&self) -> Option<SharedActionLog> {
        self.inner.action_log.clone()
    }

    /// This store as the toolkit handed to effect bodies.
    pub fn toolkit(&self) -> Toolkit {
        Arc::new(self.clone())
    }

    /// Activate the task descriptors of every model on the current runtime.
    ///
    /// Fails with [`ModelError::TasksAlreadyRunning`] while a host returned
    /// by an earlier call is still alive; once it is shut down or dropped
    /// tasks can be started again.
    pub fn run_tasks(&self) -> Result<TaskHost, ModelError> {
        let mut active = self.inner.tasks.lock();
        if active.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return Err(ModelError::TasksAlreadyRunning);
        }

        let mut host = TaskHost::new();
        for model in &self.inner.models {
            for descriptor in model.task_descriptors() {
                host.spawn(descriptor, self.subscribe(), self.toolkit());
            }
        }
        *active = Some(host.token());
        tracing::debug!(tasks = host.len(), "Task host started");
        Ok(host)
    }
}

impl EffectToolkit for ModelStore {
    fn put(&self, envelope: ActionEnvelope) {
        self.dispatch(envelope);
    }

    fn state(&self) -> Value {
        ModelStore::state(self)
    }

    fn take(&self, action_type: &str) -> BoxFuture<'static, Option<ActionEnvelope>> {
        let mut subscription = self.subscribe();
        let wanted = action_type.to_string();
        Box::pin(async move {
            while let Some(envelope) = subscription.recv().await {
                if envelope.action_type() == wanted {
                    return Some(envelope);
                }
            }
            None
        })
    }

    fn get_context(&self, key: &str) -> Option<Value> {
        self.inner.context.lock().get(key).cloned()
    }

    fn set_context(&self, key: &str, value: Value) {
        self.inner.context.lock().insert(key.to_string(), value);
    }
}

impl fmt::Debug for ModelStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelStore")
            .field("models", &self.inner.models)
            .finish()
    }
}

fn check_namespaces(models: &[Model]) -> Result<(), ModelError> {
    for (i, a) in models.iter().enumerate() {
        for b in &models[i + 1..] {
            let (a, b) = (a.namespace(), b.namespace());
            if a == b {
                return Err(ModelError::DuplicateNamespace {
                    namespace: a.to_string(),
                });
            }
            let nested = if namespace::is_nested_in(b, a) {
                Some((a, b))
            } else if namespace::is_nested_in(a, b) {
                Some((b, a))
            } else {
                None
            };
            if let Some((outer, inner)) = nested {
                return Err(ModelError::OverlappingNamespace {
                    outer: outer.to_string(),
                    inner: inner.to_string(),
                });
            }
        }
    }
    Ok(())
}
