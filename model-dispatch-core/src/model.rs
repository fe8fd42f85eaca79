//! Models: namespaced state slices with mutations, effects and selectors
//!
//! A [`Model`] is declared once with [`Model::builder`] and frozen by
//! [`ModelBuilder::build`]. Everything a host needs is derived from it:
//! action creators, the reducer, the memoized selector table and one task
//! descriptor per effect.
//!
//! # Example
//!
//! ```
//! use model_dispatch_core::{Model, Value};
//!
//! let counter = Model::builder("counter")
//!     .state(Value::from_iter([("count".to_string(), Value::from(0))]))
//!     .mutation("increment", |draft, _payload| {
//!         let count = draft["count"].as_i64().unwrap_or(0);
//!         draft["count"] = Value::from(count + 1);
//!     })
//!     .effect("tryToIncrement", |_payload, toolkit, actions| async move {
//!         toolkit.put(actions.create("increment", Value::empty_map())?);
//!         Ok(Value::Null)
//!     })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(counter.action_type("increment"), "counter.increment");
//! assert!(!counter.is_loaded());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use once_cell::sync::OnceCell;

use crate::action::{self, ActionEnvelope, CompletionHooks, EffectResult, HandlerKind};
use crate::effect::{EffectFn, EffectPolicy, ModelEffects, Toolkit, WrappedEffect};
use crate::error::ModelError;
use crate::namespace;
use crate::reducer::{ModelReducer, MutationFn, MutationTable};
use crate::selector::{MemoizedSelector, ModelSelectors, SelectorFn};
use crate::tasks::TaskDescriptor;
use crate::value::Value;

/// Namespace and readiness flag shared by a model and everything derived
/// from it.
#[derive(Debug)]
pub(crate) struct ModelCore {
    namespace: String,
    loaded: AtomicBool,
}

impl ModelCore {
    pub(crate) fn new(namespace: String) -> Self {
        Self {
            namespace,
            loaded: AtomicBool::new(false),
        }
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub(crate) fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::Release);
    }

    pub(crate) fn ensure_loaded(&self) -> Result<(), ModelError> {
        if self.is_loaded() {
            Ok(())
        } else {
            Err(ModelError::ModelNotLoaded {
                namespace: self.namespace.clone(),
            })
        }
    }
}

#[derive(Clone)]
struct EffectSpec {
    body: EffectFn,
    policy: EffectPolicy,
}

/// Declares a model. Nothing is validated until [`build`](Self::build).
pub struct ModelBuilder {
    namespace: Value,
    state: Value,
    selectors: Vec<(String, SelectorFn)>,
    mutations: Vec<(String, MutationFn)>,
    effects: Vec<(String, EffectSpec)>,
}

impl ModelBuilder {
    /// Initial state of the slice. Defaults to `Null`.
    pub fn state(mut self, state: impl Into<Value>) -> Self {
        self.state = state.into();
        self
    }

    /// Register a selector `(slice, args, whole_state) -> output`.
    ///
    /// Registering the same name twice keeps the later body.
    pub fn selector<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Value, &[Value], &Value) -> Value + Send + Sync + 'static,
    {
        self.selectors.push((name.into(), Arc::new(body)));
        self
    }

    /// Register a mutation that edits a draft of the slice in place.
    pub fn mutation<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Value, &Value) + Send + Sync + 'static,
    {
        self.mutations.push((name.into(), Arc::new(body)));
        self
    }

    /// Register an effect run with the default [`EffectPolicy::Every`].
    pub fn effect<F, Fut>(self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Value, Toolkit, ActionCreators) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EffectResult> + Send + 'static,
    {
        self.effect_with_policy(name, EffectPolicy::Every, body)
    }

    pub fn effect_with_policy<F, Fut>(
        mut self,
        name: impl Into<String>,
        policy: EffectPolicy,
        body: F,
    ) -> Self
    where
        F: Fn(Value, Toolkit, ActionCreators) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EffectResult> + Send + 'static,
    {
        let body: EffectFn =
            Arc::new(move |payload, toolkit, creators| body(payload, toolkit, creators).boxed());
        self.effects.push((name.into(), EffectSpec { body, policy }));
        self
    }

    /// Validate and freeze the declaration.
    ///
    /// Fails when the namespace is not a string, is empty or malformed, or
    /// when a handler name appears more than once across mutations and
    /// effects.
    pub fn build(self) -> Result<Model, ModelError> {
        let namespace = namespace::validate(&self.namespace)?;

        let names: Vec<String> = self
            .mutations
            .iter()
            .map(|(name, _)| name.clone())
            .chain(self.effects.iter().map(|(name, _)| name.clone()))
            .collect();
        let mut seen = BTreeSet::new();
        if !names.iter().all(|name| seen.insert(name.as_str())) {
            return Err(ModelError::DuplicateActionName { namespace, names });
        }

        tracing::debug!(
            namespace = %namespace,
            mutations = self.mutations.len(),
            effects = self.effects.len(),
            selectors = self.selectors.len(),
            "Model created"
        );

        Ok(Model {
            inner: Arc::new(ModelInner {
                core: Arc::new(ModelCore::new(namespace)),
                initial_state: self.state,
                selectors: self.selectors.into_iter().collect(),
                mutations: Arc::new(self.mutations.into_iter().collect()),
                effects: self.effects.into_iter().collect(),
                creators: OnceCell::new(),
                selector_table: OnceCell::new(),
                reducer: OnceCell::new(),
                effect_table: OnceCell::new(),
            }),
        })
    }
}

struct ModelInner {
    core: Arc<ModelCore>,
    initial_state: Value,
    selectors: BTreeMap<String, SelectorFn>,
    mutations: Arc<MutationTable>,
    effects: BTreeMap<String, EffectSpec>,
    creators: OnceCell<ActionCreators>,
    selector_table: OnceCell<ModelSelectors>,
    reducer: OnceCell<ModelReducer>,
    effect_table: OnceCell<ModelEffects>,
}

/// A frozen model declaration. Clones share the same model.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl Model {
    pub fn builder(namespace: impl Into<Value>) -> ModelBuilder {
        ModelBuilder {
            namespace: namespace.into(),
            state: Value::Null,
            selectors: Vec::new(),
            mutations: Vec::new(),
            effects: Vec::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        self.inner.core.namespace()
    }

    pub fn initial_state(&self) -> &Value {
        &self.inner.initial_state
    }

    /// Whether a host has combined this model.
    pub fn is_loaded(&self) -> bool {
        self.inner.core.is_loaded()
    }

    /// Flag the model as combined. Called by hosts during aggregation.
    pub fn mark_loaded(&self) {
        self.inner.core.mark_loaded();
    }

    /// `"{namespace}.{name}"`
    pub fn action_type(&self, name: &str) -> String {
        action::action_type(self.namespace(), name)
    }

    pub fn selector_names(&self) -> impl Iterator<Item = &str> {
        self.inner.selectors.keys().map(String::as_str)
    }

    pub fn mutation_names(&self) -> impl Iterator<Item = &str> {
        self.inner.mutations.keys().map(String::as_str)
    }

    pub fn effect_names(&self) -> impl Iterator<Item = &str> {
        self.inner.effects.keys().map(String::as_str)
    }

    /// One creator per mutation and per effect.
    pub fn action_creators(&self) -> &ActionCreators {
        self.inner.creators.get_or_init(|| {
            let core = &self.inner.core;
            let creator = |name: &str, kind| {
                let creator = ActionCreator {
                    core: core.clone(),
                    name: name.to_string(),
                    action_type: self.action_type(name),
                    kind,
                };
                (name.to_string(), creator)
            };
            let creators = self
                .mutation_names()
                .map(|name| creator(name, HandlerKind::Mutation))
                .chain(self.effect_names().map(|name| creator(name, HandlerKind::Effect)))
                .collect();
            ActionCreators {
                namespace: self.namespace().to_string(),
                creators: Arc::new(creators),
            }
        })
    }

    /// Memoized selectors, built once per model.
    pub fn model_selectors(&self) -> &ModelSelectors {
        self.inner.selector_table.get_or_init(|| {
            let selectors = self
                .inner
                .selectors
                .iter()
                .map(|(name, body)| {
                    let selector =
                        MemoizedSelector::new(self.inner.core.clone(), name.clone(), body.clone());
                    (name.clone(), selector)
                })
                .collect();
            ModelSelectors::new(self.namespace().to_string(), selectors)
        })
    }

    /// The slice reducer, built once per model.
    pub fn model_reducer(&self) -> &ModelReducer {
        self.inner.reducer.get_or_init(|| {
            ModelReducer::new(
                self.namespace().to_string(),
                self.inner.initial_state.clone(),
                self.inner.mutations.clone(),
            )
        })
    }

    /// Effects bound to this model's action creators, built once per model.
    pub fn model_effects(&self) -> &ModelEffects {
        self.inner.effect_table.get_or_init(|| {
            let creators = self.action_creators();
            let effects = self
                .inner
                .effects
                .iter()
                .map(|(name, spec)| {
                    let effect = WrappedEffect::new(
                        name.clone(),
                        self.action_type(name),
                        spec.body.clone(),
                        creators.clone(),
                        spec.policy,
                    );
                    (name.clone(), effect)
                })
                .collect();
            ModelEffects::new(self.namespace().to_string(), effects)
        })
    }

    /// One task descriptor per effect, ready for a host to activate.
    pub fn task_descriptors(&self) -> Vec<TaskDescriptor> {
        self.model_effects()
            .iter()
            .map(|effect| TaskDescriptor::new(effect.clone()))
            .collect()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("namespace", &self.namespace())
            .field("loaded", &self.is_loaded())
            .field("mutations", &self.mutation_names().collect::<Vec<_>>())
            .field("effects", &self.effect_names().collect::<Vec<_>>())
            .field("selectors", &self.selector_names().collect::<Vec<_>>())
            .finish()
    }
}

/// Builds envelopes for one handler of a model.
#[derive(Clone, Debug)]
pub struct ActionCreator {
    core: Arc<ModelCore>,
    name: String,
    action_type: String,
    kind: HandlerKind,
}

impl ActionCreator {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        self.core.namespace()
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    pub fn is_effect(&self) -> bool {
        self.kind.is_effect()
    }

    /// Envelope without completion hooks.
    pub fn create(&self, payload: impl Into<Value>) -> Result<ActionEnvelope, ModelError> {
        self.create_with_hooks(payload, None)
    }

    /// Envelope with an empty map payload.
    pub fn create_empty(&self) -> Result<ActionEnvelope, ModelError> {
        self.create(Value::empty_map())
    }

    /// Fails with [`ModelError::ModelNotLoaded`] until the model is combined.
    pub fn create_with_hooks(
        &self,
        payload: impl Into<Value>,
        hooks: Option<CompletionHooks>,
    ) -> Result<ActionEnvelope, ModelError> {
        self.core.ensure_loaded()?;
        let envelope = ActionEnvelope::new(self.action_type.clone(), payload.into());
        Ok(match hooks {
            Some(hooks) => envelope.with_hooks(hooks),
            None => envelope,
        })
    }
}

/// Action creators of a model keyed by handler name.
#[derive(Clone, Debug)]
pub struct ActionCreators {
    namespace: String,
    creators: Arc<BTreeMap<String, ActionCreator>>,
}

impl ActionCreators {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get(&self, name: &str) -> Option<&ActionCreator> {
        self.creators.get(name)
    }

    /// Create an envelope for handler `name`.
    pub fn create(&self, name: &str, payload: impl Into<Value>) -> Result<ActionEnvelope, ModelError> {
        self.creators
            .get(name)
            .ok_or_else(|| ModelError::UnknownAction {
                namespace: self.namespace.clone(),
                name: name.to_string(),
            })?
            .create(payload)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionCreator> {
        self.creators.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.creators.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.creators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.creators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> ModelBuilder {
        Model::builder("counter")
            .state(Value::from_iter([("count".to_string(), Value::from(0))]))
            .mutation("increment", |draft, _| {
                let count = draft["count"].as_i64().unwrap_or(0);
                draft["count"] = Value::from(count + 1);
            })
            .effect("tryToIncrement", |_, _, _| async { Ok(Value::Null) })
            .selector("count", |slice, _, _| slice["count"].clone())
    }

    #[test]
    fn test_build_and_accessors() {
        let model = counter().build().unwrap();
        assert_eq!(model.namespace(), "counter");
        assert_eq!(model.initial_state()["count"].as_i64(), Some(0));
        assert_eq!(model.mutation_names().collect::<Vec<_>>(), ["increment"]);
        assert_eq!(model.effect_names().collect::<Vec<_>>(), ["tryToIncrement"]);
        assert_eq!(model.selector_names().collect::<Vec<_>>(), ["count"]);
        assert_eq!(model.action_type("foo"), "counter.foo");
        assert!(!model.is_loaded());
    }

    #[test]
    fn test_namespace_errors_propagate() {
        assert!(matches!(
            Model::builder(Value::from(3)).build(),
            Err(ModelError::NamespaceNotAString { found: "int" })
        ));
        assert!(matches!(
            Model::builder("").build(),
            Err(ModelError::EmptyNamespace)
        ));
        assert!(matches!(
            Model::builder("a..b").build(),
            Err(ModelError::InvalidNamespace { .. })
        ));
    }

    #[test]
    fn test_mutation_and_effect_names_must_differ() {
        let err = Model::builder("articles")
            .mutation("whatever", |_, _| {})
            .effect("whatever", |_, _, _| async { Ok(Value::Null) })
            .build()
            .unwrap_err();
        match err {
            ModelError::DuplicateActionName { namespace, names } => {
                assert_eq!(namespace, "articles");
                assert_eq!(names, ["whatever", "whatever"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_repeated_mutation_name_rejected() {
        let err = Model::builder("articles")
            .mutation("load", |_, _| {})
            .mutation("load", |_, _| {})
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateActionName { .. }));
    }

    #[test]
    fn test_creators_fail_until_loaded() {
        let model = counter().build().unwrap();
        let err = model
            .action_creators()
            .create("increment", Value::empty_map())
            .unwrap_err();
        assert!(matches!(err, ModelError::ModelNotLoaded { namespace } if namespace == "counter"));

        model.mark_loaded();
        let envelope = model.action_creators().create("increment", 5).unwrap();
        assert_eq!(envelope.action_type(), "counter.increment");
        assert_eq!(envelope.payload().as_i64(), Some(5));
        assert!(envelope.hooks().is_none());
    }

    #[test]
    fn test_creator_kinds() {
        let model = counter().build().unwrap();
        let creators = model.action_creators();
        assert!(!creators.get("increment").unwrap().is_effect());
        assert!(creators.get("tryToIncrement").unwrap().is_effect());
        assert_eq!(creators.len(), 2);
    }

    #[test]
    fn test_create_empty_payload_is_map() {
        let model = counter().build().unwrap();
        model.mark_loaded();
        let envelope = model
            .action_creators()
            .get("increment")
            .unwrap()
            .create_empty()
            .unwrap();
        assert_eq!(envelope.payload().as_map().map(|m| m.len()), Some(0));
    }

    #[test]
    fn test_unknown_action_name() {
        let model = counter().build().unwrap();
        model.mark_loaded();
        assert!(matches!(
            model.action_creators().create("decrement", Value::Null),
            Err(ModelError::UnknownAction { .. })
        ));
    }

    #[test]
    fn test_builders_are_memoized() {
        let model = counter().build().unwrap();
        assert!(std::ptr::eq(model.model_reducer(), model.model_reducer()));
        assert!(std::ptr::eq(model.model_selectors(), model.model_selectors()));
        assert!(std::ptr::eq(model.model_effects(), model.model_effects()));
    }

    #[test]
    fn test_missing_tables_default_to_empty() {
        let model = Model::builder("empty").build().unwrap();
        assert!(model.action_creators().is_empty());
        assert!(model.model_selectors().is_empty());
        assert!(model.task_descriptors().is_empty());
        assert!(model.initial_state().is_null());
    }

    #[test]
    fn test_one_task_descriptor_per_effect() {
        let model = counter().build().unwrap();
        let descriptors = model.task_descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].action_type(), "counter.tryToIncrement");
    }
}
