//! Binding action creators to a dispatch primitive
//!
//! [`bind_model_action_creators`] turns a tree of [`ActionCreator`]s into
//! callables that dispatch right away and hand back a [`Completion`]: already
//! resolved for mutations, settled by the effect task for effects.
//!
//! # Example
//!
//! ```ignore
//! let tree = ActionCreatorTree::from_models([&counter, &articles])?;
//! let actions = bind_model_action_creators(&tree, store.dispatcher());
//!
//! actions.invoke("counter.increment", Value::empty_map())?.await?;
//! let loaded = actions.invoke("projectA.articles.fetchAll", Value::empty_map())?.await?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future;
use tokio::sync::oneshot;

use crate::action::{ActionEnvelope, CompletionHooks, EffectResult};
use crate::error::{EffectFailure, ModelError};
use crate::model::{ActionCreator, ActionCreators, Model};
use crate::value::Value;

/// Dispatch primitive: synchronous with respect to mutations.
pub type Dispatch = Arc<dyn Fn(ActionEnvelope) + Send + Sync>;

/// Caller-visible outcome of a bound action creator.
///
/// Resolves to the effect's value, or rejects with its failure. A task
/// that ends without settling (aborted, host shut down) rejects with
/// [`ModelError::EffectCancelled`].
#[must_use = "completions do nothing unless awaited"]
pub struct Completion {
    state: CompletionState,
}

enum CompletionState {
    Ready(future::Ready<EffectResult>),
    Pending {
        action_type: String,
        rx: oneshot::Receiver<EffectResult>,
    },
}

impl Completion {
    pub fn resolved(value: Value) -> Self {
        Self {
            state: CompletionState::Ready(future::ready(Ok(value))),
        }
    }

    /// Completion settled through `rx`.
    pub fn pending(action_type: impl Into<String>, rx: oneshot::Receiver<EffectResult>) -> Self {
        Self {
            state: CompletionState::Pending {
                action_type: action_type.into(),
                rx,
            },
        }
    }

    /// Whether the outcome depends on an effect task.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, CompletionState::Pending { .. })
    }
}

impl Future for Completion {
    type Output = EffectResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            CompletionState::Ready(ready) => Pin::new(ready).poll(cx),
            CompletionState::Pending { action_type, rx } => Pin::new(rx).poll(cx).map(|received| {
                received.unwrap_or_else(|_| {
                    Err(EffectFailure::new(ModelError::EffectCancelled {
                        action_type: action_type.clone(),
                    }))
                })
            }),
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            CompletionState::Ready(_) => f.write_str("Completion::Ready"),
            CompletionState::Pending { action_type, .. } => {
                f.debug_tuple("Completion::Pending").field(action_type).finish()
            }
        }
    }
}

/// Action creators grouped by namespace segment.
///
/// `projectA.articles.fetchAll` lives under the groups `projectA` and
/// `articles` as the leaf `fetchAll`.
#[derive(Clone, Debug)]
pub enum ActionCreatorTree {
    Creator(ActionCreator),
    Group(BTreeMap<String, ActionCreatorTree>),
}

impl Default for ActionCreatorTree {
    fn default() -> Self {
        ActionCreatorTree::Group(BTreeMap::new())
    }
}

impl ActionCreatorTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tree with every creator of every model, nested by namespace.
    pub fn from_models<'a>(models: impl IntoIterator<Item = &'a Model>) -> Result<Self, ModelError> {
        let mut tree = Self::new();
        for model in models {
            tree.insert_model(model)?;
        }
        Ok(tree)
    }

    pub fn insert_model(&mut self, model: &Model) -> Result<(), ModelError> {
        for creator in model.action_creators().iter() {
            self.insert(creator.action_type(), creator.clone())?;
        }
        Ok(())
    }

    /// Insert `creator` at the dotted `path`.
    ///
    /// Fails with [`ModelError::ConflictingActionPath`] when a creator
    /// already occupies the path or one of its prefixes.
    pub fn insert(&mut self, path: &str, creator: ActionCreator) -> Result<(), ModelError> {
        let conflict = || ModelError::ConflictingActionPath {
            path: path.to_string(),
        };
        let (groups, leaf) = match path.rsplit_once('.') {
            Some((groups, leaf)) => (Some(groups), leaf),
            None => (None, path),
        };

        let mut node = self;
        for segment in groups.into_iter().flat_map(|groups| groups.split('.')) {
            let ActionCreatorTree::Group(children) = node else {
                return Err(conflict());
            };
            node = children
                .entry(segment.to_string())
                .or_insert_with(ActionCreatorTree::new);
        }

        let ActionCreatorTree::Group(children) = node else {
            return Err(conflict());
        };
        if children.contains_key(leaf) {
            return Err(conflict());
        }
        children.insert(leaf.to_string(), ActionCreatorTree::Creator(creator));
        Ok(())
    }

    /// Node at a dotted path.
    pub fn get(&self, path: &str) -> Option<&ActionCreatorTree> {
        path.split('.').try_fold(self, |node, segment| match node {
            ActionCreatorTree::Group(children) => children.get(segment),
            ActionCreatorTree::Creator(_) => None,
        })
    }

    /// Creator at a dotted path.
    pub fn creator(&self, path: &str) -> Option<&ActionCreator> {
        match self.get(path)? {
            ActionCreatorTree::Creator(creator) => Some(creator),
            ActionCreatorTree::Group(_) => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, ActionCreatorTree::Group(_))
    }

    fn bind(&self, dispatch: &Dispatch) -> BoundActionTree {
        match self {
            ActionCreatorTree::Creator(creator) => BoundActionTree::Creator(BoundActionCreator {
                creator: creator.clone(),
                dispatch: dispatch.clone(),
            }),
            ActionCreatorTree::Group(children) => BoundActionTree::Group(
                children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.bind(dispatch)))
                    .collect(),
            ),
        }
    }
}

impl From<&ActionCreators> for ActionCreatorTree {
    /// Flat tree keyed by handler name, for use with a single model.
    fn from(creators: &ActionCreators) -> Self {
        ActionCreatorTree::Group(
            creators
                .iter()
                .map(|creator| {
                    (
                        creator.name().to_string(),
                        ActionCreatorTree::Creator(creator.clone()),
                    )
                })
                .collect(),
        )
    }
}

/// An action creator wired to a dispatch primitive.
#[derive(Clone)]
pub struct BoundActionCreator {
    creator: ActionCreator,
    dispatch: Dispatch,
}

impl BoundActionCreator {
    pub fn creator(&self) -> &ActionCreator {
        &self.creator
    }

    /// Create and dispatch the envelope.
    ///
    /// The envelope is created before anything is dispatched, so
    /// [`ModelError::ModelNotLoaded`] is returned synchronously and nothing
    /// reaches the host.
    pub fn invoke(&self, payload: impl Into<Value>) -> Result<Completion, ModelError> {
        let envelope = self
            .creator
            .create_with_hooks(payload, Some(CompletionHooks::noop()))?;

        if !self.creator.is_effect() {
            (self.dispatch)(envelope);
            return Ok(Completion::resolved(Value::Null));
        }

        let (hooks, rx) = CompletionHooks::channel();
        (self.dispatch)(envelope.with_hooks(hooks));
        Ok(Completion::pending(self.creator.action_type(), rx))
    }
}

impl fmt::Debug for BoundActionCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundActionCreator")
            .field("action_type", &self.creator.action_type())
            .field("kind", &self.creator.kind())
            .finish()
    }
}

/// Bound counterpart of [`ActionCreatorTree`].
#[derive(Clone, Debug)]
pub enum BoundActionTree {
    Creator(BoundActionCreator),
    Group(BTreeMap<String, BoundActionTree>),
}

impl BoundActionTree {
    pub fn get(&self, path: &str) -> Option<&BoundActionTree> {
        path.split('.').try_fold(self, |node, segment| match node {
            BoundActionTree::Group(children) => children.get(segment),
            BoundActionTree::Creator(_) => None,
        })
    }

    pub fn creator(&self, path: &str) -> Option<&BoundActionCreator> {
        match self.get(path)? {
            BoundActionTree::Creator(creator) => Some(creator),
            BoundActionTree::Group(_) => None,
        }
    }

    /// Invoke the creator at `path`.
    ///
    /// Fails with [`ModelError::UnknownAction`] when no creator lives there.
    pub fn invoke(&self, path: &str, payload: impl Into<Value>) -> Result<Completion, ModelError> {
        self.creator(path)
            .ok_or_else(|| {
                let (namespace, name) = path.rsplit_once('.').unwrap_or(("", path));
                ModelError::UnknownAction {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
            })?
            .invoke(payload)
    }
}

/// Wrap every creator of `tree` into a dispatching callable.
pub fn bind_model_action_creators(tree: &ActionCreatorTree, dispatch: Dispatch) -> BoundActionTree {
    tree.bind(&dispatch)
}
