//! Action envelopes and completion hooks
//!
//! An [`ActionEnvelope`] is the only thing that travels through dispatch:
//! an identifier of the form `"{namespace}.{handler}"`, a payload, and for
//! envelopes built by the dispatch binder a pair of [`CompletionHooks`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::EffectFailure;
use crate::value::Value;

/// Outcome an effect task settles its completion with.
pub type EffectResult = Result<Value, EffectFailure>;

/// Whether an action creator targets a mutation or an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Mutation,
    Effect,
}

impl HandlerKind {
    pub fn is_effect(self) -> bool {
        matches!(self, HandlerKind::Effect)
    }
}

/// Build the action identifier for a handler of a namespace.
pub fn action_type(namespace: &str, name: &str) -> String {
    format!("{namespace}.{name}")
}

/// Resolve/reject pair threaded through an envelope.
///
/// Settles at most once across both hooks; later calls are ignored and
/// return `false`. Clones share the same slot.
#[derive(Clone, Default)]
pub struct CompletionHooks {
    slot: Option<Arc<Mutex<Option<oneshot::Sender<EffectResult>>>>>,
}

impl CompletionHooks {
    /// Hooks that accept and discard any outcome.
    pub fn noop() -> Self {
        Self { slot: None }
    }

    /// Hooks backed by a fresh channel; the receiver observes the outcome.
    pub fn channel() -> (Self, oneshot::Receiver<EffectResult>) {
        let (tx, rx) = oneshot::channel();
        let hooks = Self {
            slot: Some(Arc::new(Mutex::new(Some(tx)))),
        };
        (hooks, rx)
    }

    pub fn resolve(&self, value: Value) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, failure: EffectFailure) -> bool {
        self.settle(Err(failure))
    }

    /// Whether an outcome was already delivered (always false for noop hooks).
    pub fn is_settled(&self) -> bool {
        self.slot
            .as_ref()
            .is_some_and(|slot| slot.lock().is_none())
    }

    fn settle(&self, outcome: EffectResult) -> bool {
        let Some(slot) = &self.slot else {
            return true;
        };
        match slot.lock().take() {
            // A dropped receiver means nobody awaits the outcome anymore.
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for CompletionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHooks")
            .field("tracked", &self.slot.is_some())
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// A dispatched action.
#[derive(Clone, Debug)]
pub struct ActionEnvelope {
    action_type: String,
    payload: Value,
    hooks: Option<CompletionHooks>,
}

impl ActionEnvelope {
    /// Create an envelope without completion hooks.
    ///
    /// Such envelopes are fine for mutations and for inspection in tests,
    /// but effect tasks refuse them.
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
            hooks: None,
        }
    }

    pub fn with_hooks(mut self, hooks: CompletionHooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn hooks(&self) -> Option<&CompletionHooks> {
        self.hooks.as_ref()
    }

    /// Namespace part of the identifier (everything before the last dot).
    pub fn namespace(&self) -> Option<&str> {
        self.action_type.rsplit_once('.').map(|(ns, _)| ns)
    }

    /// Handler name relative to `namespace`, if the envelope belongs to it.
    pub fn local_name<'a>(&'a self, namespace: &str) -> Option<&'a str> {
        self.action_type
            .strip_prefix(namespace)
            .and_then(|rest| rest.strip_prefix('.'))
    }
}

impl fmt::Display for ActionEnvelope {
    /// JSON-like rendering used in error messages and logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{\"type\":{:?},\"payload\":{}}}",
            self.action_type, self.payload
        )
    }
}
