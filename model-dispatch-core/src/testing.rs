//! Test utilities for model-dispatch applications
//!
//! - [`DispatchHarness`]: a dispatch primitive that records envelopes
//! - [`RecordingToolkit`]: an [`EffectToolkit`] that records `put`s and serves
//!   a fixed state, for running effects without a store
//! - Assertion macros over recorded envelopes, keyed by action identifier
//!
//! # Example
//!
//! ```ignore
//! use model_dispatch::testing::DispatchHarness;
//! use model_dispatch::{assert_dispatched, bind_model_action_creators, ActionCreatorTree};
//!
//! let mut harness = DispatchHarness::new();
//! let actions = bind_model_action_creators(&ActionCreatorTree::from(counter.action_creators()), harness.dispatcher());
//!
//! actions.invoke("increment", Value::empty_map())?;
//!
//! let dispatched = harness.drain_dispatched();
//! assert_dispatched!(dispatched, "counter.increment");
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::action::ActionEnvelope;
use crate::bind::Dispatch;
use crate::effect::{EffectToolkit, Toolkit};
use crate::value::{Map, Value};

/// Records every dispatched envelope in a channel.
pub struct DispatchHarness {
    tx: mpsc::UnboundedSender<ActionEnvelope>,
    rx: mpsc::UnboundedReceiver<ActionEnvelope>,
}

impl Default for DispatchHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchHarness {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Dispatch primitive that records into this harness.
    pub fn dispatcher(&self) -> Dispatch {
        let tx = self.tx.clone();
        Arc::new(move |envelope| {
            let _ = tx.send(envelope);
        })
    }

    /// Record an envelope directly.
    pub fn dispatch(&self, envelope: ActionEnvelope) {
        let _ = self.tx.send(envelope);
    }

    /// Drain all recorded envelopes.
    pub fn drain_dispatched(&mut self) -> Vec<ActionEnvelope> {
        let mut envelopes = Vec::new();
        while let Ok(envelope) = self.rx.try_recv() {
            envelopes.push(envelope);
        }
        envelopes
    }

    /// Drain the envelopes addressed to `namespace`.
    ///
    /// Envelopes of other namespaces remain in the channel for later draining.
    pub fn drain_namespace(&mut self, namespace: &str) -> Vec<ActionEnvelope> {
        let (matching, others): (Vec<_>, Vec<_>) = self
            .drain_dispatched()
            .into_iter()
            .partition(|envelope| envelope.local_name(namespace).is_some());

        // Re-record non-matching envelopes
        for envelope in others {
            let _ = self.tx.send(envelope);
        }

        matching
    }
}

#[derive(Default)]
struct RecordingInner {
    state: Mutex<Value>,
    puts: Mutex<Vec<ActionEnvelope>>,
    context: Mutex<Map>,
    watchers: Mutex<Vec<mpsc::UnboundedSender<ActionEnvelope>>>,
}

/// Toolkit double for running effect bodies in isolation.
///
/// `put` records the envelope and wakes pending `take`s; nothing is
/// reduced. Clones share the same recordings.
#[derive(Clone, Default)]
pub struct RecordingToolkit {
    inner: Arc<RecordingInner>,
}

impl RecordingToolkit {
    pub fn new(state: Value) -> Self {
        let toolkit = Self::default();
        *toolkit.inner.state.lock() = state;
        toolkit
    }

    /// This toolkit as effect bodies receive it.
    pub fn handle(&self) -> Toolkit {
        Arc::new(self.clone())
    }

    /// Replace the state served to effects.
    pub fn set_state(&self, state: Value) {
        *self.inner.state.lock() = state;
    }

    /// Envelopes put so far, oldest first.
    pub fn puts(&self) -> Vec<ActionEnvelope> {
        self.inner.puts.lock().clone()
    }

    pub fn drain_puts(&self) -> Vec<ActionEnvelope> {
        std::mem::take(&mut *self.inner.puts.lock())
    }
}

impl EffectToolkit for RecordingToolkit {
    fn put(&self, envelope: ActionEnvelope) {
        self.inner
            .watchers
            .lock()
            .retain(|watcher| watcher.send(envelope.clone()).is_ok());
        self.inner.puts.lock().push(envelope);
    }

    fn state(&self) -> Value {
        self.inner.state.lock().clone()
    }

    fn take(&self, action_type: &str) -> BoxFuture<'static, Option<ActionEnvelope>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner.watchers.lock().push(tx);
        let wanted = action_type.to_string();
        Box::pin(async move {
            while let Some(envelope) = rx.recv().await {
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

/// Freeze the tokio clock so debounced effects can be driven by hand.
///
/// Must be called from a current-thread runtime.
#[cfg(feature = "testing-time")]
pub fn pause_time() {
    tokio::time::pause();
}

/// Move the paused clock forward, firing due timers.
#[cfg(feature = "testing-time")]
pub async fn advance_time(duration: std::time::Duration) {
    tokio::time::advance(duration).await;
}

#[cfg(feature = "testing-time")]
pub fn resume_time() {
    tokio::time::resume();
}

/// Assert that an envelope with the given identifier was dispatched.
///
/// An optional predicate receives the payload.
///
/// # Example
///
/// ```ignore
/// let dispatched = harness.drain_dispatched();
/// assert_dispatched!(dispatched, "counter.increment");
/// assert_dispatched!(dispatched, "counter.add", |payload| payload.as_i64() == Some(2));
/// ```
#[macro_export]
macro_rules! assert_dispatched {
    ($envelopes:expr, $action_type:expr) => {
        assert!(
            $envelopes.iter().any(|e| e.action_type() == $action_type),
            "Expected `{}` to be dispatched, but got: {:?}",
            $action_type,
            $envelopes.iter().map(|e| e.to_string()).collect::<Vec<_>>()
        );
    };
    ($envelopes:expr, $action_type:expr, $predicate:expr) => {
        assert!(
            $envelopes
                .iter()
                .any(|e| e.action_type() == $action_type && ($predicate)(e.payload())),
            "Expected `{}` with a matching payload to be dispatched, but got: {:?}",
            $action_type,
            $envelopes.iter().map(|e| e.to_string()).collect::<Vec<_>>()
        );
    };
}

/// Assert that no envelope with the given identifier was dispatched.
#[macro_export]
macro_rules! assert_not_dispatched {
    ($envelopes:expr, $action_type:expr) => {
        assert!(
            !$envelopes.iter().any(|e| e.action_type() == $action_type),
            "Expected `{}` NOT to be dispatched, but it was: {:?}",
            $action_type,
            $envelopes.iter().map(|e| e.to_string()).collect::<Vec<_>>()
        );
    };
}

/// Find the first envelope with the given identifier.
///
/// # Example
///
/// ```ignore
/// let dispatched = harness.drain_dispatched();
/// let added = find_dispatched!(dispatched, "counter.add").unwrap();
/// assert_eq!(added.payload().as_i64(), Some(2));
/// ```
#[macro_export]
macro_rules! find_dispatched {
    ($envelopes:expr, $action_type:expr) => {
        $envelopes.iter().find(|e| e.action_type() == $action_type)
    };
}

/// Count the envelopes with the given identifier.
#[macro_export]
macro_rules! count_dispatched {
    ($envelopes:expr, $action_type:expr) => {
        $envelopes
            .iter()
            .filter(|e| e.action_type() == $action_type)
            .count()
    };
}
