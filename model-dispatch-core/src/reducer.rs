//! Immutable reducer engine
//!
//! A [`ModelReducer`] routes envelopes addressed to its namespace to the
//! matching mutation and runs it against a copy-on-write draft of the slice.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::action::ActionEnvelope;
use crate::value::{produce, Value};

/// Synchronous edit of a draft slice.
pub type MutationFn = Arc<dyn Fn(&mut Value, &Value) + Send + Sync>;

/// Mutations keyed by handler name.
pub type MutationTable = BTreeMap<String, MutationFn>;

/// Reducer for a single model's slice.
///
/// Envelopes that name no mutation of this model return the input state
/// untouched (same containers, see [`Value::same`]). A panicking mutation
/// propagates to the caller of [`ModelReducer::reduce`].
#[derive(Clone)]
pub struct ModelReducer {
    namespace: String,
    initial_state: Value,
    mutations: Arc<MutationTable>,
}

impl ModelReducer {
    pub(crate) fn new(namespace: String, initial_state: Value, mutations: Arc<MutationTable>) -> Self {
        Self {
            namespace,
            initial_state,
            mutations,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn initial_state(&self) -> &Value {
        &self.initial_state
    }

    /// Whether `action_type` names one of this model's mutations.
    pub fn handles(&self, action_type: &str) -> bool {
        self.mutation_for(action_type).is_some()
    }

    /// Apply the envelope to `state`.
    pub fn reduce(&self, state: &Value, envelope: &ActionEnvelope) -> Value {
        match self.mutation_for(envelope.action_type()) {
            Some(mutation) => produce(state, |draft| mutation(draft, envelope.payload())),
            None => state.clone(),
        }
    }

    /// Like [`reduce`](Self::reduce), starting from the initial state when
    /// the host has no slice yet.
    pub fn reduce_or_init(&self, state: Option<&Value>, envelope: &ActionEnvelope) -> Value {
        self.reduce(state.unwrap_or(&self.initial_state), envelope)
    }

    fn mutation_for(&self, action_type: &str) -> Option<&MutationFn> {
        let name = action_type
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix('.')?;
        self.mutations.get(name)
    }
}

impl fmt::Debug for ModelReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelReducer")
            .field("namespace", &self.namespace)
            .field("mutations", &self.mutations.keys().collect::<Vec<_>>())
            .finish()
    }
}
