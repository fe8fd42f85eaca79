//! Error types for model construction, dispatch and effect tasks

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Errors raised by the model runtime.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("namespace must be a string, the provided namespace type was: {found}")]
    NamespaceNotAString { found: &'static str },

    #[error("namespace must be a non empty string")]
    EmptyNamespace,

    #[error(
        "namespace {namespace:?} can only contain letters, numbers and dots between segments \
         (validated against {pattern})"
    )]
    InvalidNamespace {
        namespace: String,
        pattern: &'static str,
    },

    #[error(
        "mutation and effect names must be unique in [{namespace}] model, the provided names were: {}",
        .names.join(", ")
    )]
    DuplicateActionName {
        namespace: String,
        names: Vec<String>,
    },

    #[error("model [{namespace}] must be combined into a store before any usage")]
    ModelNotLoaded { namespace: String },

    #[error(
        "action lacks completion hooks; dispatch effects through bound action creators \
         instead of raw envelopes, the action in question is: {action}"
    )]
    NonCompatibleAction { action: String },

    #[error("model [{namespace}] has no action named {name:?}")]
    UnknownAction { namespace: String, name: String },

    #[error("model [{namespace}] has no selector named {name:?}")]
    UnknownSelector { namespace: String, name: String },

    #[error("no model with namespace [{namespace}] is combined in this store")]
    UnknownModel { namespace: String },

    #[error("namespace [{namespace}] is used by more than one model")]
    DuplicateNamespace { namespace: String },

    #[error("namespace [{inner}] is nested inside namespace [{outer}]")]
    OverlappingNamespace { outer: String, inner: String },

    #[error("action creator path {path:?} collides with another creator or group")]
    ConflictingActionPath { path: String },

    #[error("state slot for namespace [{namespace}] is not a map at segment {segment:?}")]
    StatePathConflict { namespace: String, segment: String },

    #[error("effect tasks of this store are already running")]
    TasksAlreadyRunning,

    #[error("effect task for {action_type} ended without settling its completion")]
    EffectCancelled { action_type: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure produced by an effect body.
///
/// Wraps the original error in an [`Arc`] so the caller awaiting a
/// completion observes the very same object the effect returned; use
/// [`EffectFailure::ptr_eq`] to check identity.
#[derive(Clone)]
pub struct EffectFailure(Arc<dyn StdError + Send + Sync + 'static>);

impl EffectFailure {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// Failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Arc::new(MessageError(message.into())))
    }

    /// Whether both failures wrap the same error object.
    pub fn ptr_eq(&self, other: &EffectFailure) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Try to view the wrapped error as a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

impl<E> From<E> for EffectFailure
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for EffectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EffectFailure").field(&self.0).finish()
    }
}

impl fmt::Display for EffectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for MessageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_action_name_message() {
        let err = ModelError::DuplicateActionName {
            namespace: "articles".into(),
            names: vec!["whatever".into(), "whatever".into()],
        };
        assert_eq!(
            err.to_string(),
            "mutation and effect names must be unique in [articles] model, \
             the provided names were: whatever, whatever"
        );
    }

    #[test]
    fn test_failure_identity() {
        let a = EffectFailure::msg("boom");
        let b = a.clone();
        let c = EffectFailure::msg("boom");
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.to_string(), "boom");
    }

    #[test]
    fn test_failure_from_model_error() {
        let failure = EffectFailure::from(ModelError::EmptyNamespace);
        assert!(matches!(
            failure.downcast_ref::<ModelError>(),
            Some(ModelError::EmptyNamespace)
        ));
    }
}
