//! Namespace validation
//!
//! A namespace is one or more alphanumeric segments joined by single dots,
//! e.g. `counter` or `projectA.articles`. Each dot adds one nesting level to
//! the model's slot in the combined state tree.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ModelError;
use crate::value::Value;

/// Grammar every namespace is validated against.
pub const NAMESPACE_PATTERN: &str = r"^[A-Za-z0-9]+(\.[A-Za-z0-9]+)*$";

static NAMESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(NAMESPACE_PATTERN).expect("namespace pattern is a valid regex"));

/// Validate a namespace candidate.
///
/// The candidate is a [`Value`] so callers holding untyped configuration can
/// pass it straight through; anything other than a string is rejected.
///
/// # Example
///
/// ```
/// use model_dispatch_core::namespace::validate;
/// use model_dispatch_core::{ModelError, Value};
///
/// assert_eq!(validate(&Value::from("projectA.articles")).unwrap(), "projectA.articles");
/// assert!(matches!(validate(&Value::from("a..b")), Err(ModelError::InvalidNamespace { .. })));
/// assert!(matches!(validate(&Value::from(1)), Err(ModelError::NamespaceNotAString { .. })));
/// ```
pub fn validate(candidate: &Value) -> Result<String, ModelError> {
    let namespace = candidate
        .as_str()
        .ok_or(ModelError::NamespaceNotAString {
            found: candidate.type_name(),
        })?;
    validate_str(namespace)?;
    Ok(namespace.to_string())
}

/// Validate a namespace that is already known to be a string.
pub fn validate_str(namespace: &str) -> Result<(), ModelError> {
    if namespace.is_empty() {
        return Err(ModelError::EmptyNamespace);
    }
    if !NAMESPACE_RE.is_match(namespace) {
        return Err(ModelError::InvalidNamespace {
            namespace: namespace.to_string(),
            pattern: NAMESPACE_PATTERN,
        });
    }
    Ok(())
}

/// Whether `inner` sits below `outer` in the state tree.
pub(crate) fn is_nested_in(inner: &str, outer: &str) -> bool {
    inner.len() > outer.len()
        && inner.starts_with(outer)
        && inner.as_bytes()[outer.len()] == b'.'
}
