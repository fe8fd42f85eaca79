//! Memoized selectors
//!
//! Each selector reads the model's slice out of the whole state tree and
//! remembers its last inputs. Calling it again with the same slice and the
//! same arguments (by identity, see [`Value::same`]) hands back the very same
//! output value without running the selector body.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ModelError;
use crate::model::ModelCore;
use crate::value::Value;

/// Selector body: `(slice, args, whole_state) -> output`.
pub type SelectorFn = Arc<dyn Fn(&Value, &[Value], &Value) -> Value + Send + Sync>;

struct Memo {
    slice: Value,
    args: Vec<Value>,
    output: Value,
}

impl Memo {
    fn matches(&self, slice: &Value, args: &[Value]) -> bool {
        self.slice.same(slice)
            && self.args.len() == args.len()
            && self.args.iter().zip(args).all(|(a, b)| a.same(b))
    }
}

/// One selector of a model with a single-entry memo.
#[derive(Clone)]
pub struct MemoizedSelector {
    core: Arc<ModelCore>,
    name: String,
    body: SelectorFn,
    memo: Arc<Mutex<Option<Memo>>>,
}

impl MemoizedSelector {
    pub(crate) fn new(core: Arc<ModelCore>, name: String, body: SelectorFn) -> Self {
        Self {
            core,
            name,
            body,
            memo: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the selector against the whole state.
    ///
    /// A missing slice is passed to the body as `Null`. Fails with
    /// [`ModelError::ModelNotLoaded`] until the model has been combined.
    pub fn select(&self, state: &Value, args: &[Value]) -> Result<Value, ModelError> {
        self.core.ensure_loaded()?;

        let slice = state
            .get_path(self.core.namespace())
            .cloned()
            .unwrap_or_default();

        if let Some(memo) = self.memo.lock().as_ref() {
            if memo.matches(&slice, args) {
                return Ok(memo.output.clone());
            }
        }

        // The lock is not held here so a body may call other selectors.
        let output = (self.body)(&slice, args, state);
        *self.memo.lock() = Some(Memo {
            slice,
            args: args.to_vec(),
            output: output.clone(),
        });
        Ok(output)
    }
}

impl fmt::Debug for MemoizedSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedSelector")
            .field("namespace", &self.core.namespace())
            .field("name", &self.name)
            .finish()
    }
}

/// Selector table of a model.
#[derive(Clone, Debug)]
pub struct ModelSelectors {
    namespace: String,
    selectors: BTreeMap<String, MemoizedSelector>,
}

impl ModelSelectors {
    pub(crate) fn new(namespace: String, selectors: BTreeMap<String, MemoizedSelector>) -> Self {
        Self {
            namespace,
            selectors,
        }
    }

    pub fn get(&self, name: &str) -> Option<&MemoizedSelector> {
        self.selectors.get(name)
    }

    /// Look up `name` and run it.
    pub fn select(&self, name: &str, state: &Value, args: &[Value]) -> Result<Value, ModelError> {
        self.selectors
            .get(name)
            .ok_or_else(|| ModelError::UnknownSelector {
                namespace: self.namespace.clone(),
                name: name.to_string(),
            })?
            .select(state, args)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.selectors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_selector(namespace: &str, calls: Arc<AtomicUsize>) -> MemoizedSelector {
        let core = Arc::new(ModelCore::new(namespace.to_string()));
        core.mark_loaded();
        MemoizedSelector::new(
            core,
            "doubled".into(),
            Arc::new(move |slice: &Value, args: &[Value], _: &Value| {
                calls.fetch_add(1, Ordering::SeqCst);
                let factor = args.first().and_then(Value::as_i64).unwrap_or(2);
                let mut out = Value::empty_map();
                out.insert("value", slice["count"].as_i64().unwrap_or(0) * factor);
                out
            }),
        )
    }

    fn state_with_count(count: i64) -> Value {
        let mut state = Value::Null;
        state
            .set_path("projectA.counter", Value::empty_map())
            .unwrap();
        state
            .set_path("projectA.counter.count", Value::from(count))
            .unwrap();
        state
    }

    #[test]
    fn test_not_loaded_fails() {
        let core = Arc::new(ModelCore::new("counter".into()));
        let selector = MemoizedSelector::new(
            core,
            "all".into(),
            Arc::new(|slice: &Value, _: &[Value], _: &Value| slice.clone()),
        );
        let err = selector.select(&Value::empty_map(), &[]).unwrap_err();
        assert!(matches!(err, ModelError::ModelNotLoaded { namespace } if namespace == "counter"));
    }

    #[test]
    fn test_reads_nested_slice() {
        let calls = Arc::new(AtomicUsize::new(0));
        let selector = counting_selector("projectA.counter", calls);
        let out = selector.select(&state_with_count(4), &[]).unwrap();
        assert_eq!(out["value"].as_i64(), Some(8));
    }

    #[test]
    fn test_same_inputs_return_same_output() {
        let calls = Arc::new(AtomicUsize::new(0));
        let selector = counting_selector("projectA.counter", calls.clone());
        let state = state_with_count(1);

        let first = selector.select(&state, &[]).unwrap();
        let second = selector.select(&state, &[]).unwrap();
        assert!(first.same(&second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_changed_args_recompute() {
        let calls = Arc::new(AtomicUsize::new(0));
        let selector = counting_selector("projectA.counter", calls.clone());
        let state = state_with_count(3);

        let doubled = selector.select(&state, &[Value::from(2)]).unwrap();
        let tripled = selector.select(&state, &[Value::from(3)]).unwrap();
        assert_eq!(doubled["value"].as_i64(), Some(6));
        assert_eq!(tripled["value"].as_i64(), Some(9));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unrelated_change_keeps_memo() {
        let calls = Arc::new(AtomicUsize::new(0));
        let selector = counting_selector("projectA.counter", calls.clone());
        let state = state_with_count(1);
        let first = selector.select(&state, &[]).unwrap();

        let mut next = state.clone();
        next.set_path("other.flag", Value::from(true)).unwrap();
        let second = selector.select(&next, &[]).unwrap();

        assert!(first.same(&second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_slice_is_null() {
        let core = Arc::new(ModelCore::new("absent".into()));
        core.mark_loaded();
        let selector = MemoizedSelector::new(
            core,
            "isMissing".into(),
            Arc::new(|slice: &Value, _: &[Value], _: &Value| Value::from(slice.is_null())),
        );
        let out = selector.select(&Value::empty_map(), &[]).unwrap();
        assert_eq!(out.as_bool(), Some(true));
    }

    #[test]
    fn test_unknown_selector() {
        let table = ModelSelectors::new("counter".into(), BTreeMap::new());
        let err = table.select("nope", &Value::Null, &[]).unwrap_err();
        assert!(matches!(err, ModelError::UnknownSelector { .. }));
        assert!(table.is_empty());
    }
}
