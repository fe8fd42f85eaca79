//! Effects and the toolkit they run against
//!
//! An effect is an async handler: it receives the envelope payload, the
//! host's [`EffectToolkit`] and its model's [`ActionCreators`], and settles
//! with a [`Value`] or an [`EffectFailure`].
//!
//! The toolkit is the effect's only window on the host. The core never
//! implements it; hosts do (see `ModelStore`), and tests can use
//! `testing::RecordingToolkit`.
//!
//! # Example
//!
//! ```ignore
//! Model::builder("articles")
//!     .mutation("saveAll", |draft, payload| draft["items"] = payload.clone())
//!     .effect("fetchAll", |_payload, toolkit, actions| async move {
//!         let items = retry(3, Duration::from_millis(100), || api::fetch_articles()).await?;
//!         toolkit.put(actions.create("saveAll", items)?);
//!         Ok(Value::Null)
//!     })
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::action::{ActionEnvelope, EffectResult};
use crate::error::ModelError;
use crate::model::ActionCreators;
use crate::selector::MemoizedSelector;
use crate::value::Value;

/// Host operations available to effect bodies.
pub trait EffectToolkit: Send + Sync {
    /// Dispatch an envelope through the host.
    fn put(&self, envelope: ActionEnvelope);

    /// Current whole state.
    fn state(&self) -> Value;

    /// Wait for the next dispatched envelope with this identifier.
    ///
    /// Resolves to `None` when the host shuts down first.
    fn take(&self, action_type: &str) -> BoxFuture<'static, Option<ActionEnvelope>>;

    fn get_context(&self, key: &str) -> Option<Value>;

    fn set_context(&self, key: &str, value: Value);

    fn delay(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Toolkit handle as effect bodies receive it.
pub type Toolkit = Arc<dyn EffectToolkit>;

impl dyn EffectToolkit {
    /// Run a memoized selector against the current state.
    pub fn select(&self, selector: &MemoizedSelector, args: &[Value]) -> Result<Value, ModelError> {
        selector.select(&self.state(), args)
    }

    /// Build an envelope with `creators` and dispatch it.
    pub fn put_action(
        &self,
        creators: &ActionCreators,
        name: &str,
        payload: impl Into<Value>,
    ) -> Result<(), ModelError> {
        self.put(creators.create(name, payload)?);
        Ok(())
    }
}

/// Type-erased effect body.
pub type EffectFn =
    Arc<dyn Fn(Value, Toolkit, ActionCreators) -> BoxFuture<'static, EffectResult> + Send + Sync>;

/// How a task subscription treats envelopes that arrive while earlier
/// tasks of the same effect are still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EffectPolicy {
    /// One independent task per envelope; nothing is cancelled or queued.
    #[default]
    Every,
    /// A new envelope aborts the task still running for the previous one.
    Latest,
    /// Wait for a quiet period before running; every new envelope restarts
    /// the wait and aborts the pending task.
    Debounce(Duration),
}

/// An effect bound to its model's action creators.
#[derive(Clone)]
pub struct WrappedEffect {
    name: String,
    action_type: String,
    body: EffectFn,
    creators: ActionCreators,
    policy: EffectPolicy,
}

impl WrappedEffect {
    pub(crate) fn new(
        name: String,
        action_type: String,
        body: EffectFn,
        creators: ActionCreators,
        policy: EffectPolicy,
    ) -> Self {
        Self {
            name,
            action_type,
            body,
            creators,
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    pub fn policy(&self) -> EffectPolicy {
        self.policy
    }

    /// Run the effect body; the toolkit is forwarded untouched.
    pub fn call(&self, payload: Value, toolkit: Toolkit) -> BoxFuture<'static, EffectResult> {
        (self.body)(payload, toolkit, self.creators.clone())
    }
}

impl fmt::Debug for WrappedEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedEffect")
            .field("action_type", &self.action_type)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Effect table of a model.
#[derive(Clone, Debug)]
pub struct ModelEffects {
    namespace: String,
    effects: BTreeMap<String, WrappedEffect>,
}

impl ModelEffects {
    pub(crate) fn new(namespace: String, effects: BTreeMap<String, WrappedEffect>) -> Self {
        Self { namespace, effects }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get(&self, name: &str) -> Option<&WrappedEffect> {
        self.effects.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WrappedEffect> {
        self.effects.values()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Run `op` until it succeeds, at most `max_tries` times, sleeping `delay`
/// between attempts. Returns the last error when every attempt fails.
pub async fn retry<F, Fut, T, E>(max_tries: usize, delay: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_tries = max_tries.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_tries => return Err(err),
            Err(_) => {
                tracing::debug!(attempt, max_tries, "Retrying after failed attempt");
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EffectFailure;
    use crate::model::Model;
    use crate::testing::RecordingToolkit;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn model() -> Model {
        Model::builder("counter")
            .mutation("increment", |_, _| {})
            .effect("bump", |payload, toolkit, actions| async move {
                toolkit.put_action(&actions, "increment", payload.clone())?;
                Ok(payload)
            })
            .effect_with_policy("search", EffectPolicy::Latest, |_, _, _| async {
                Err(EffectFailure::msg("offline"))
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_wrapped_effect_forwards_toolkit_and_creators() {
        let model = model();
        model.mark_loaded();
        let toolkit = RecordingToolkit::new(Value::empty_map());

        let effect = model.model_effects().get("bump").unwrap();
        assert_eq!(effect.action_type(), "counter.bump");
        assert_eq!(effect.policy(), EffectPolicy::Every);

        let out = effect.call(Value::from(7), toolkit.handle()).await.unwrap();
        assert_eq!(out.as_i64(), Some(7));

        let puts = toolkit.puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].action_type(), "counter.increment");
        assert_eq!(puts[0].payload().as_i64(), Some(7));
    }

    #[tokio::test]
    async fn test_effect_failure_passes_through() {
        let model = model();
        model.mark_loaded();
        let toolkit = RecordingToolkit::new(Value::Null);

        let effect = model.model_effects().get("search").unwrap();
        assert_eq!(effect.policy(), EffectPolicy::Latest);
        let err = effect.call(Value::Null, toolkit.handle()).await.unwrap_err();
        assert_eq!(err.to_string(), "offline");
    }

    #[tokio::test]
    async fn test_unloaded_model_cannot_put() {
        let model = model();
        let toolkit = RecordingToolkit::new(Value::Null);

        let effect = model.model_effects().get("bump").unwrap();
        let err = effect.call(Value::Null, toolkit.handle()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ModelError>(),
            Some(ModelError::ModelNotLoaded { .. })
        ));
        assert!(toolkit.puts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let attempts = AtomicUsize::new(0);
        let result: Result<usize, &str> = retry(3, Duration::from_millis(10), || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err("not yet")
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), &str> = retry(2, Duration::from_millis(10), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("down")
        })
        .await;
        assert_eq!(result, Err("down"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
