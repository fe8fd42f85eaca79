//! Effect tasks
//!
//! A [`TaskDescriptor`] watches a subscription of dispatched envelopes and
//! spawns one tokio task per envelope naming its effect. Each task runs the
//! effect body and settles the envelope's completion hooks with the outcome.
//!
//! A [`TaskHost`] owns the running subscription loops of every descriptor a
//! host activated and stops them together.
//!
//! # Example
//!
//! ```ignore
//! let mut host = TaskHost::new();
//! for descriptor in model.task_descriptors() {
//!     host.spawn(descriptor, store.subscribe(), toolkit.clone());
//! }
//!
//! // Stop every loop and abort in-flight effects
//! host.shutdown();
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::action::{ActionEnvelope, CompletionHooks};
use crate::effect::{EffectPolicy, Toolkit, WrappedEffect};
use crate::error::{EffectFailure, ModelError};

/// Subscription loop blueprint for one effect.
#[derive(Clone, Debug)]
pub struct TaskDescriptor {
    effect: WrappedEffect,
}

impl TaskDescriptor {
    pub(crate) fn new(effect: WrappedEffect) -> Self {
        Self { effect }
    }

    pub fn action_type(&self) -> &str {
        self.effect.action_type()
    }

    pub fn policy(&self) -> EffectPolicy {
        self.effect.policy()
    }

    /// Consume envelopes until the subscription closes or `shutdown` fires.
    ///
    /// On shutdown in-flight tasks are aborted; when the subscription closes
    /// they are allowed to finish first. Task errors (envelopes without
    /// completion hooks) are sent to `errors`.
    pub async fn run(
        self,
        mut subscription: mpsc::UnboundedReceiver<ActionEnvelope>,
        toolkit: Toolkit,
        shutdown: CancellationToken,
        errors: mpsc::UnboundedSender<ModelError>,
    ) {
        let mut tasks = JoinSet::new();
        let mut previous: Option<AbortHandle> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(action = %self.action_type(), "Task loop shut down");
                    tasks.abort_all();
                    break;
                }
                received = subscription.recv() => {
                    let Some(envelope) = received else {
                        tracing::debug!(action = %self.action_type(), "Subscription closed");
                        break;
                    };
                    if envelope.action_type() != self.action_type() {
                        continue;
                    }

                    let delay = match self.policy() {
                        EffectPolicy::Every => None,
                        EffectPolicy::Latest => Some(Duration::ZERO),
                        EffectPolicy::Debounce(wait) => Some(wait),
                    };
                    if delay.is_some() {
                        if let Some(handle) = previous.take() {
                            handle.abort();
                        }
                    }

                    tracing::debug!(action = %self.action_type(), "Spawning effect task");
                    let handle = tasks.spawn(run_task(
                        self.effect.clone(),
                        envelope,
                        toolkit.clone(),
                        delay,
                    ));
                    if delay.is_some() {
                        previous = Some(handle);
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.report(joined, &errors);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.report(joined, &errors);
        }
    }

    fn report(
        &self,
        joined: Result<Result<(), ModelError>, JoinError>,
        errors: &mpsc::UnboundedSender<ModelError>,
    ) {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = errors.send(err);
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                tracing::error!(action = %self.action_type(), error = %err, "Effect task failed to join");
            }
        }
    }
}

/// Run one effect for one envelope and settle its completion hooks.
///
/// Fails with [`ModelError::NonCompatibleAction`] when the envelope carries
/// no hooks, i.e. it was not produced by a bound action creator. Effect
/// failures and panics settle the hooks as rejections and are not returned.
pub async fn run_effect_task(
    effect: WrappedEffect,
    envelope: ActionEnvelope,
    toolkit: Toolkit,
) -> Result<(), ModelError> {
    run_task(effect, envelope, toolkit, None).await
}

async fn run_task(
    effect: WrappedEffect,
    envelope: ActionEnvelope,
    toolkit: Toolkit,
    delay: Option<Duration>,
) -> Result<(), ModelError> {
    let Some(hooks) = envelope.hooks().cloned() else {
        let err = ModelError::NonCompatibleAction {
            action: envelope.to_string(),
        };
        tracing::error!(error = %err, "Effect task refused envelope");
        return Err(err);
    };
    let guard = CancelGuard {
        hooks,
        action_type: envelope.action_type().to_string(),
    };

    if let Some(wait) = delay.filter(|wait| !wait.is_zero()) {
        tokio::time::sleep(wait).await;
    }

    let payload = envelope.payload().clone();
    let outcome = AssertUnwindSafe(async { effect.call(payload, toolkit).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(EffectFailure::msg(format!(
                "effect {} panicked: {}",
                effect.action_type(),
                panic_message(panic.as_ref())
            )))
        });

    match outcome {
        Ok(value) => {
            tracing::debug!(action = %effect.action_type(), "Effect resolved");
            guard.hooks.resolve(value);
        }
        Err(failure) => {
            tracing::warn!(action = %effect.action_type(), error = %failure, "Effect rejected");
            guard.hooks.reject(failure);
        }
    }
    Ok(())
}

/// Rejects unsettled hooks with [`ModelError::EffectCancelled`] when a task
/// is dropped before its effect finished.
struct CancelGuard {
    hooks: CompletionHooks,
    action_type: String,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.hooks.is_settled() {
            self.hooks.reject(EffectFailure::new(ModelError::EffectCancelled {
                action_type: std::mem::take(&mut self.action_type),
            }));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Running subscription loops of activated task descriptors.
///
/// Dropping the host shuts every loop down.
#[must_use = "dropping the TaskHost stops every effect task"]
#[derive(Debug)]
pub struct TaskHost {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    errors_tx: mpsc::UnboundedSender<ModelError>,
    errors_rx: mpsc::UnboundedReceiver<ModelError>,
}

impl Default for TaskHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskHost {
    pub fn new() -> Self {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        Self {
            token: CancellationToken::new(),
            handles: Vec::new(),
            errors_tx,
            errors_rx,
        }
    }

    /// Activate `descriptor` on the current tokio runtime.
    pub fn spawn(
        &mut self,
        descriptor: TaskDescriptor,
        subscription: mpsc::UnboundedReceiver<ActionEnvelope>,
        toolkit: Toolkit,
    ) -> &mut Self {
        let shutdown = self.token.child_token();
        self.handles.push(tokio::spawn(descriptor.run(
            subscription,
            toolkit,
            shutdown,
            self.errors_tx.clone(),
        )));
        self
    }

    /// Number of activated descriptors.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Token cancelled when the host shuts down.
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the next task error, such as an effect envelope dispatched
    /// without completion hooks.
    ///
    /// Pending forever while the host runs and no task fails.
    pub async fn next_error(&mut self) -> Option<ModelError> {
        self.errors_rx.recv().await
    }

    /// Task errors reported so far, without waiting.
    pub fn drain_errors(&mut self) -> Vec<ModelError> {
        let mut errors = Vec::new();
        while let Ok(err) = self.errors_rx.try_recv() {
            errors.push(err);
        }
        errors
    }

    /// Stop every loop and abort in-flight effect tasks.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Shut down, wait until every loop has exited and return the task
    /// errors nobody drained yet.
    pub async fn join(mut self) -> Vec<ModelError> {
        self.shutdown();
        for handle in std::mem::take(&mut self.handles) {
            let _ = handle.await;
        }
        self.drain_errors()
    }
}

impl Drop for TaskHost {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
