//! `ReusableService`: the generic lifecycle state machine every external
//! service (speech-to-text, LLM, text-to-speech) is built on.
//!
//! State is the Cartesian product of two flags, `(active, computing)`. Legal
//! states are idle `(F,F)`, ready `(T,F)`, and running `(T,T)`; `(F,T)` is
//! unreachable by construction because `computeAsync` requires `active`.
//! `scope_cancelled` is monotonic: once set, no transition out of idle is
//! permitted again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::callback::{CallbackId, CallbackInput, CallbackRegistry};
use super::error::{Classification, ErrorSource, ServiceError, classify};
use super::scope::ServiceScope;
use super::timeout::{RefreshableTimeout, TimeoutSpec};

/// Handle passed into an implementer's `on_compute` body so it can report
/// liveness (`reset_timeout`) and notice cooperative cancellation promptly.
pub struct ComputeContext {
    tag: String,
    timeout: Option<Arc<RefreshableTimeout>>,
    cancel_token: CancellationToken,
}

impl ComputeContext {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Call at any quiescence point (a partial transcription, an LLM delta)
    /// to push the watchdog's deadline out from now.
    pub fn reset_timeout(&self) {
        if let Some(timeout) = &self.timeout {
            timeout.reset();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Await cancellation — intended for `tokio::select!` alongside whatever
    /// suspension point the body is blocked on (a network read, a sleep).
    pub async fn cancelled(&self) {
        self.cancel_token.cancelled().await;
    }

    /// Build a standalone context for unit-testing a hook body in isolation,
    /// without a full `ReusableService` around it.
    #[cfg(test)]
    pub(crate) fn for_test(tag: impl Into<String>, cancel_token: CancellationToken) -> Self {
        Self { tag: tag.into(), timeout: None, cancel_token }
    }
}

/// Implementer hooks a `ReusableService` drives through its lifecycle.
/// Collapses the source's `ServiceInterface -> Service -> ReusableService`
/// inheritance tower into one trait.
#[async_trait]
pub trait ServiceHooks: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: CallbackInput;

    /// Acquire whatever shared resource this service fronts (a provider
    /// client, a subscription slot). Returning `Err` leaves `active=false`.
    async fn on_activate(&self, tag: &str) -> Result<(), String>;

    /// Run one computation. The body should periodically check
    /// `ctx.is_cancelled()` (or race `ctx.cancelled()` in a `select!`) at its
    /// suspension points so `stop()` can take effect promptly.
    async fn on_compute(&self, input: Self::Input, ctx: &ComputeContext) -> Result<Self::Output, String>;

    /// Release the shared resource acquired in `on_activate`.
    async fn on_deactivate(&self, tag: &str) -> Result<(), String>;

    /// Optional extra teardown run synchronously when `stop()` is called,
    /// before the computation task is asked to cancel (e.g. completing a
    /// provider response handler so its internal buffers release).
    async fn on_stop(&self, _tag: &str) {}
}

/// Generic state-machine lifecycle wrapping an implementer's `ServiceHooks`.
///
/// All operations are idempotent with respect to wrong-state invocations:
/// they log at `warn` and return `false` rather than raising.
pub struct ReusableService<H: ServiceHooks> {
    hooks: Arc<H>,
    scope: Arc<ServiceScope>,
    active: AtomicBool,
    computing_tx: watch::Sender<bool>,
    computing_rx: watch::Receiver<bool>,
    scope_cancelled: AtomicBool,
    compute_token: Mutex<Option<CancellationToken>>,
    result_callbacks: Arc<CallbackRegistry<H::Output>>,
    error_callbacks: Arc<CallbackRegistry<ServiceError>>,
}

impl<H: ServiceHooks> ReusableService<H> {
    pub fn new(name: &'static str, hooks: H) -> Self {
        Self::new_with_scope(name, hooks, Arc::new(ServiceScope::new(name)))
    }

    /// Like `new`, but shares `scope` with some other collaborator (e.g. a
    /// transcription merger) so cancelling the service cancels both.
    pub fn new_with_scope(_name: &'static str, hooks: H, scope: Arc<ServiceScope>) -> Self {
        let (computing_tx, computing_rx) = watch::channel(false);
        Self {
            hooks: Arc::new(hooks),
            scope,
            active: AtomicBool::new(false),
            computing_tx,
            computing_rx,
            scope_cancelled: AtomicBool::new(false),
            compute_token: Mutex::new(None),
            result_callbacks: Arc::new(CallbackRegistry::new("result")),
            error_callbacks: Arc::new(CallbackRegistry::new("error")),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_computing(&self) -> bool {
        *self.computing_rx.borrow()
    }

    pub fn is_scope_cancelled(&self) -> bool {
        self.scope_cancelled.load(Ordering::SeqCst)
    }

    pub fn on_result(&self, handler: impl Fn(H::Output) + Send + Sync + 'static) -> CallbackId {
        self.result_callbacks.add(handler)
    }

    pub fn on_error(&self, handler: impl Fn(ServiceError) + Send + Sync + 'static) -> CallbackId {
        self.error_callbacks.add(handler)
    }

    fn set_computing(&self, value: bool) {
        let _ = self.computing_tx.send(value);
    }

    /// Run `on_activate`. Precondition: `!active && !scope_cancelled`.
    pub async fn activate(&self, tag: &str) -> bool {
        if self.scope_cancelled.load(Ordering::SeqCst) {
            warn!(tag, "activate: scope already cancelled");
            return false;
        }
        if self.active.load(Ordering::SeqCst) {
            warn!(tag, "activate: already active");
            return false;
        }

        match self.hooks.on_activate(tag).await {
            Ok(()) => {
                self.active.store(true, Ordering::SeqCst);
                info!(tag, "activated");
                true
            }
            Err(cause) => {
                self.route_error(cause, ErrorSource::Activating, tag, false);
                false
            }
        }
    }

    /// Start a computation. Precondition: `active && !computing`. Returns
    /// whether the computation *started* — never the eventual result, which
    /// arrives through the result/error callback registries.
    pub fn compute_async(&self, input: H::Input, timeout: Option<Arc<RefreshableTimeout>>, tag: impl Into<String>) -> bool
    where
        H::Input: 'static,
    {
        let tag = tag.into();

        if !self.active.load(Ordering::SeqCst) {
            warn!(tag, "computeAsync: not active");
            return false;
        }
        if self.is_computing() {
            warn!(tag, "computeAsync: already computing");
            return false;
        }

        let compute_token = self.scope.cancellation_token().child_token();
        *self.compute_token.lock() = Some(compute_token.clone());
        self.set_computing(true);

        let ctx = ComputeContext { tag: tag.clone(), timeout: timeout.clone(), cancel_token: compute_token.clone() };

        let hooks = self.hooks.clone();
        let hooks_for_watchdog = self.hooks.clone();
        let scope = self.scope.clone();
        let result_callbacks = self.result_callbacks.clone();
        let error_callbacks = self.error_callbacks.clone();
        let computing_tx = self.computing_tx.clone();
        let done = Arc::new(AtomicBool::new(false));

        let started = Instant::now();
        let tag_for_compute = tag.clone();
        let done_for_compute = done.clone();
        let scope_for_compute = scope.clone();
        self.scope.spawn(async move {
            let outcome = hooks.on_compute(input, &ctx).await;
            done_for_compute.store(true, Ordering::SeqCst);
            let _ = computing_tx.send(false);

            match outcome {
                Ok(output) => {
                    debug!(tag = tag_for_compute, elapsed_ms = started.elapsed().as_millis(), "computation finished");
                    result_callbacks.invoke(output, Some(&scope_for_compute));
                }
                Err(cause) => match classify(&cause, ErrorSource::Computing, tag_for_compute.clone(), ctx.is_cancelled()) {
                    Classification::Cancelled => {
                        trace!(tag = tag_for_compute, "computation cancelled");
                    }
                    Classification::Operational(err) => {
                        error!(tag = tag_for_compute, error = %err, "computation failed");
                        error_callbacks.invoke(err, None);
                    }
                },
            }
        });

        if let Some(timeout) = timeout {
            let check_period = Duration::from_millis(timeout.check_period_millis);
            let tag_for_watchdog = tag.clone();
            self.scope.spawn(async move {
                loop {
                    if done.load(Ordering::SeqCst) {
                        return;
                    }
                    tokio::time::sleep(check_period).await;
                    if done.load(Ordering::SeqCst) {
                        return;
                    }
                    if timeout.is_expired() {
                        warn!(tag = tag_for_watchdog, "watchdog deadline exceeded, stopping");
                        hooks_for_watchdog.on_stop(&tag_for_watchdog).await;
                        compute_token.cancel();
                        timeout.fire_callback();
                        return;
                    }
                }
            });
        }

        true
    }

    /// Await the in-flight computation. If `timeout` is supplied, races the
    /// join against a cooperative sleep; on loss, `stop` fires and so does
    /// the timeout's callback. Returns `true` if the computation finished on
    /// its own, `false` if this wait timed out.
    pub async fn wait(&self, timeout: Option<&TimeoutSpec>, tag: &str) -> bool {
        if !self.is_computing() {
            warn!(tag, "wait: not computing");
            return true;
        }

        let mut rx = self.computing_rx.clone();
        let join = async {
            while *rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };

        match timeout {
            None => {
                join.await;
                true
            }
            Some(spec) => {
                tokio::select! {
                    _ = join => true,
                    _ = tokio::time::sleep(Duration::from_millis(spec.deadline_millis)) => {
                        warn!(tag, "wait timed out, stopping");
                        self.stop(tag).await;
                        spec.fire_callback();
                        false
                    }
                }
            }
        }
    }

    /// Request cancellation of the in-flight computation (and its watchdog,
    /// if any). Does not wait for quiescence — follow with `wait()` for that.
    pub async fn stop(&self, tag: &str) -> bool {
        if !self.is_computing() {
            warn!(tag, "stop: not computing");
            return false;
        }

        self.hooks.on_stop(tag).await;

        if let Some(token) = self.compute_token.lock().clone() {
            token.cancel();
        }

        true
    }

    /// Run `on_deactivate`. Precondition: `active && !computing`.
    pub async fn deactivate(&self, tag: &str) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            warn!(tag, "deactivate: not active");
            return false;
        }
        if self.is_computing() {
            warn!(tag, "deactivate: still computing");
            return false;
        }

        match self.hooks.on_deactivate(tag).await {
            Ok(()) => {
                self.active.store(false, Ordering::SeqCst);
                info!(tag, "deactivated");
                true
            }
            Err(cause) => {
                self.route_error(cause, ErrorSource::Deactivating, tag, false);
                false
            }
        }
    }

    /// Terminate the task group permanently. Precondition: `!computing`.
    pub async fn cancel_scope(&self) -> bool {
        if self.is_computing() {
            warn!("cancelScope: still computing");
            return false;
        }
        self.scope.cancel().await;
        self.scope_cancelled.store(true, Ordering::SeqCst);
        true
    }

    fn route_error(&self, cause: String, source: ErrorSource, tag: &str, is_cancellation: bool) {
        match classify(&cause, source, tag, is_cancellation) {
            Classification::Cancelled => trace!(tag, "swallowed cancellation"),
            Classification::Operational(err) => {
                error!(tag, error = %err, "operation failed");
                self.error_callbacks.invoke(err, None);
            }
        }
    }
}
