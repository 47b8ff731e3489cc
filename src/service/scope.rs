//! The task group a `ReusableService` schedules all its work on.
//!
//! A `ServiceScope` is a structured-cancellation boundary: one
//! `tokio_util::sync::CancellationToken` plus a `tokio::task::JoinSet` with
//! supervisor semantics — a child task's failure or panic is observed and
//! logged by the reaper, but never cancels its siblings. Only
//! `cancel_scope()` tears the whole group down, permanently.

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cooperative task group owned by one service family (e.g. one speech-to-text
/// service instance, or a service's module-level singleton per §9's "the
/// source does via a module-level scope").
pub struct ServiceScope {
    name: &'static str,
    token: CancellationToken,
    tasks: parking_lot::Mutex<JoinSet<()>>,
}

impl ServiceScope {
    pub fn new(name: &'static str) -> Self {
        Self { name, token: CancellationToken::new(), tasks: parking_lot::Mutex::new(JoinSet::new()) }
    }

    /// Token observers can race against (`tokio::select!` with a sleep, a
    /// network read, …) to notice cancellation promptly.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a child task in the group. Supervisor semantics: if `fut` panics
    /// or the task is aborted, that is logged by `reap_finished` and does not
    /// propagate to siblings.
    pub fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().spawn(fut);
    }

    /// Drain any already-finished children, logging failures. Cheap, meant to
    /// be called opportunistically (e.g. from a watchdog tick) rather than
    /// awaited on a hot path.
    pub fn reap_finished(&self) {
        let mut tasks = self.tasks.lock();
        while let Some(result) = tasks.try_join_next() {
            if let Err(err) = result {
                if err.is_cancelled() {
                    debug!(scope = self.name, "child task cancelled");
                } else {
                    warn!(scope = self.name, error = %err, "child task panicked");
                }
            }
        }
    }

    /// Terminate the task group and set the terminal `scopeCancelled` flag.
    /// No further `activate` is possible on a service using a cancelled scope.
    pub async fn cancel(&self) {
        self.token.cancel();
        let mut tasks = self.tasks.lock();
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn spawned_task_runs() {
        let scope = ServiceScope::new("test");
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        scope.spawn(async move {
            ran2.store(true, Ordering::SeqCst);
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_sets_token_and_stops_future_spawns_from_doing_work() {
        let scope = ServiceScope::new("test");
        let token = scope.cancellation_token();
        assert!(!scope.is_cancelled());
        scope.cancel().await;
        assert!(scope.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn sibling_panic_does_not_cancel_scope() {
        let scope = ServiceScope::new("test");
        scope.spawn(async move {
            panic!("boom");
        });
        let survived = Arc::new(AtomicBool::new(false));
        let survived2 = survived.clone();
        scope.spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            survived2.store(true, Ordering::SeqCst);
        });
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        scope.reap_finished();
        assert!(survived.load(Ordering::SeqCst));
        assert!(!scope.is_cancelled());
    }
}
