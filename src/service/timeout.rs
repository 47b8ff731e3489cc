//! Timeout value objects: a fixed deadline, and a refreshable watchdog deadline
//! whose clock resets every time the computation body reports liveness.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A one-shot deadline fired once by `wait()` if the computation has not
/// finished in time.
#[derive(Clone)]
pub struct TimeoutSpec {
    pub deadline_millis: u64,
    pub callback: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl TimeoutSpec {
    pub fn new(deadline_millis: u64) -> Self {
        Self { deadline_millis, callback: None }
    }

    pub fn with_callback(deadline_millis: u64, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self { deadline_millis, callback: Some(Arc::new(callback)) }
    }

    pub fn fire_callback(&self) {
        if let Some(cb) = &self.callback {
            cb();
        }
    }
}

impl std::fmt::Debug for TimeoutSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutSpec")
            .field("deadline_millis", &self.deadline_millis)
            .field("callback", &self.callback.as_ref().map(|_| "Fn"))
            .finish()
    }
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// A watchdog deadline measured from the most recent `reset()`, not from
/// computation start. The implementer body calls `reset()` at every
/// quiescence point (a partial transcription, an LLM delta).
pub struct RefreshableTimeout {
    pub deadline_millis: u64,
    pub check_period_millis: u64,
    pub callback: Option<Arc<dyn Fn() + Send + Sync>>,
    last_reset_millis: AtomicI64,
}

impl RefreshableTimeout {
    pub fn new(deadline_millis: u64, check_period_millis: u64) -> Self {
        Self { deadline_millis, check_period_millis, callback: None, last_reset_millis: AtomicI64::new(now_millis()) }
    }

    pub fn with_callback(deadline_millis: u64, check_period_millis: u64, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            deadline_millis,
            check_period_millis,
            callback: Some(Arc::new(callback)),
            last_reset_millis: AtomicI64::new(now_millis()),
        }
    }

    /// Atomically mark "liveness observed now". Missing a reset never causes
    /// incorrect cancellation beyond one extra check period.
    pub fn reset(&self) {
        self.last_reset_millis.store(now_millis(), Ordering::SeqCst);
    }

    /// `true` once `now - lastReset >= deadline`.
    pub fn is_expired(&self) -> bool {
        let last = self.last_reset_millis.load(Ordering::SeqCst);
        now_millis().saturating_sub(last) >= self.deadline_millis as i64
    }

    pub fn fire_callback(&self) {
        if let Some(cb) = &self.callback {
            cb();
        }
    }
}
