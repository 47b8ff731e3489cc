//! Keyed, thread-safe callback registry with defensive input copying.
//!
//! Handlers are identified by an opaque `CallbackId` returned from `add`
//! rather than by the handler's type name — two closures with identical
//! bodies registered separately get distinct ids (see the "Callback identity"
//! design note: keying on type name was a latent bug in the source system).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::scope::ServiceScope;

/// Anything dispatched through a `CallbackRegistry` must carry a source tag
/// and be defensively copyable so handlers never observe mutations made by
/// a later producer.
pub trait CallbackInput: Clone + Send + Sync + 'static {
    fn source_tag(&self) -> &str;
    fn copy(&self) -> Self {
        self.clone()
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle returned by `add`, used to `remove` a specific handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A named set of handlers for one callback "channel" (e.g. a service's
/// result callbacks, or its error callbacks).
pub struct CallbackRegistry<T: CallbackInput> {
    name: &'static str,
    handlers: Mutex<Vec<(CallbackId, Handler<T>)>>,
}

impl<T: CallbackInput> CallbackRegistry<T> {
    pub fn new(name: &'static str) -> Self {
        Self { name, handlers: Mutex::new(Vec::new()) }
    }

    /// Register a handler, returning the id used to `remove` it later.
    /// Upserts are not implicit here (each call always appends) — callers
    /// that want "replace" semantics should `remove` the old id first.
    pub fn add(&self, handler: impl Fn(T) + Send + Sync + 'static) -> CallbackId {
        let id = CallbackId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    pub fn remove(&self, id: CallbackId) {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        if handlers.len() == before {
            warn!(registry = self.name, ?id, "remove: no handler registered under this id");
        }
    }

    pub fn clear(&self) {
        self.handlers.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deep-copy `input`, then fan it out to every handler.
    ///
    /// With `scope` set, each handler runs as an independent cooperative task
    /// on that scope (unordered across handlers, FIFO per handler, cascades
    /// cancellation with the scope). With `scope` absent, handlers run inline
    /// on the caller's thread — used by `activate`/`deactivate`/`stop`, where
    /// the caller explicitly accepts the blocking cost.
    pub fn invoke(&self, input: T, scope: Option<&ServiceScope>) {
        let snapshot: Vec<(CallbackId, Handler<T>)> = self.handlers.lock().clone();
        let tag = input.source_tag().to_string();
        let started = Instant::now();

        for (id, handler) in snapshot {
            let copied = input.copy();
            match scope {
                Some(scope) => {
                    let handler = handler.clone();
                    scope.spawn(async move {
                        handler(copied);
                    });
                }
                None => {
                    let per_handler_start = Instant::now();
                    handler(copied);
                    tracing::trace!(registry = self.name, ?id, elapsed_us = per_handler_start.elapsed().as_micros(), "handler ran inline");
                }
            }
        }

        info!(registry = self.name, tag, elapsed_us = started.elapsed().as_micros(), "fanned out callback");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Clone)]
    struct Ping {
        tag: String,
        seq: u32,
    }

    impl CallbackInput for Ping {
        fn source_tag(&self) -> &str {
            &self.tag
        }
    }

    #[test]
    fn invoke_inline_calls_every_handler_synchronously() {
        let registry: CallbackRegistry<Ping> = CallbackRegistry::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = calls.clone();
        registry.add(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = calls.clone();
        registry.add(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        registry.invoke(Ping { tag: "t".into(), seq: 1 }, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn remove_by_id_stops_future_dispatch() {
        let registry: CallbackRegistry<Ping> = CallbackRegistry::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = registry.add(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.invoke(Ping { tag: "t".into(), seq: 1 }, None);
        registry.remove(id);
        registry.invoke(Ping { tag: "t".into(), seq: 2 }, None);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn identical_closures_get_distinct_ids() {
        let registry: CallbackRegistry<Ping> = CallbackRegistry::new("test");
        let id_a = registry.add(|_| {});
        let id_b = registry.add(|_| {});
        assert_ne!(id_a, id_b);
    }

    #[tokio::test]
    async fn invoke_on_scope_dispatches_asynchronously() {
        let scope = ServiceScope::new("test");
        let registry: CallbackRegistry<Ping> = CallbackRegistry::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        registry.add(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.invoke(Ping { tag: "t".into(), seq: 1 }, Some(&scope));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
