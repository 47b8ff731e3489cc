//! Pull-based audio publisher bridging a blocking byte stream into the
//! cooperative scheduler.
//!
//! The provider SDK this fronts reads audio on its own thread, so the pump
//! loop cannot run on the async runtime: it gets one dedicated OS thread per
//! subscription. The only cross-thread signal is an atomic demand counter.
//! §9's "Process-wide state" redesign note replaces the source's
//! module-level subscription slot with an explicit `SubscriptionRegistry`
//! the caller owns, so tests can substitute a fake source.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

/// One pull of PCM audio bytes (linear PCM, 16 kHz, 16-bit signed, mono,
/// little-endian — see `PCM_FORMAT` in `crate::stt`).
pub type AudioChunk = Vec<u8>;

/// The out-of-scope collaborator: a lazy, possibly infinite byte source (a
/// live microphone capture, a file, a test fixture). A blocking read of up
/// to `buf.len()` bytes returns the actual count; `Ok(0)` means end-of-stream.
pub trait AudioSource: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Visitor the subscription delivers pulled chunks to.
pub trait AudioSubscriber: Send + Sync {
    fn on_next(&self, chunk: AudioChunk);
    fn on_complete(&self);
    fn on_error(&self, error: String);
}

/// One subscription's demand + lifecycle state, shared between the calling
/// thread and the dedicated pump thread.
struct SubscriptionState {
    demand: AtomicI64,
    open: AtomicBool,
    pump_running: AtomicBool,
}

/// A live pull-subscription against an `AudioSource`. Single-subscriber:
/// only one `Subscription` is meant to be active per publisher at a time.
pub struct Subscription {
    state: Arc<SubscriptionState>,
}

impl Subscription {
    fn spawn(source: Arc<dyn AudioSource>, subscriber: Arc<dyn AudioSubscriber>, chunk_size: usize) -> Self {
        let state = Arc::new(SubscriptionState { demand: AtomicI64::new(0), open: AtomicBool::new(true), pump_running: AtomicBool::new(false) });

        Self { state }.with_pump(source, subscriber, chunk_size)
    }

    fn with_pump(self, source: Arc<dyn AudioSource>, subscriber: Arc<dyn AudioSubscriber>, chunk_size: usize) -> Self {
        self.maybe_start_pump(source, subscriber, chunk_size);
        self
    }

    fn maybe_start_pump(&self, source: Arc<dyn AudioSource>, subscriber: Arc<dyn AudioSubscriber>, chunk_size: usize) {
        if self.state.pump_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = self.state.clone();
        std::thread::spawn(move || {
            let mut buf = vec![0u8; chunk_size];
            while state.open.load(Ordering::SeqCst) {
                if state.demand.load(Ordering::SeqCst) <= 0 {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    continue;
                }

                match source.read(&mut buf) {
                    Ok(0) => {
                        debug!("audio source reached end of stream");
                        state.open.store(false, Ordering::SeqCst);
                        subscriber.on_complete();
                        break;
                    }
                    Ok(n) => {
                        state.demand.fetch_sub(1, Ordering::SeqCst);
                        subscriber.on_next(buf[..n].to_vec());
                    }
                    Err(err) => {
                        warn!(error = %err, "audio source read failed");
                        state.open.store(false, Ordering::SeqCst);
                        subscriber.on_error(err.to_string());
                        break;
                    }
                }
            }
            state.pump_running.store(false, Ordering::SeqCst);
        });
    }

    /// Add `n` to outstanding demand; the pump thread consumes it one chunk
    /// at a time.
    pub fn request(&self, n: i64) {
        self.state.demand.fetch_add(n, Ordering::SeqCst);
    }

    /// Shut the pump thread down and close the stream.
    pub fn cancel(&self) {
        self.state.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }
}

/// Single-subscriber publisher: producing fixed-size `AudioChunk`s from an
/// `AudioSource` on demand. Subscribing while a previous subscription exists
/// cancels and replaces it.
pub struct AudioPublisher {
    chunk_size: usize,
}

impl AudioPublisher {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    pub fn subscribe(&self, source: Arc<dyn AudioSource>, subscriber: Arc<dyn AudioSubscriber>) -> Subscription {
        Subscription::spawn(source, subscriber, self.chunk_size)
    }
}

/// Explicit registry for the "current subscription" slot, replacing the
/// source's process-wide mutable with something tests can substitute.
#[derive(Default)]
pub struct SubscriptionRegistry {
    current: Mutex<Option<Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current subscription, cancelling whatever was there.
    pub fn set(&self, subscription: Subscription) {
        let mut slot = self.current.lock();
        if let Some(previous) = slot.take() {
            previous.cancel();
        }
        *slot = Some(subscription);
    }

    pub fn request(&self, n: i64) {
        if let Some(sub) = self.current.lock().as_ref() {
            sub.request(n);
        }
    }

    /// Cancel and clear whatever subscription is current, if any. Safe to
    /// call even with no active subscription.
    pub fn stop(&self) {
        if let Some(sub) = self.current.lock().take() {
            sub.cancel();
        }
    }

    pub fn has_active(&self) -> bool {
        self.current.lock().as_ref().is_some_and(Subscription::is_open)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;

    struct FixedSource {
        chunks: StdMutex<Vec<Vec<u8>>>,
    }

    impl AudioSource for FixedSource {
        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            let mut chunks = self.chunks.lock().unwrap();
            if chunks.is_empty() {
                return Ok(0);
            }
            let chunk = chunks.remove(0);
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        }
    }

    #[derive(Default)]
    struct RecordingSubscriber {
        received: StdMutex<Vec<AudioChunk>>,
        completed: std::sync::atomic::AtomicBool,
        errored: StdMutex<Option<String>>,
    }

    impl AudioSubscriber for RecordingSubscriber {
        fn on_next(&self, chunk: AudioChunk) {
            self.received.lock().unwrap().push(chunk);
        }
        fn on_complete(&self) {
            self.completed.store(true, Ordering::SeqCst);
        }
        fn on_error(&self, error: String) {
            *self.errored.lock().unwrap() = Some(error);
        }
    }

    #[test]
    fn pump_delivers_chunks_on_demand_and_completes_on_empty_read() {
        let source = Arc::new(FixedSource { chunks: StdMutex::new(vec![vec![1, 2, 3], vec![4, 5]]) });
        let subscriber = Arc::new(RecordingSubscriber::default());
        let publisher = AudioPublisher::new(8);

        let subscription = publisher.subscribe(source, subscriber.clone());
        subscription.request(10);

        std::thread::sleep(Duration::from_millis(100));

        let received = subscriber.received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], vec![1, 2, 3]);
        assert!(subscriber.completed.load(Ordering::SeqCst));
    }

    struct InfiniteSource;
    impl AudioSource for InfiniteSource {
        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            buf.fill(0);
            Ok(buf.len())
        }
    }

    #[test]
    fn new_subscription_cancels_the_previous_one() {
        let registry = SubscriptionRegistry::new();
        let subscriber = Arc::new(RecordingSubscriber::default());
        let publisher = AudioPublisher::new(8);

        let first = publisher.subscribe(Arc::new(InfiniteSource), subscriber.clone());
        assert!(first.is_open());
        registry.set(first);
        assert!(registry.has_active());

        let second = publisher.subscribe(Arc::new(InfiniteSource), subscriber);
        registry.set(second);
        assert!(registry.has_active());

        registry.stop();
        assert!(!registry.has_active());
    }
}
