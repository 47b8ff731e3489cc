//! Debouncing merger for bursts of partial/final speech-recognition results.
//!
//! Final results arriving within one second of each other are fused into a
//! single emitted `Transcription`; a "user started speaking" edge fires once
//! per speech burst, the first time a partial alternative's word count
//! crosses `MIN_PARTIAL_WORDS`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::service::{CallbackId, CallbackInput, CallbackRegistry, ServiceScope};

use super::transcription::{Transcription, UNKNOWN};
#[cfg(test)]
use super::transcription::is_unknown;

/// Minimum words in the longest partial alternative before the "user started
/// speaking" edge fires.
pub const MIN_PARTIAL_WORDS: usize = 4;

/// How long the merger waits after a final result before flushing the
/// accumulated buffer, assuming no further speech arrives.
pub const TRANSCRIPTION_BUFFERING_TIME: Duration = Duration::from_millis(1000);

/// Fired once per speech burst, the edge from silence to speaking.
#[derive(Clone)]
pub struct StartSpeaking {
    pub source_tag: String,
}

impl CallbackInput for StartSpeaking {
    fn source_tag(&self) -> &str {
        &self.source_tag
    }
}

/// Per-token confidence from the provider's alignment output.
#[derive(Clone, Copy)]
pub struct TokenConfidence {
    pub confidence: f64,
}

/// One candidate reading of a result, with relative timings against stream start.
#[derive(Clone)]
pub struct Alternative {
    pub text: String,
    pub tokens: Vec<TokenConfidence>,
    pub relative_start_millis: f64,
    pub relative_end_millis: f64,
}

impl Alternative {
    fn confidence(&self) -> f64 {
        if self.tokens.is_empty() {
            UNKNOWN
        } else {
            self.tokens.iter().map(|t| t.confidence).sum::<f64>() / self.tokens.len() as f64
        }
    }

    fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    fn into_transcription(self, audio_stream_start_millis: f64, source_tag: &str) -> Transcription {
        let confidence = self.confidence();
        Transcription::new(
            self.text,
            confidence,
            Transcription::check_time(self.relative_start_millis) + audio_stream_start_millis,
            Transcription::check_time(self.relative_end_millis) + audio_stream_start_millis,
            source_tag,
        )
    }
}

/// One batch item from the provider's result stream.
#[derive(Clone)]
pub struct StreamResult {
    pub partial: bool,
    pub alternatives: Vec<Alternative>,
}

/// Debouncing merger. Lives for the duration of one STT computation;
/// `audio_stream_start_millis` is set once the subscription's first chunk
/// lands. Buffer-level state is `Arc`-wrapped so the debounce task spawned
/// on `scope` can share it without outliving `self`.
pub struct TranscriptionMerger {
    scope: Arc<ServiceScope>,
    source_tag: String,
    audio_stream_start_millis: Arc<Mutex<f64>>,
    buffered: Arc<Mutex<Transcription>>,
    merge_job: Arc<Mutex<Option<CancellationToken>>>,
    user_is_speaking: Arc<AtomicBool>,
    user_started_speaking_notified: AtomicBool,
    result_callbacks: Arc<CallbackRegistry<Transcription>>,
    start_speaking_callbacks: Arc<CallbackRegistry<StartSpeaking>>,
}

impl TranscriptionMerger {
    pub fn new(scope: Arc<ServiceScope>, source_tag: impl Into<String>) -> Self {
        let source_tag = source_tag.into();
        Self {
            scope,
            buffered: Arc::new(Mutex::new(Transcription::reset(source_tag.clone()))),
            audio_stream_start_millis: Arc::new(Mutex::new(0.0)),
            merge_job: Arc::new(Mutex::new(None)),
            user_is_speaking: Arc::new(AtomicBool::new(false)),
            user_started_speaking_notified: AtomicBool::new(false),
            result_callbacks: Arc::new(CallbackRegistry::new("transcription")),
            start_speaking_callbacks: Arc::new(CallbackRegistry::new("start-speaking")),
            source_tag,
        }
    }

    pub fn set_audio_stream_start_millis(&self, value: f64) {
        *self.audio_stream_start_millis.lock() = value;
    }

    pub fn on_transcription(&self, handler: impl Fn(Transcription) + Send + Sync + 'static) -> CallbackId {
        self.result_callbacks.add(handler)
    }

    pub fn on_start_speaking(&self, handler: impl Fn(StartSpeaking) + Send + Sync + 'static) -> CallbackId {
        self.start_speaking_callbacks.add(handler)
    }

    pub fn is_user_speaking(&self) -> bool {
        self.user_is_speaking.load(Ordering::SeqCst)
    }

    /// Process one batch of provider results. `reset_timeout` is the
    /// watchdog's `resetTimeout()`, invoked unconditionally per §4.3 step 1.
    pub fn handle_batch(&self, results: &[StreamResult], reset_timeout: impl Fn()) {
        reset_timeout();

        if results.is_empty() {
            return;
        }

        if results.iter().all(|r| r.partial) {
            self.handle_partial(results);
        } else {
            self.handle_final(results);
        }
    }

    fn handle_partial(&self, results: &[StreamResult]) {
        self.user_is_speaking.store(true, Ordering::SeqCst);

        let longest_words = results.iter().flat_map(|r| r.alternatives.iter()).map(Alternative::word_count).max().unwrap_or(0);

        if !self.user_started_speaking_notified.load(Ordering::SeqCst) && longest_words > MIN_PARTIAL_WORDS {
            self.user_started_speaking_notified.store(true, Ordering::SeqCst);
            self.start_speaking_callbacks.invoke(StartSpeaking { source_tag: self.source_tag.clone() }, Some(&self.scope));
        }
    }

    fn handle_final(&self, results: &[StreamResult]) {
        let audio_start = *self.audio_stream_start_millis.lock();

        let best = results
            .iter()
            .filter(|r| !r.partial)
            .flat_map(|r| r.alternatives.iter().cloned())
            .max_by(|a, b| a.confidence().partial_cmp(&b.confidence()).unwrap_or(std::cmp::Ordering::Equal));

        let Some(best) = best else { return };
        let best = best.into_transcription(audio_start, &self.source_tag);

        {
            let mut buffered = self.buffered.lock();
            *buffered = buffered.merge(&best);
        }

        if let Some(previous_job) = self.merge_job.lock().take() {
            previous_job.cancel();
        }
        self.user_started_speaking_notified.store(false, Ordering::SeqCst);
        self.user_is_speaking.store(false, Ordering::SeqCst);

        self.schedule_merge_flush();
    }

    /// Cancel any pending debounce flush without emitting it. Called when the
    /// owning computation is stopped.
    pub fn cancel_pending_flush(&self) {
        if let Some(job) = self.merge_job.lock().take() {
            job.cancel();
        }
    }

    fn schedule_merge_flush(&self) {
        let job_token = self.scope.cancellation_token().child_token();
        *self.merge_job.lock() = Some(job_token.clone());

        let buffered = self.buffered.clone();
        let merge_job_slot = self.merge_job.clone();
        let user_is_speaking = self.user_is_speaking.clone();
        let result_callbacks = self.result_callbacks.clone();
        let scope = self.scope.clone();
        let source_tag = self.source_tag.clone();

        self.scope.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(TRANSCRIPTION_BUFFERING_TIME) => {}
                _ = job_token.cancelled() => return,
            }

            if user_is_speaking.load(Ordering::SeqCst) {
                // A new final result started speaking again during the
                // debounce window; the next final result schedules its own
                // flush, which will include whatever is buffered now.
                return;
            }

            let flushed = std::mem::replace(&mut *buffered.lock(), Transcription::reset(source_tag));
            *merge_job_slot.lock() = None;
            if !flushed.text.is_empty() {
                debug!(text = flushed.text, "flushing debounced transcription");
                result_callbacks.invoke(flushed, Some(&scope));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn alt(text: &str, confidence: f64, start: f64, end: f64) -> Alternative {
        Alternative {
            text: text.to_string(),
            tokens: if is_unknown(confidence) { vec![] } else { vec![TokenConfidence { confidence }] },
            relative_start_millis: start,
            relative_end_millis: end,
        }
    }

    fn partial_result(text: &str) -> StreamResult {
        StreamResult { partial: true, alternatives: vec![alt(text, 0.9, 0.0, 100.0)] }
    }

    fn final_result(text: &str, confidence: f64) -> StreamResult {
        StreamResult { partial: false, alternatives: vec![alt(text, confidence, 0.0, 100.0)] }
    }

    #[tokio::test]
    async fn partial_with_enough_words_fires_start_speaking_once() {
        let scope = Arc::new(ServiceScope::new("test"));
        let merger = TranscriptionMerger::new(scope, "tag");
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        merger.on_start_speaking(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        merger.handle_batch(&[partial_result("hello there general kenobi")], || {});
        merger.handle_batch(&[partial_result("hello there general kenobi again")], || {});

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(merger.is_user_speaking());
    }

    #[tokio::test]
    async fn short_partial_does_not_fire_start_speaking() {
        let scope = Arc::new(ServiceScope::new("test"));
        let merger = TranscriptionMerger::new(scope, "tag");
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        merger.on_start_speaking(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        merger.handle_batch(&[partial_result("hi there")], || {});
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lone_final_flushes_after_the_debounce_window() {
        let scope = Arc::new(ServiceScope::new("test"));
        let merger = TranscriptionMerger::new(scope, "tag");
        let results = Arc::new(Mutex::new(Vec::<String>::new()));
        let r = results.clone();
        merger.on_transcription(move |t| r.lock().push(t.text));

        merger.handle_batch(&[final_result("hello", 0.9)], || {});
        assert!(results.lock().is_empty());

        tokio::time::sleep(TRANSCRIPTION_BUFFERING_TIME + Duration::from_millis(100)).await;
        assert_eq!(*results.lock(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn final_then_partial_then_final_merges_into_one_callback() {
        let scope = Arc::new(ServiceScope::new("test"));
        let merger = TranscriptionMerger::new(scope, "tag");
        let results: Arc<Mutex<Vec<Transcription>>> = Arc::new(Mutex::new(Vec::new()));
        let r = results.clone();
        merger.on_transcription(move |t| r.lock().push(t));

        merger.handle_batch(&[final_result("hello there general.", 0.8)], || {});
        tokio::time::sleep(Duration::from_millis(500)).await;
        merger.handle_batch(&[partial_result("kenobi typing")], || {});
        tokio::time::sleep(Duration::from_millis(300)).await;
        merger.handle_batch(&[final_result("kenobi.", 0.6)], || {});

        tokio::time::sleep(TRANSCRIPTION_BUFFERING_TIME + Duration::from_millis(150)).await;

        let results = results.lock();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "hello there general. kenobi.");
        assert!((results[0].confidence - 0.7).abs() < 1e-9);
    }
}
