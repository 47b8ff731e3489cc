//! `SpeechToTextService`: wires the audio publisher, a provider-specific
//! streaming client, and the transcription merger onto `ReusableService`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::service::{CallbackId, CallbackInput, ComputeContext, ReusableService, ServiceError, ServiceHooks, ServiceScope};

use super::audio::{AudioChunk, AudioPublisher, AudioSource, AudioSubscriber, SubscriptionRegistry};
use super::merger::{StartSpeaking, TranscriptionMerger};
use super::transcription::Transcription;

/// One completed streaming session, fed back through the wrapped service's
/// own result registry. The interesting output — transcriptions and speaking
/// edges — arrives through the merger's callbacks instead, registered via
/// `SpeechToTextService::on_transcription`/`on_start_speaking`.
#[derive(Clone)]
pub struct StreamCompletion {
    pub source_tag: String,
}

impl CallbackInput for StreamCompletion {
    fn source_tag(&self) -> &str {
        &self.source_tag
    }
}

/// The provider SDK's streaming contract: consume pulled audio chunks,
/// deliver batches of `StreamResult` to `on_batch`, and resolve once the
/// provider closes the stream or the computation is cancelled.
#[async_trait]
pub trait SttProvider: Send + Sync + 'static {
    async fn stream(
        &self,
        chunks: mpsc::UnboundedReceiver<AudioChunk>,
        ctx: &ComputeContext,
        on_batch: &(dyn for<'r> Fn(&'r [super::merger::StreamResult]) + Send + Sync),
    ) -> Result<(), String>;
}

struct ForwardingSubscriber {
    tx: mpsc::UnboundedSender<AudioChunk>,
}

impl AudioSubscriber for ForwardingSubscriber {
    fn on_next(&self, chunk: AudioChunk) {
        let _ = self.tx.send(chunk);
    }
    fn on_complete(&self) {}
    fn on_error(&self, _error: String) {}
}

struct SttHooks<P: SttProvider> {
    provider: Arc<P>,
    publisher: AudioPublisher,
    subscriptions: SubscriptionRegistry,
    merger: Arc<TranscriptionMerger>,
}

#[async_trait]
impl<P: SttProvider> ServiceHooks for SttHooks<P> {
    type Input = Arc<dyn AudioSource>;
    type Output = StreamCompletion;

    async fn on_activate(&self, _tag: &str) -> Result<(), String> {
        Ok(())
    }

    async fn on_compute(&self, input: Arc<dyn AudioSource>, ctx: &ComputeContext) -> Result<StreamCompletion, String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = Arc::new(ForwardingSubscriber { tx });
        let subscription = self.publisher.subscribe(input, subscriber);
        subscription.request(i64::MAX);
        self.subscriptions.set(subscription);

        self.merger.set_audio_stream_start_millis(now_millis());

        let merger = self.merger.clone();
        let on_batch = move |batch: &[super::merger::StreamResult]| {
            merger.handle_batch(batch, || ctx.reset_timeout());
        };

        self.provider.stream(rx, ctx, &on_batch).await?;

        Ok(StreamCompletion { source_tag: ctx.tag().to_string() })
    }

    async fn on_deactivate(&self, _tag: &str) -> Result<(), String> {
        self.subscriptions.stop();
        Ok(())
    }

    async fn on_stop(&self, _tag: &str) {
        self.subscriptions.stop();
        self.merger.cancel_pending_flush();
    }
}

fn now_millis() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as f64).unwrap_or(0.0)
}

/// Streaming speech-to-text adapter: owns the audio publisher, the merger,
/// and the underlying lifecycle state machine.
pub struct SpeechToTextService<P: SttProvider> {
    inner: ReusableService<SttHooks<P>>,
    merger: Arc<TranscriptionMerger>,
}

impl<P: SttProvider> SpeechToTextService<P> {
    pub fn new(name: &'static str, chunk_size: usize, provider: P, source_tag: impl Into<String>) -> Self {
        let scope = Arc::new(ServiceScope::new(name));
        let merger = Arc::new(TranscriptionMerger::new(scope.clone(), source_tag));
        let hooks = SttHooks { provider: Arc::new(provider), publisher: AudioPublisher::new(chunk_size), subscriptions: SubscriptionRegistry::new(), merger: merger.clone() };
        Self { inner: ReusableService::new_with_scope(name, hooks, scope), merger }
    }

    pub fn on_transcription(&self, handler: impl Fn(Transcription) + Send + Sync + 'static) -> CallbackId {
        self.merger.on_transcription(handler)
    }

    pub fn on_start_speaking(&self, handler: impl Fn(StartSpeaking) + Send + Sync + 'static) -> CallbackId {
        self.merger.on_start_speaking(handler)
    }

    pub fn on_error(&self, handler: impl Fn(ServiceError) + Send + Sync + 'static) -> CallbackId {
        self.inner.on_error(handler)
    }

    pub async fn activate(&self, tag: &str) -> bool {
        self.inner.activate(tag).await
    }

    pub fn compute_async(&self, source: Arc<dyn AudioSource>, tag: impl Into<String>) -> bool {
        self.inner.compute_async(source, None, tag)
    }

    pub async fn wait(&self, tag: &str) -> bool {
        self.inner.wait(None, tag).await
    }

    pub async fn stop(&self, tag: &str) -> bool {
        self.inner.stop(tag).await
    }

    pub async fn deactivate(&self, tag: &str) -> bool {
        self.inner.deactivate(tag).await
    }

    pub async fn cancel_scope(&self) -> bool {
        self.inner.cancel_scope().await
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::super::merger::{Alternative, StreamResult, TokenConfidence};
    use super::*;

    struct SilentSource;
    impl AudioSource for SilentSource {
        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            buf.fill(0);
            Ok(buf.len())
        }
    }

    struct ScriptedProvider {
        batches: Vec<Vec<StreamResult>>,
    }

    #[async_trait]
    impl SttProvider for ScriptedProvider {
        async fn stream(&self, mut chunks: mpsc::UnboundedReceiver<AudioChunk>, ctx: &ComputeContext, on_batch: &(dyn for<'r> Fn(&'r [StreamResult]) + Send + Sync)) -> Result<(), String> {
            for batch in &self.batches {
                tokio::select! {
                    _ = chunks.recv() => {}
                    _ = ctx.cancelled() => return Err("cancelled".to_string()),
                }
                on_batch(batch);
            }
            Ok(())
        }
    }

    fn alt(text: &str) -> Alternative {
        Alternative { text: text.to_string(), tokens: vec![TokenConfidence { confidence: 0.9 }], relative_start_millis: 0.0, relative_end_millis: 100.0 }
    }

    #[tokio::test]
    async fn end_to_end_batch_reaches_transcription_callback() {
        let provider = ScriptedProvider { batches: vec![vec![StreamResult { partial: false, alternatives: vec![alt("hello there")] }]] };
        let service = SpeechToTextService::new("stt-test", 1024, provider, "tag");

        let texts = Arc::new(StdMutex::new(Vec::new()));
        let t = texts.clone();
        service.on_transcription(move |tr| t.lock().unwrap().push(tr.text));

        let completions = Arc::new(AtomicUsize::new(0));
        let c = completions.clone();
        service.on_error(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        service.activate("tag").await;
        service.compute_async(Arc::new(SilentSource), "tag");
        service.wait("tag").await;

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(*texts.lock().unwrap(), vec!["hello there".to_string()]);
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }
}
