//! Demo binary: wires `SpeechToTextService` and `LlmService` onto a fake
//! provider pair so the whole lifecycle runs end-to-end without live cloud
//! credentials, then prints the resulting conversation.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use ringcore::config::AppConfig;
use ringcore::llm::{BedrockDefaults, LlmProvider, LlmRequest, LlmService, Message, Role as LlmRole, StreamEvent};
use ringcore::memory::ConversationStore;
use ringcore::prompt::{self, VariableRegistry};
use ringcore::stt::{AudioChunk, AudioSource, PCM_FORMAT, SpeechToTextService, SttProvider, StreamResult};
use ringcore::service::ComputeContext;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

/// Produces one fixed block of silence then ends the stream, standing in
/// for a live microphone capture.
struct SilentAudioSource {
    remaining_reads: AtomicUsize,
}

impl AudioSource for SilentAudioSource {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining_reads.fetch_sub(1, Ordering::SeqCst) == 0 {
            self.remaining_reads.store(0, Ordering::SeqCst);
            return Ok(0);
        }
        buf.fill(0);
        Ok(buf.len())
    }
}

/// Stands in for the cloud STT provider: replies with one scripted final
/// transcript after the first audio chunk arrives.
struct FakeSttProvider {
    text: &'static str,
}

#[async_trait]
impl SttProvider for FakeSttProvider {
    async fn stream(&self, mut chunks: mpsc::UnboundedReceiver<AudioChunk>, ctx: &ComputeContext, on_batch: &(dyn for<'r> Fn(&'r [StreamResult]) + Send + Sync)) -> Result<(), String> {
        use ringcore::stt::{Alternative, TokenConfidence};

        tokio::select! {
            _ = chunks.recv() => {}
            _ = ctx.cancelled() => return Err("cancelled".to_string()),
        }

        let alternative = Alternative { text: self.text.to_string(), tokens: vec![TokenConfidence { confidence: 0.95 }], relative_start_millis: 0.0, relative_end_millis: 900.0 };
        let batch = [StreamResult { partial: false, alternatives: vec![alternative] }];
        on_batch(&batch);
        Ok(())
    }
}

/// Stands in for the cloud LLM provider: streams a canned reply one word at
/// a time.
struct FakeLlmProvider {
    reply: &'static str,
}

#[async_trait]
impl LlmProvider for FakeLlmProvider {
    async fn stream(&self, _request: LlmRequest, ctx: &ComputeContext, on_event: &mut (dyn FnMut(StreamEvent) + Send)) -> Result<(), String> {
        on_event(StreamEvent::MessageStart);
        for (i, word) in self.reply.split(' ').enumerate() {
            tokio::select! {
                _ = tokio::time::sleep(tokio::time::Duration::from_millis(20)) => {}
                _ = ctx.cancelled() => return Err("cancelled".to_string()),
            }
            let prefix = if i == 0 { "" } else { " " };
            on_event(StreamEvent::ContentBlockDelta(format!("{prefix}{word}")));
        }
        on_event(StreamEvent::MessageStop { stop_reason: "end_turn".to_string() });
        on_event(StreamEvent::Metadata { latency_ms: 40, input_tokens: 12, output_tokens: self.reply.split(' ').count() as u32 });
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_args();

    let filter = EnvFilter::try_from_default_env().or_else(|_| if config.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") }).unwrap();

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]"))).init();

    info!("ringcore demo starting (pcm={}Hz/{}bit/{}ch)", PCM_FORMAT.sample_rate_hz, PCM_FORMAT.bits_per_sample, PCM_FORMAT.channels);
    config.validate()?;
    config.log_config();

    let store = Arc::new(parking_lot::Mutex::new(ConversationStore::new()));
    store.lock().append_user(vec!["what's the weather like".to_string()]).ok();

    let stt = SpeechToTextService::new("demo-stt", config.transcribe_chunk_size, FakeSttProvider { text: "what's the weather like" }, "demo");
    let llm = LlmService::new("demo-llm", FakeLlmProvider { reply: "It is sunny and mild today." });

    let transcribed = Arc::new(tokio::sync::Notify::new());
    let transcribed_signal = transcribed.clone();
    stt.on_transcription(move |t| {
        info!(text = t.text, "transcription received");
        transcribed_signal.notify_one();
    });
    stt.on_error(|err| tracing::error!(%err, "stt error"));

    let responded = Arc::new(tokio::sync::Notify::new());
    let responded_signal = responded.clone();
    let store_for_response = store.clone();
    llm.on_result(move |resp| {
        info!(message = resp.message, "assistant responded");
        store_for_response.lock().append_assistant(vec![resp.message]).ok();
        responded_signal.notify_one();
    });
    llm.on_error(|err| tracing::error!(%err, "llm error"));

    stt.activate("demo").await;
    llm.activate("demo").await;

    stt.compute_async(Arc::new(SilentAudioSource { remaining_reads: AtomicUsize::new(1) }), "demo");
    transcribed.notified().await;
    stt.wait("demo").await;

    let mut registry = VariableRegistry::new();
    registry.register("currentDate", || "2026-08-01".to_string());
    let source = "__* Var *__\n- today = currentDate\n__ Role __\nYou are a concise phone assistant. Today is {{today}}.";
    let parsed = prompt::parse(source, &registry).expect("demo prompt source is well-formed");
    let rendered = parsed.apply_variables(&registry);
    let system_prompt = parsed.format_for_llm(&rendered, &["Role".to_string()], false, false);

    let defaults = BedrockDefaults::from_env();
    let messages = store.lock().llm_view().iter().map(|m| Message { role: if m.role == ringcore::memory::Role::User { LlmRole::User } else { LlmRole::Assistant }, contents: m.contents.clone() }).collect();
    let request = LlmRequest::new(vec![system_prompt], messages, &defaults);

    llm.compute_async(request, "demo");
    responded.notified().await;
    llm.wait("demo").await;

    stt.deactivate("demo").await;
    llm.deactivate("demo").await;
    stt.cancel_scope().await;
    llm.cancel_scope().await;

    info!("demo finished");
    Ok(())
}
