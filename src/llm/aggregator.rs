//! Streaming response aggregator: demultiplexes the provider's visitor
//! events into a single accumulated response, resetting the watchdog on
//! every delta.

use crate::service::ComputeContext;

/// One edge of the provider's response stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    MessageStart,
    ContentBlockStart,
    ContentBlockDelta(String),
    ContentBlockStop,
    MessageStop { stop_reason: String },
    Metadata { latency_ms: u64, input_tokens: u32, output_tokens: u32 },
}

/// The assembled result of one streaming turn.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub message: String,
    pub latency_ms: u64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub source_tag: String,
}

impl crate::service::CallbackInput for LlmResponse {
    fn source_tag(&self) -> &str {
        &self.source_tag
    }
}

/// Accumulates one streaming turn. Not `Send` across turns by design — a
/// fresh aggregator is built per `on_compute` invocation.
#[derive(Default)]
pub struct ResponseAggregator {
    buffer: String,
    latency_ms: u64,
    input_tokens: u32,
    output_tokens: u32,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event. `ctx` is only used to reset the watchdog on deltas —
    /// the caller (the stream driver) decides completion/cancellation.
    pub fn handle_event(&mut self, event: StreamEvent, ctx: &ComputeContext) {
        match event {
            StreamEvent::ContentBlockDelta(chunk) => {
                self.buffer.push_str(&chunk);
                ctx.reset_timeout();
            }
            StreamEvent::Metadata { latency_ms, input_tokens, output_tokens } => {
                self.latency_ms = latency_ms;
                self.input_tokens = input_tokens;
                self.output_tokens = output_tokens;
            }
            StreamEvent::MessageStart | StreamEvent::ContentBlockStart | StreamEvent::ContentBlockStop | StreamEvent::MessageStop { .. } => {}
        }
    }

    /// Assemble the final response. Called from `onComplete` only if the
    /// computation was not cancelled — the dead-man's-switch check lives in
    /// the caller, since only it knows the cancellation token.
    pub fn finish(self, source_tag: impl Into<String>) -> LlmResponse {
        LlmResponse { message: self.buffer, latency_ms: self.latency_ms, input_tokens: self.input_tokens, output_tokens: self.output_tokens, source_tag: source_tag.into() }
    }
}
