//! `LlmService`: wires a streaming provider client onto `ReusableService`,
//! aggregating deltas and guarding completion against a race with
//! cancellation.

use async_trait::async_trait;

use crate::service::{ComputeContext, ReusableService, ServiceHooks};

use super::aggregator::{LlmResponse, ResponseAggregator, StreamEvent};
use super::request::LlmRequest;

/// The provider SDK's streaming contract: push `StreamEvent`s to `on_event`
/// until the turn completes, resolving `Ok(())` on a clean finish or
/// `Err(reason)` — including a cancellation reason, which the caller
/// classifies like any other `ServiceHooks::on_compute` error.
#[async_trait]
pub trait LlmProvider: Send + Sync + 'static {
    async fn stream(&self, request: LlmRequest, ctx: &ComputeContext, on_event: &mut (dyn FnMut(StreamEvent) + Send)) -> Result<(), String>;
}

struct LlmHooks<P: LlmProvider> {
    provider: P,
}

#[async_trait]
impl<P: LlmProvider> ServiceHooks for LlmHooks<P> {
    type Input = LlmRequest;
    type Output = LlmResponse;

    async fn on_activate(&self, _tag: &str) -> Result<(), String> {
        Ok(())
    }

    async fn on_compute(&self, input: LlmRequest, ctx: &ComputeContext) -> Result<LlmResponse, String> {
        let mut aggregator = ResponseAggregator::new();
        let mut handler = |event: StreamEvent| aggregator.handle_event(event, ctx);

        self.provider.stream(input, ctx, &mut handler).await?;

        // Dead-man's-switch: `stop()` may have cancelled the token between
        // the provider's last event and this return. Discard silently in
        // that case rather than fanning out a response nobody asked for.
        if ctx.is_cancelled() {
            return Err("cancelled".to_string());
        }

        Ok(aggregator.finish(ctx.tag()))
    }

    async fn on_deactivate(&self, _tag: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Streaming LLM adapter.
pub struct LlmService<P: LlmProvider> {
    inner: ReusableService<LlmHooks<P>>,
}

impl<P: LlmProvider> LlmService<P> {
    pub fn new(name: &'static str, provider: P) -> Self {
        Self { inner: ReusableService::new(name, LlmHooks { provider }) }
    }

    pub async fn activate(&self, tag: &str) -> bool {
        self.inner.activate(tag).await
    }

    pub fn compute_async(&self, request: LlmRequest, tag: impl Into<String>) -> bool {
        self.inner.compute_async(request, None, tag)
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

    pub fn on_result(&self, handler: impl Fn(LlmResponse) + Send + Sync + 'static) -> crate::service::CallbackId {
        self.inner.on_result(handler)
    }

    pub fn on_error(&self, handler: impl Fn(crate::service::ServiceError) + Send + Sync + 'static) -> crate::service::CallbackId {
        self.inner.on_error(handler)
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::super::request::{BedrockDefaults, Message, Role};
    use super::*;

    struct ScriptedProvider {
        deltas: Vec<&'static str>,
        sleep_before_complete_ms: u64,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn stream(&self, _request: LlmRequest, ctx: &ComputeContext, on_event: &mut (dyn FnMut(StreamEvent) + Send)) -> Result<(), String> {
            on_event(StreamEvent::MessageStart);
            for chunk in &self.deltas {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(self.sleep_before_complete_ms)) => {}
                    _ = ctx.cancelled() => return Err("cancelled".to_string()),
                }
                on_event(StreamEvent::ContentBlockDelta((*chunk).to_string()));
            }
            on_event(StreamEvent::MessageStop { stop_reason: "end_turn".into() });
            on_event(StreamEvent::Metadata { latency_ms: 10, input_tokens: 3, output_tokens: 4 });
            Ok(())
        }
    }

    fn request() -> LlmRequest {
        let defaults = BedrockDefaults { model_name: "m".into(), max_tokens: 10, temperature: 0.1, top_p: 0.9 };
        LlmRequest::new(vec!["be terse".into()], vec![Message { role: Role::User, contents: vec!["hi".into()] }], &defaults)
    }

    #[tokio::test]
    async fn deltas_assemble_into_one_result() {
        let service = LlmService::new("llm-test", ScriptedProvider { deltas: vec!["hello", " there"], sleep_before_complete_ms: 5 });
        let results = Arc::new(std::sync::Mutex::new(Vec::new()));
        let r = results.clone();
        service.on_result(move |resp| r.lock().unwrap().push(resp.message));

        service.activate("t").await;
        service.compute_async(request(), "t");
        service.wait("t").await;

        assert_eq!(*results.lock().unwrap(), vec!["hello there".to_string()]);
    }

    #[tokio::test]
    async fn stop_during_streaming_discards_the_eventual_result() {
        let service = LlmService::new("llm-stop", ScriptedProvider { deltas: vec!["a", "b", "c"], sleep_before_complete_ms: 200 });
        let results = Arc::new(AtomicUsize::new(0));
        let r = results.clone();
        service.on_result(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        service.activate("t").await;
        service.compute_async(request(), "t");
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.stop("t").await;
        service.wait("t").await;

        assert_eq!(results.load(Ordering::SeqCst), 0);
    }
}
