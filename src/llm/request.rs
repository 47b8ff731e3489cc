//! Request shape for one LLM turn, with numeric defaults drawn from
//! environment at construction time (see `RUST_LOG`'s siblings in §6).

use std::env;

/// A single conversation turn fed to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub contents: Vec<String>,
}

/// One LLM inference request. `prompts` carries system/instruction text,
/// `messages` the conversational turns.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompts: Vec<String>,
    pub messages: Vec<Message>,
    pub model_name: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Inference parameter defaults, read once from environment. Constructing
/// this is cheap; callers may hold one and reuse it across requests.
#[derive(Debug, Clone)]
pub struct BedrockDefaults {
    pub model_name: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl BedrockDefaults {
    pub fn from_env() -> Self {
        Self {
            model_name: env::var("AWS_BEDROCK_MODEL_NAME").unwrap_or_else(|_| "anthropic.claude-3-haiku-20240307-v1:0".to_string()),
            max_tokens: env::var("AWS_BEDROCK_MAX_TOKENS").ok().and_then(|v| v.parse().ok()).unwrap_or(512),
            temperature: env::var("AWS_BEDROCK_TEMPERATURE").ok().and_then(|v| v.parse().ok()).unwrap_or(0.7),
            top_p: env::var("AWS_BEDROCK_TOP_P").ok().and_then(|v| v.parse().ok()).unwrap_or(0.9),
        }
    }
}

impl LlmRequest {
    pub fn new(prompts: Vec<String>, messages: Vec<Message>, defaults: &BedrockDefaults) -> Self {
        Self { prompts, messages, model_name: defaults.model_name.clone(), max_tokens: defaults.max_tokens, temperature: defaults.temperature, top_p: defaults.top_p }
    }
}
