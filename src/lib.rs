//! Reusable asynchronous service lifecycle framework for a voice
//! phone-call assistant, plus its two hardest consumers: a streaming
//! speech-to-text adapter and a streaming LLM adapter, backed by a
//! conversation memory store and a prompt template engine.

pub mod config;
pub mod llm;
pub mod memory;
pub mod prompt;
pub mod service;
pub mod stt;
