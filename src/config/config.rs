//! Application configuration and CLI argument parsing.

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Demo binary configuration: cloud credentials and per-provider tuning,
/// all overridable by environment variable per their `env` attribute.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "ringcore")]
#[command(author, version, about = "Voice phone-call assistant service core", long_about = None)]
pub struct AppConfig {
    /// AWS region for Transcribe/Bedrock endpoints.
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub aws_region: String,

    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    pub aws_access_key_id: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY")]
    pub aws_secret_access_key: Option<String>,

    #[arg(long, env = "AWS_SESSION_TOKEN")]
    pub aws_session_token: Option<String>,

    /// BCP-47 language tag for streaming transcription.
    #[arg(long, env = "AWS_TRANSCRIBE_LANGUAGE", default_value = "en-US")]
    pub transcribe_language: String,

    /// Bytes pulled per audio read.
    #[arg(long, env = "AWS_TRANSCRIBE_AUDIO_STREAM_CHUNK_SIZE", default_value = "4096")]
    pub transcribe_chunk_size: usize,

    /// Enable verbose (debug) logging.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// A request has credentials to offer a provider client; presence isn't
    /// otherwise validated here since a demo run may use a fake provider.
    pub fn has_credentials(&self) -> bool {
        self.aws_access_key_id.is_some() && self.aws_secret_access_key.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.transcribe_chunk_size == 0 {
            anyhow::bail!("AWS_TRANSCRIBE_AUDIO_STREAM_CHUNK_SIZE must be greater than zero");
        }
        Ok(())
    }

    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  AWS region: {}", self.aws_region);
        info!("  Transcribe language: {}", self.transcribe_language);
        info!("  Transcribe chunk size: {} bytes", self.transcribe_chunk_size);
        info!("  Credentials present: {}", self.has_credentials());
    }
}
