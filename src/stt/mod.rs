//! Streaming speech-to-text: a pull-based audio publisher, a debouncing
//! transcription merger, and the `ReusableService` wiring that ties them
//! together behind one provider-agnostic client trait.

mod audio;
mod merger;
mod service;
mod transcription;

pub use audio::{AudioChunk, AudioPublisher, AudioSource, AudioSubscriber, Subscription, SubscriptionRegistry};
pub use merger::{Alternative, MIN_PARTIAL_WORDS, StartSpeaking, StreamResult, TRANSCRIPTION_BUFFERING_TIME, TokenConfidence, TranscriptionMerger};
pub use service::{SpeechToTextService, SttProvider, StreamCompletion};
pub use transcription::{Transcription, UNKNOWN, is_unknown};

/// Linear PCM, 16 kHz, 16-bit signed, mono, little-endian — the wire format
/// every `AudioSource` is expected to produce.
pub struct PcmFormat {
    pub sample_rate_hz: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

pub const PCM_FORMAT: PcmFormat = PcmFormat { sample_rate_hz: 16_000, bits_per_sample: 16, channels: 1 };
