//! The `Transcription` value and its merge algebra.
//!
//! `merge` deliberately preserves two quirks of the system this was distilled
//! from rather than "fixing" them, per the design notes: `checkTime` collapses
//! a legitimate "spoken at t=0" signal into `UNKNOWN`, and the `endTime`
//! computation compares against `startTime == UNKNOWN_TIME` instead of
//! `endTime == UNKNOWN_TIME`. Both are covered by tests that document the
//! behavior rather than assert a "corrected" one.

use crate::service::CallbackInput;

/// Sentinel used throughout this module in place of an `Option<f64>` for
/// confidence and timestamps, matching the system's `UNKNOWN` convention.
pub const UNKNOWN: f64 = f64::NAN;

pub fn is_unknown(v: f64) -> bool {
    v.is_nan()
}

/// One STT result, final or the running best-effort merge of several finals.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    pub confidence: f64,
    pub start_millis: f64,
    pub end_millis: f64,
    pub source_tag: String,
}

impl CallbackInput for Transcription {
    fn source_tag(&self) -> &str {
        &self.source_tag
    }
}

impl Transcription {
    pub fn new(text: impl Into<String>, confidence: f64, start_millis: f64, end_millis: f64, source_tag: impl Into<String>) -> Self {
        Self { text: text.into(), confidence, start_millis, end_millis, source_tag: source_tag.into() }
    }

    /// A relative timestamp the provider reports is usable unless it is one
    /// of the documented "infeasible" sentinels. `0.0` is intentionally
    /// treated as unknown here — preserved verbatim, not a bug we introduced.
    pub fn check_time(value: f64) -> f64 {
        if value == f64::MAX || value == f64::MIN || value == 0.0 { UNKNOWN } else { value }
    }

    /// Merge `other` into `self`: text is space-joined, confidence is the
    /// arithmetic mean of the two (or whichever is defined if the other is
    /// `UNKNOWN`), `start_millis` is the min of the defined values, and
    /// `source_tag` adopts `other`'s only if `self`'s is empty.
    pub fn merge(&self, other: &Transcription) -> Transcription {
        let text = if self.text.is_empty() {
            other.text.clone()
        } else if other.text.is_empty() {
            self.text.clone()
        } else {
            format!("{} {}", self.text, other.text)
        };

        let confidence = match (is_unknown(self.confidence), is_unknown(other.confidence)) {
            (true, true) => UNKNOWN,
            (true, false) => other.confidence,
            (false, true) => self.confidence,
            (false, false) => (self.confidence + other.confidence) / 2.0,
        };

        let start_millis = match (is_unknown(self.start_millis), is_unknown(other.start_millis)) {
            (true, true) => UNKNOWN,
            (true, false) => other.start_millis,
            (false, true) => self.start_millis,
            (false, false) => self.start_millis.min(other.start_millis),
        };

        // Preserved verbatim: this compares `start_millis`, not `end_millis`,
        // matching the source's copy-paste error (see module docs).
        let end_millis = if is_unknown(self.start_millis) {
            other.end_millis
        } else if is_unknown(other.end_millis) {
            self.end_millis
        } else {
            self.end_millis.max(other.end_millis)
        };

        let source_tag = if self.source_tag.is_empty() { other.source_tag.clone() } else { self.source_tag.clone() };

        Transcription { text, confidence, start_millis, end_millis, source_tag }
    }

    pub fn reset(source_tag: impl Into<String>) -> Transcription {
        Transcription { text: String::new(), confidence: UNKNOWN, start_millis: UNKNOWN, end_millis: UNKNOWN, source_tag: source_tag.into() }
    }
}
