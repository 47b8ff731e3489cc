//! One conversation turn, its role, and timing/provenance metadata.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    Summary,
}

/// Non-role bookkeeping attributes a message can carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Synthesized to keep the alternation invariant when an assistant turn
    /// is appended with no preceding user turn.
    pub fake: bool,
    /// Set when this message absorbed a later same-role append.
    pub merged: bool,
    /// Populated only on `Role::Summary` messages: the ids of the messages
    /// the summary was generated from.
    pub summary_ids: Vec<Uuid>,
    pub timings: HashMap<String, DateTime<Utc>>,
    /// Open-ended provenance/bookkeeping a caller may attach (e.g. a
    /// provider's request id); unused by the store's own operations.
    pub extras: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub role: Role,
    pub contents: Vec<String>,
    pub metadata: MessageMetadata,
}

impl ConversationMessage {
    pub fn new(role: Role, contents: Vec<String>) -> Self {
        let mut metadata = MessageMetadata::default();
        metadata.timings.insert("CREATION".to_string(), Utc::now());
        Self { id: Uuid::new_v4(), role, contents, metadata }
    }

    pub fn fake_user(text: impl Into<String>) -> Self {
        let mut message = Self::new(Role::User, vec![text.into()]);
        message.metadata.fake = true;
        message
    }

    /// Append `contents` into this message, marking it `MERGED` and
    /// stamping `LAST_MODIFIED`.
    pub fn absorb(&mut self, contents: Vec<String>) {
        self.contents.extend(contents);
        self.metadata.merged = true;
        self.metadata.timings.insert("LAST_MODIFIED".to_string(), Utc::now());
    }

    pub fn text(&self) -> String {
        self.contents.join(" ")
    }
}
