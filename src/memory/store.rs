//! `ConversationStore`: append-only message log with alternation repair,
//! a summarization window, and an incremental export cursor.

use tracing::warn;
use uuid::Uuid;

use super::message::{ConversationMessage, MessageMetadata, Role};

/// The last summary (if any) plus the unsummarized, non-trailing-user
/// messages a new summary would be generated from.
pub struct SummaryWindow {
    pub existing_summary: Option<ConversationMessage>,
    pub messages: Vec<ConversationMessage>,
    last_index: usize,
}

#[derive(Default)]
pub struct ConversationStore {
    messages: Vec<ConversationMessage>,
    first_llm_index: usize,
    last_summary_index: Option<usize>,
    serialization_cursor: usize,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user(&mut self, contents: Vec<String>) -> Result<ConversationMessage, String> {
        self.append(Role::User, contents)
    }

    pub fn append_assistant(&mut self, contents: Vec<String>) -> Result<ConversationMessage, String> {
        self.append(Role::Assistant, contents)
    }

    fn append(&mut self, role: Role, contents: Vec<String>) -> Result<ConversationMessage, String> {
        if contents.is_empty() || contents.iter().all(|c| c.trim().is_empty()) {
            return Err("cannot append empty content".to_string());
        }

        let at_boundary = self.messages.is_empty() || self.first_llm_index >= self.messages.len();

        if at_boundary {
            if role == Role::Assistant {
                self.messages.push(ConversationMessage::fake_user("..."));
            }
            self.first_llm_index = self.messages.len();
            let message = ConversationMessage::new(role, contents);
            self.messages.push(message.clone());
            return Ok(message);
        }

        let last_non_summary = self.messages.iter().enumerate().rev().find(|(i, m)| *i >= self.first_llm_index && m.role != Role::Summary);

        if let Some((idx, existing)) = last_non_summary
            && existing.role == role
        {
            self.messages[idx].absorb(contents);
            return Ok(self.messages[idx].clone());
        }

        let message = ConversationMessage::new(role, contents);
        self.messages.push(message.clone());
        Ok(message)
    }

    pub fn meta_view(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// The subsequence starting at `firstLlmIndex`, excluding SUMMARY
    /// messages. Empty if `firstLlmIndex` is out of range.
    pub fn llm_view(&self) -> Vec<&ConversationMessage> {
        if self.first_llm_index >= self.messages.len() {
            return Vec::new();
        }
        self.messages[self.first_llm_index..].iter().filter(|m| m.role != Role::Summary).collect()
    }

    /// The last SUMMARY plus every non-SUMMARY message from `firstLlmIndex`
    /// through the last ASSISTANT turn, excluding any trailing unanswered
    /// USER turn. `None` when no ASSISTANT turn exists in range.
    pub fn get_summary_info(&self) -> Option<SummaryWindow> {
        let last_assistant_index = self.messages.iter().enumerate().rev().find(|(_, m)| m.role == Role::Assistant).map(|(i, _)| i)?;

        if self.first_llm_index > last_assistant_index {
            return None;
        }

        let messages = self.messages[self.first_llm_index..=last_assistant_index].iter().filter(|m| m.role != Role::Summary).cloned().collect();
        let existing_summary = self.last_summary_index.map(|i| self.messages[i].clone());

        Some(SummaryWindow { existing_summary, messages, last_index: last_assistant_index })
    }

    /// Insert a SUMMARY message right after `window`'s range, recording the
    /// contributing message ids, and advance `firstLlmIndex` past it.
    pub fn apply_summary(&mut self, summary_text: impl Into<String>, window: &SummaryWindow) -> Result<(), String> {
        if window.messages.is_empty() {
            return Err("cannot summarize an empty window".to_string());
        }

        let insert_index = window.last_index + 1;
        let summary_ids: Vec<Uuid> = window.messages.iter().map(|m| m.id).collect();
        let mut metadata = MessageMetadata { summary_ids, ..Default::default() };
        metadata.timings.insert("CREATION".to_string(), chrono::Utc::now());

        let summary = ConversationMessage { id: Uuid::new_v4(), role: Role::Summary, contents: vec![summary_text.into()], metadata };

        self.messages.insert(insert_index, summary);
        self.last_summary_index = Some(insert_index);
        self.first_llm_index = insert_index + 1;

        Ok(())
    }

    /// Serialize the segment `[cursor, end)` where `end = len - (excludeLast
    /// ? 1 : 0)`, then advance the cursor to `end`.
    pub fn export_incremental(&mut self, exclude_last: bool) -> serde_json::Value {
        let end = self.messages.len().saturating_sub(if exclude_last { 1 } else { 0 });
        let start = self.serialization_cursor.min(end);

        if start > end {
            warn!("export cursor past end, clamping");
        }

        let value = serde_json::to_value(&self.messages[start..end]).unwrap_or(serde_json::Value::Array(Vec::new()));
        self.serialization_cursor = end;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_assistant_append_synthesizes_a_fake_user_turn() {
        let mut store = ConversationStore::new();
        store.append_assistant(vec!["hi there".into()]).unwrap();

        let view = store.meta_view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].role, Role::User);
        assert!(view[0].metadata.fake);
        assert_eq!(view[1].role, Role::Assistant);
    }

    #[test]
    fn consecutive_same_role_appends_merge() {
        let mut store = ConversationStore::new();
        store.append_user(vec!["hello".into()]).unwrap();
        let merged = store.append_user(vec!["world".into()]).unwrap();

        assert_eq!(store.meta_view().len(), 1);
        assert!(merged.metadata.merged);
        assert_eq!(merged.text(), "hello world");
    }

    #[test]
    fn empty_content_is_rejected() {
        let mut store = ConversationStore::new();
        assert!(store.append_user(vec![]).is_err());
        assert!(store.append_user(vec!["   ".into()]).is_err());
    }

    #[test]
    fn summary_window_excludes_trailing_unanswered_user_turn() {
        let mut store = ConversationStore::new();
        store.append_user(vec!["a".into()]).unwrap();
        store.append_assistant(vec!["b".into()]).unwrap();
        store.append_user(vec!["c".into()]).unwrap();

        let window = store.get_summary_info().expect("assistant turn exists");
        assert_eq!(window.messages.len(), 2);
        assert_eq!(window.messages[0].text(), "a");
        assert_eq!(window.messages[1].text(), "b");

        store.apply_summary("recap", &window).unwrap();

        let llm_view = store.llm_view();
        assert_eq!(llm_view.len(), 1);
        assert_eq!(llm_view[0].text(), "c");

        let meta = store.meta_view();
        assert_eq!(meta[2].role, Role::Summary);
        assert_eq!(meta[2].metadata.summary_ids.len(), 2);
    }

    #[test]
    fn export_incremental_excludes_the_last_message_by_default_and_advances_the_cursor() {
        let mut store = ConversationStore::new();
        store.append_user(vec!["a".into()]).unwrap();
        store.append_assistant(vec!["b".into()]).unwrap();

        let first = store.export_incremental(true);
        assert_eq!(first.as_array().unwrap().len(), 1);

        store.append_assistant(vec!["more".into()]).unwrap();
        let second = store.export_incremental(true);
        // "more" merged into the existing assistant message rather than
        // appending a new one, so nothing new crosses the exclude-last cut.
        assert_eq!(second.as_array().unwrap().len(), 0);
    }
}
