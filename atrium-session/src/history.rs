//! Per-room activity aggregation sent to clients as `updateHistory`.
//!
//! Each list is bounded; once a list reaches its limit the oldest entry is
//! discarded. `aiSuggestions` is carried for the client's response shape
//! only and is never filled by the server.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::protocol::ArtifactKind;

/// Aggregated activity record for one room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityHistory {
    pub code_edits: VecDeque<String>,
    pub doc_edits: VecDeque<String>,
    pub whiteboard_edits: VecDeque<String>,
    pub ai_suggestions: VecDeque<String>,
    pub chat_messages: VecDeque<String>,
}

impl ActivityHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry for `kind`, trimming the list to `limit` entries.
    ///
    /// A `limit` of zero disables recording.
    pub fn record(&mut self, kind: ArtifactKind, entry: String, limit: usize) {
        if limit == 0 {
            return;
        }
        let list = self.list_mut(kind);
        list.push_back(entry);
        while list.len() > limit {
            list.pop_front();
        }
    }

    /// Record a change by `author`, described in human-readable form.
    pub fn record_change(&mut self, kind: ArtifactKind, author: &str, payload: &str, limit: usize) {
        self.record(kind, describe(kind, author, payload), limit);
    }

    pub fn entries(&self, kind: ArtifactKind) -> &VecDeque<String> {
        match kind {
            ArtifactKind::Code => &self.code_edits,
            ArtifactKind::Document => &self.doc_edits,
            ArtifactKind::Whiteboard => &self.whiteboard_edits,
            ArtifactKind::Chat => &self.chat_messages,
        }
    }

    /// Total number of entries across all lists.
    pub fn total(&self) -> usize {
        self.code_edits.len()
            + self.doc_edits.len()
            + self.whiteboard_edits.len()
            + self.ai_suggestions.len()
            + self.chat_messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn list_mut(&mut self, kind: ArtifactKind) -> &mut VecDeque<String> {
        match kind {
            ArtifactKind::Code => &mut self.code_edits,
            ArtifactKind::Document => &mut self.doc_edits,
            ArtifactKind::Whiteboard => &mut self.whiteboard_edits,
            ArtifactKind::Chat => &mut self.chat_messages,
        }
    }
}

/// One history line for a change.
pub fn describe(kind: ArtifactKind, author: &str, payload: &str) -> String {
    let chars = payload.chars().count();
    match kind {
        ArtifactKind::Code => format!("{author} edited code ({chars} chars)"),
        ArtifactKind::Document => format!("{author} edited the document ({chars} chars)"),
        ArtifactKind::Whiteboard => format!("{author} updated the whiteboard"),
        ArtifactKind::Chat => format!("{author}: {payload}"),
    }
}
