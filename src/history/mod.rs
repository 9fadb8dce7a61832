//! Conversation history
//!
//! Backs `session/load`: prior turns are replayed to the client as message
//! chunks before the session goes live again. The in-memory store covers a
//! single bridge process; persistent backends implement the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::types::Result;

/// Which side of the conversation produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    User,
    Agent,
}

/// One recorded message of a past turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub text: String,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::User,
            text: text.into(),
            recorded_at: Utc::now(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::Agent,
            text: text.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Storage for session transcripts
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Load a session's transcript; `None` when the session is unknown
    async fn load(&self, session_id: &str) -> Result<Option<Vec<HistoryEntry>>>;

    /// Append one entry to a session's transcript, creating it if needed
    async fn append(&self, session_id: &str, entry: HistoryEntry) -> Result<()>;
}

/// Process-local history store
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    transcripts: DashMap<String, Vec<HistoryEntry>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load(&self, session_id: &str) -> Result<Option<Vec<HistoryEntry>>> {
        Ok(self.transcripts.get(session_id).map(|t| t.clone()))
    }

    async fn append(&self, session_id: &str, entry: HistoryEntry) -> Result<()> {
        self.transcripts
            .entry(session_id.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_unknown_session() {
        let store = MemoryHistoryStore::new();
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = MemoryHistoryStore::new();
        store
            .append("s1", HistoryEntry::user("fix the bug"))
            .await
            .unwrap();
        store
            .append("s1", HistoryEntry::agent("done"))
            .await
            .unwrap();

        let transcript = store.load("s1").await.unwrap().unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].role, HistoryRole::User);
        assert_eq!(transcript[0].text, "fix the bug");
        assert_eq!(transcript[1].role, HistoryRole::Agent);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = MemoryHistoryStore::new();
        store.append("s1", HistoryEntry::user("a")).await.unwrap();
        store.append("s2", HistoryEntry::user("b")).await.unwrap();

        assert_eq!(store.load("s1").await.unwrap().unwrap().len(), 1);
        assert_eq!(store.load("s2").await.unwrap().unwrap().len(), 1);
    }
}
