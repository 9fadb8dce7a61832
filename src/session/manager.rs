//! Session registry
//!
//! Uses DashMap for concurrent access with the entry API so creation is
//! atomic. Removing a session also releases its emitter subscriptions and
//! settles any permission requests still outstanding for it.

use std::path::PathBuf;
use std::sync::Arc;

use agent_client_protocol as acp;
use dashmap::DashMap;
use uuid::Uuid;

use crate::permission::PermissionArbiter;
use crate::types::{AgentError, Result};

use super::emitter::SessionEventEmitter;
use super::session::Session;

/// Registry of live sessions
#[derive(Debug)]
pub struct SessionManager {
    sessions: DashMap<String, Arc<Session>>,
    arbiter: Arc<PermissionArbiter>,
    emitter: Arc<SessionEventEmitter>,
}

impl SessionManager {
    /// Create a new registry wired to the permission arbiter and emitter
    pub fn new(arbiter: Arc<PermissionArbiter>, emitter: Arc<SessionEventEmitter>) -> Self {
        Self {
            sessions: DashMap::new(),
            arbiter,
            emitter,
        }
    }

    /// Create a new session with a freshly generated identifier
    pub fn create_session(
        &self,
        cwd: PathBuf,
        mcp_servers: Vec<acp::McpServer>,
    ) -> Result<Arc<Session>> {
        let session_id = Uuid::new_v4().to_string();
        self.insert(Session::new(session_id, cwd, mcp_servers))
    }

    /// Reconstruct a session under a known identifier
    pub fn restore_session(
        &self,
        session_id: String,
        cwd: PathBuf,
        mcp_servers: Vec<acp::McpServer>,
    ) -> Result<Arc<Session>> {
        self.insert(Session::restored(session_id, cwd, mcp_servers))
    }

    fn insert(&self, session: Session) -> Result<Arc<Session>> {
        // Entry API makes the uniqueness check and the insert atomic.
        match self.sessions.entry(session.session_id.clone()) {
            dashmap::Entry::Occupied(_) => {
                Err(AgentError::SessionAlreadyExists(session.session_id))
            }
            dashmap::Entry::Vacant(vacant) => {
                let session = Arc::new(session);
                vacant.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    /// Get an existing session
    pub fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|r| Arc::clone(&r))
    }

    /// Get an existing session or return `SessionNotFound`
    pub fn get_session_or_error(&self, session_id: &str) -> Result<Arc<Session>> {
        self.get_session(session_id)
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))
    }

    /// Remove a session
    ///
    /// Cancels its in-flight turn if any, settles outstanding permission
    /// requests as rejections, and drops its emitter subscriptions.
    pub fn remove_session(&self, session_id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(session_id).map(|(_, v)| v)?;

        removed.cancel_turn();
        let rejected = self.arbiter.reject_session(session_id);
        if rejected > 0 {
            tracing::debug!(
                session_id,
                rejected,
                "Rejected outstanding permission requests on session removal"
            );
        }
        self.emitter.drop_session(session_id);
        Some(removed)
    }

    /// Check if a session exists
    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// All live session IDs
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    /// Remove every session, settling each one's outstanding state
    pub fn clear_all(&self) {
        for session_id in self.session_ids() {
            self.remove_session(&session_id);
        }
    }
}
