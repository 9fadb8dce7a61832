//! Per-session state and the turn state machine
//!
//! A session is one isolated conversation context. Its turn lifecycle is
//! `Idle -> Processing -> (Cancelling) -> Idle`, with at most one prompt in
//! flight enforced by an atomic phase word.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use agent_client_protocol as acp;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::types::{AgentError, ModelId, Result, SessionMode};

/// Turn lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TurnPhase {
    Idle = 0,
    Processing = 1,
    Cancelling = 2,
}

impl TurnPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TurnPhase::Processing,
            2 => TurnPhase::Cancelling,
            _ => TurnPhase::Idle,
        }
    }
}

/// An active bridge session
pub struct Session {
    /// Unique session identifier
    pub session_id: String,
    /// Working directory, immutable after creation
    pub cwd: PathBuf,
    /// MCP server descriptors passed through from the client, immutable
    pub mcp_servers: Vec<acp::McpServer>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Whether the session was reconstructed from replayed history
    pub loaded_from_history: bool,

    last_activity_at: RwLock<DateTime<Utc>>,
    mode: RwLock<SessionMode>,
    model_overrides: RwLock<HashMap<SessionMode, ModelId>>,
    phase: AtomicU8,
    cancelled: AtomicBool,
    current_tool_call: RwLock<Option<String>>,
    pending_tool_calls: DashMap<String, serde_json::Value>,
    turn_token: RwLock<Option<CancellationToken>>,
}

impl Session {
    /// Create a new idle session
    pub fn new(session_id: String, cwd: PathBuf, mcp_servers: Vec<acp::McpServer>) -> Self {
        Self::build(session_id, cwd, mcp_servers, false)
    }

    /// Create a session reconstructed from replayed history
    pub fn restored(session_id: String, cwd: PathBuf, mcp_servers: Vec<acp::McpServer>) -> Self {
        Self::build(session_id, cwd, mcp_servers, true)
    }

    fn build(
        session_id: String,
        cwd: PathBuf,
        mcp_servers: Vec<acp::McpServer>,
        loaded_from_history: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            cwd,
            mcp_servers,
            created_at: now,
            loaded_from_history,
            last_activity_at: RwLock::new(now),
            mode: RwLock::new(SessionMode::default()),
            model_overrides: RwLock::new(HashMap::new()),
            phase: AtomicU8::new(TurnPhase::Idle as u8),
            cancelled: AtomicBool::new(false),
            current_tool_call: RwLock::new(None),
            pending_tool_calls: DashMap::new(),
            turn_token: RwLock::new(None),
        }
    }

    /// Record activity; the timestamp never goes backwards
    pub fn touch(&self) {
        let now = Utc::now();
        if let Ok(mut last) = self.last_activity_at.write() {
            if now > *last {
                *last = now;
            }
        }
    }

    /// Timestamp of the most recently accepted operation
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
            .read()
            .map_or(self.created_at, |g| *g)
    }

    /// Current session mode
    pub fn mode(&self) -> SessionMode {
        self.mode.read().map_or(SessionMode::Act, |g| *g)
    }

    /// Switch mode; takes effect with the next prompt turn
    pub fn set_mode(&self, mode: SessionMode) {
        if let Ok(mut current) = self.mode.write() {
            *current = mode;
        }
        self.touch();
    }

    /// Model override for the given mode, if one was set
    pub fn model_override(&self, mode: SessionMode) -> Option<ModelId> {
        self.model_overrides
            .read()
            .ok()
            .and_then(|g| g.get(&mode).cloned())
    }

    /// Set the model override for one mode
    pub fn set_model_override(&self, mode: SessionMode, model: ModelId) {
        if let Ok(mut overrides) = self.model_overrides.write() {
            overrides.insert(mode, model);
        }
        self.touch();
    }

    /// Current turn phase
    pub fn phase(&self) -> TurnPhase {
        TurnPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Whether a prompt turn is executing
    pub fn is_processing(&self) -> bool {
        self.phase() != TurnPhase::Idle
    }

    /// Whether the in-flight turn was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Start a prompt turn
    ///
    /// Fails with [`AgentError::AlreadyProcessing`] unless the session is
    /// idle. Per-turn state is reset here; the returned guard restores the
    /// session to idle when dropped.
    pub fn begin_turn(self: &Arc<Self>) -> Result<TurnGuard> {
        self.phase
            .compare_exchange(
                TurnPhase::Idle as u8,
                TurnPhase::Processing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| AgentError::already_processing(&self.session_id))?;

        self.cancelled.store(false, Ordering::SeqCst);
        self.pending_tool_calls.clear();
        self.set_current_tool_call(None);

        let token = CancellationToken::new();
        if let Ok(mut slot) = self.turn_token.write() {
            *slot = Some(token.clone());
        }
        // A cancel may land between the phase change above and the token
        // install; re-check so that request is never lost.
        if self.phase() == TurnPhase::Cancelling {
            self.cancelled.store(true, Ordering::SeqCst);
            token.cancel();
        }
        self.touch();

        Ok(TurnGuard {
            session: Arc::clone(self),
            token,
        })
    }

    /// Signal cancellation of the in-flight turn
    ///
    /// Returns `true` when a processing turn was moved to `Cancelling`.
    /// Cancelling an idle or already-cancelling session is a no-op.
    pub fn cancel_turn(&self) -> bool {
        let moved = self
            .phase
            .compare_exchange(
                TurnPhase::Processing as u8,
                TurnPhase::Cancelling as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        if moved {
            self.cancelled.store(true, Ordering::SeqCst);
            if let Ok(slot) = self.turn_token.read() {
                if let Some(token) = slot.as_ref() {
                    token.cancel();
                }
            }
            self.touch();
        }
        moved
    }

    fn finish_turn(&self) {
        self.phase.store(TurnPhase::Idle as u8, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
        self.pending_tool_calls.clear();
        self.set_current_tool_call(None);
        if let Ok(mut slot) = self.turn_token.write() {
            *slot = None;
        }
    }

    /// Tool call currently awaiting permission or execution
    pub fn current_tool_call(&self) -> Option<String> {
        self.current_tool_call.read().map_or(None, |g| g.clone())
    }

    /// Track the tool call the turn is currently blocked on
    pub fn set_current_tool_call(&self, tool_call_id: Option<String>) {
        if let Ok(mut current) = self.current_tool_call.write() {
            *current = tool_call_id;
        }
    }

    /// Record a tool call that has not yet reached a terminal status
    pub fn record_pending_tool(&self, tool_call_id: String, descriptor: serde_json::Value) {
        self.pending_tool_calls.insert(tool_call_id, descriptor);
    }

    /// Drop a tool call that reached a terminal status
    pub fn resolve_pending_tool(&self, tool_call_id: &str) {
        self.pending_tool_calls.remove(tool_call_id);
    }

    /// Number of tool calls still pending in the current turn
    pub fn pending_tool_count(&self) -> usize {
        self.pending_tool_calls.len()
    }
}

/// Guard for one prompt turn; returns the session to idle on drop
pub struct TurnGuard {
    session: Arc<Session>,
    token: CancellationToken,
}

impl TurnGuard {
    /// Cancellation token scoped to this turn
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.session.finish_turn();
    }
}

impl std::fmt::Debug for TurnGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnGuard")
            .field("session_id", &self.session.session_id)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::missing_fields_in_debug)]
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("cwd", &self.cwd)
            .field("mode", &self.mode())
            .field("phase", &self.phase())
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}
