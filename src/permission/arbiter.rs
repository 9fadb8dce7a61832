//! Pending permission requests
//!
//! Each outstanding client permission prompt is keyed by (session, tool call)
//! and resolved exactly once. Registration and resolution both go through the
//! map atomically, so a duplicate request or a late resolution surfaces as a
//! typed error instead of a silent overwrite.

use agent_client_protocol as acp;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::types::{AgentError, Result};

/// Verdict delivered to the turn waiting on a permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Run the tool this once
    AllowOnce,
    /// Run the tool and remember the approval for the session
    AllowAlways,
    /// Refuse the tool call
    Rejected,
    /// The prompt was abandoned before the client answered
    Cancelled,
}

impl PermissionDecision {
    /// Whether the tool call may proceed
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::AllowOnce | Self::AllowAlways)
    }

    /// Map a protocol permission outcome onto a decision
    pub fn from_outcome(outcome: &acp::RequestPermissionOutcome) -> Self {
        match outcome {
            acp::RequestPermissionOutcome::Cancelled => Self::Cancelled,
            acp::RequestPermissionOutcome::Selected(selected) => {
                match selected.option_id.0.as_ref() {
                    "allow-always" => Self::AllowAlways,
                    id if id.starts_with("allow") => Self::AllowOnce,
                    _ => Self::Rejected,
                }
            }
            _ => Self::Rejected,
        }
    }
}

struct PendingEntry {
    tx: oneshot::Sender<PermissionDecision>,
    requested_at: DateTime<Utc>,
}

/// Registry of permission prompts awaiting a client answer
pub struct PermissionArbiter {
    pending: DashMap<(String, String), PendingEntry>,
}

impl PermissionArbiter {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Register a prompt for a tool call and get the receiver its verdict
    /// will arrive on
    pub fn register(
        &self,
        session_id: &str,
        tool_call_id: &str,
    ) -> Result<oneshot::Receiver<PermissionDecision>> {
        let key = (session_id.to_string(), tool_call_id.to_string());
        match self.pending.entry(key) {
            dashmap::Entry::Occupied(_) => Err(AgentError::DuplicatePermissionRequest {
                session_id: session_id.to_string(),
                tool_call_id: tool_call_id.to_string(),
            }),
            dashmap::Entry::Vacant(vacant) => {
                let (tx, rx) = oneshot::channel();
                vacant.insert(PendingEntry {
                    tx,
                    requested_at: Utc::now(),
                });
                Ok(rx)
            }
        }
    }

    /// Deliver the client's verdict for a registered prompt
    ///
    /// A second resolution for the same tool call, or one for a prompt that
    /// was never registered, is a stale resolution error.
    pub fn resolve(
        &self,
        session_id: &str,
        tool_call_id: &str,
        decision: PermissionDecision,
    ) -> Result<()> {
        let key = (session_id.to_string(), tool_call_id.to_string());
        let Some((_, entry)) = self.pending.remove(&key) else {
            return Err(AgentError::StalePermissionResolution {
                session_id: session_id.to_string(),
                tool_call_id: tool_call_id.to_string(),
            });
        };

        let elapsed = Utc::now() - entry.requested_at;
        tracing::debug!(
            session_id,
            tool_call_id,
            ?decision,
            elapsed_ms = elapsed.num_milliseconds(),
            "Resolved permission request"
        );

        // The waiting turn may already have been cancelled and dropped its
        // receiver; that is not an error.
        let _ = entry.tx.send(decision);
        Ok(())
    }

    /// Settle every outstanding prompt of one session as cancelled
    pub fn reject_session(&self, session_id: &str) -> usize {
        let keys: Vec<_> = self
            .pending
            .iter()
            .filter(|r| r.key().0 == session_id)
            .map(|r| r.key().clone())
            .collect();

        let mut settled = 0;
        for key in keys {
            if let Some((_, entry)) = self.pending.remove(&key) {
                let _ = entry.tx.send(PermissionDecision::Cancelled);
                settled += 1;
            }
        }
        settled
    }

    /// Settle every outstanding prompt across all sessions as cancelled
    pub fn reject_all(&self) -> usize {
        let keys: Vec<_> = self.pending.iter().map(|r| r.key().clone()).collect();
        let mut settled = 0;
        for key in keys {
            if let Some((_, entry)) = self.pending.remove(&key) {
                let _ = entry.tx.send(PermissionDecision::Cancelled);
                settled += 1;
            }
        }
        settled
    }

    /// Whether a prompt is outstanding for the given tool call
    pub fn is_pending(&self, session_id: &str, tool_call_id: &str) -> bool {
        self.pending
            .contains_key(&(session_id.to_string(), tool_call_id.to_string()))
    }

    /// Number of outstanding prompts
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for PermissionArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PermissionArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionArbiter")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let arbiter = PermissionArbiter::new();
        let mut rx = arbiter.register("s1", "t1").unwrap();
        assert!(arbiter.is_pending("s1", "t1"));

        arbiter
            .resolve("s1", "t1", PermissionDecision::AllowOnce)
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), PermissionDecision::AllowOnce);
        assert!(!arbiter.is_pending("s1", "t1"));
        assert_eq!(arbiter.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let arbiter = PermissionArbiter::new();
        let _rx = arbiter.register("s1", "t1").unwrap();

        let duplicate = arbiter.register("s1", "t1");
        assert!(matches!(
            duplicate,
            Err(AgentError::DuplicatePermissionRequest { .. })
        ));
        // The original stays registered.
        assert_eq!(arbiter.pending_count(), 1);
    }

    #[test]
    fn test_second_resolution_is_stale() {
        let arbiter = PermissionArbiter::new();
        let _rx = arbiter.register("s1", "t1").unwrap();

        arbiter
            .resolve("s1", "t1", PermissionDecision::Rejected)
            .unwrap();

        let stale = arbiter.resolve("s1", "t1", PermissionDecision::AllowOnce);
        assert!(matches!(
            stale,
            Err(AgentError::StalePermissionResolution { .. })
        ));
    }

    #[test]
    fn test_resolve_unregistered_is_stale() {
        let arbiter = PermissionArbiter::new();
        let stale = arbiter.resolve("s1", "never", PermissionDecision::AllowOnce);
        assert!(matches!(
            stale,
            Err(AgentError::StalePermissionResolution { .. })
        ));
    }

    #[test]
    fn test_reject_session_settles_only_that_session() {
        let arbiter = PermissionArbiter::new();
        let mut rx_a = arbiter.register("s1", "t1").unwrap();
        let mut rx_b = arbiter.register("s1", "t2").unwrap();
        let rx_other = arbiter.register("s2", "t1").unwrap();

        assert_eq!(arbiter.reject_session("s1"), 2);

        assert_eq!(rx_a.try_recv().unwrap(), PermissionDecision::Cancelled);
        assert_eq!(rx_b.try_recv().unwrap(), PermissionDecision::Cancelled);
        assert!(arbiter.is_pending("s2", "t1"));
        drop(rx_other);
    }

    #[test]
    fn test_reject_all() {
        let arbiter = PermissionArbiter::new();
        let _a = arbiter.register("s1", "t1").unwrap();
        let _b = arbiter.register("s2", "t1").unwrap();

        assert_eq!(arbiter.reject_all(), 2);
        assert_eq!(arbiter.pending_count(), 0);
    }

    #[test]
    fn test_resolve_with_dropped_receiver_is_ok() {
        let arbiter = PermissionArbiter::new();
        let rx = arbiter.register("s1", "t1").unwrap();
        drop(rx);

        tokio_test::assert_ok!(arbiter.resolve("s1", "t1", PermissionDecision::AllowOnce),);
    }

    #[test]
    fn test_decision_is_allowed() {
        assert!(PermissionDecision::AllowOnce.is_allowed());
        assert!(PermissionDecision::AllowAlways.is_allowed());
        assert!(!PermissionDecision::Rejected.is_allowed());
        assert!(!PermissionDecision::Cancelled.is_allowed());
    }
}
