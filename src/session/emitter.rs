//! Per-session event fan-out
//!
//! Translated updates go two ways: synchronously to local subscribers in
//! subscription order, and through an unbounded channel toward the protocol
//! transport so a slow client write never stalls a turn.

use std::sync::atomic::{AtomicU64, Ordering};

use agent_client_protocol as acp;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Item queued for the transport pump task
#[derive(Debug)]
pub enum OutboundEvent {
    /// A `sessionUpdate` notification
    Update(acp::SessionNotification),
    /// A permission request to forward to the client
    Permission {
        request: acp::RequestPermissionRequest,
        session_id: String,
        tool_call_id: String,
    },
}

/// Handler invoked synchronously for each update of a subscribed session
pub type UpdateHandler = Box<dyn Fn(&acp::SessionUpdate) + Send + Sync>;

/// Token returned by [`SessionEventEmitter::subscribe`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionToken {
    session_id: String,
    id: u64,
}

struct Subscriber {
    id: u64,
    handler: UpdateHandler,
}

/// Publish/subscribe channel for session updates
pub struct SessionEventEmitter {
    transport_tx: mpsc::UnboundedSender<OutboundEvent>,
    subscribers: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl SessionEventEmitter {
    /// Create an emitter writing to the given transport channel
    pub fn new(transport_tx: mpsc::UnboundedSender<OutboundEvent>) -> Self {
        Self {
            transport_tx,
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a local observer for one session's updates
    ///
    /// Subscribing mid-turn misses only past events; there is no replay.
    pub fn subscribe(
        &self,
        session_id: &str,
        handler: impl Fn(&acp::SessionUpdate) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(session_id.to_string())
            .or_default()
            .push(Subscriber {
                id,
                handler: Box::new(handler),
            });
        SubscriptionToken {
            session_id: session_id.to_string(),
            id,
        }
    }

    /// Remove a subscription; returns whether it was still registered
    pub fn unsubscribe(&self, token: &SubscriptionToken) -> bool {
        let Some(mut subs) = self.subscribers.get_mut(&token.session_id) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != token.id);
        before != subs.len()
    }

    /// Deliver one update for a session
    ///
    /// Local subscribers run synchronously in subscription order, then the
    /// update is queued for the transport without blocking.
    pub fn emit(&self, session_id: &str, update: acp::SessionUpdate) {
        if let Some(subs) = self.subscribers.get(session_id) {
            for sub in subs.iter() {
                (sub.handler)(&update);
            }
        }

        let notification =
            acp::SessionNotification::new(acp::SessionId::new(session_id.to_string()), update);
        if self
            .transport_tx
            .send(OutboundEvent::Update(notification))
            .is_err()
        {
            tracing::warn!(session_id, "Transport channel closed, dropping update");
        }
    }

    /// Queue a permission request for the client
    ///
    /// Ordered on the same channel as updates so the tool-call creation the
    /// request refers to is seen first.
    pub fn forward_permission(
        &self,
        request: acp::RequestPermissionRequest,
        session_id: String,
        tool_call_id: String,
    ) {
        if self
            .transport_tx
            .send(OutboundEvent::Permission {
                request,
                session_id: session_id.clone(),
                tool_call_id,
            })
            .is_err()
        {
            tracing::warn!(
                session_id,
                "Transport channel closed, dropping permission request"
            );
        }
    }

    /// Drop all subscriptions of a destroyed session
    pub fn drop_session(&self, session_id: &str) {
        self.subscribers.remove(session_id);
    }

    /// Number of subscribers currently registered for a session
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers.get(session_id).map_or(0, |s| s.len())
    }
}

impl std::fmt::Debug for SessionEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventEmitter")
            .field("sessions", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}
