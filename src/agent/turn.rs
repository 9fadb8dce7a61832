//! Prompt turn driver
//!
//! One invocation drives a full turn: claim the session, start the controller
//! turn, translate each event into updates, suspend on permission prompts, and
//! return the terminal stop reason. Suspension points only park this turn's
//! task; other sessions keep streaming.

use std::sync::Arc;

use agent_client_protocol as acp;

use crate::controller::{Controller, ControllerEvent, PromptChunk, TurnOutcome, TurnRequest};
use crate::history::{HistoryEntry, HistoryStore};
use crate::permission::{PermissionArbiter, PermissionDecision};
use crate::session::{Session, SessionEventEmitter};
use crate::translate::{EventTranslator, PermissionPromptSpec};
use crate::types::{AgentConfig, AgentError, Result};

/// Borrowed collaborators of one turn
pub(crate) struct TurnDeps<'a> {
    pub controller: &'a dyn Controller,
    pub translator: &'a EventTranslator,
    pub arbiter: &'a PermissionArbiter,
    pub emitter: &'a SessionEventEmitter,
    pub history: &'a dyn HistoryStore,
    pub config: &'a AgentConfig,
}

enum PermissionFlow {
    Continue,
    Cancelled,
}

/// Run one prompt turn to completion
pub(crate) async fn run_turn(
    deps: TurnDeps<'_>,
    session: &Arc<Session>,
    prompt: Vec<PromptChunk>,
) -> Result<acp::StopReason> {
    if prompt.is_empty() {
        return Err(AgentError::EmptyPrompt);
    }

    let guard = session.begin_turn()?;
    let session_id = session.session_id.as_str();
    let token = guard.token().clone();

    for chunk in &prompt {
        if let PromptChunk::Text { text } = chunk {
            record(deps.history, session_id, HistoryEntry::user(text.clone())).await;
        }
    }

    let mode = session.mode();
    let model = session
        .model_override(mode)
        .or_else(|| deps.config.default_model_for(mode));
    tracing::debug!(session_id, %mode, ?model, "Starting prompt turn");

    let mut events = deps
        .controller
        .start_turn(TurnRequest {
            session_id: session_id.to_string(),
            cwd: session.cwd.clone(),
            mode,
            model,
            prompt,
        })
        .await?;

    // Streamed assistant text, recorded as one transcript entry at turn end.
    let mut reply = String::new();

    loop {
        let event = tokio::select! {
            () = token.cancelled() => {
                return finish_cancelled(&deps, session, &reply).await;
            }
            event = events.recv() => event,
        };

        let Some(event) = event else {
            tracing::warn!(session_id, "Controller stream ended without a terminal event");
            deps.translator.forget_session(session_id);
            flush_reply(deps.history, session_id, &reply).await;
            return Ok(acp::StopReason::EndTurn);
        };

        match &event {
            ControllerEvent::MessageChunk { text } => reply.push_str(text),
            ControllerEvent::ToolCallStart { id, input, .. } => {
                session.record_pending_tool(id.clone(), input.clone());
            }
            ControllerEvent::ToolCallProgress { id, status, .. } if status.is_terminal() => {
                session.resolve_pending_tool(id);
            }
            _ => {}
        }

        let translated = deps.translator.translate(session_id, event);
        for update in translated.updates {
            deps.emitter.emit(session_id, update);
        }

        if let Some(spec) = translated.permission {
            match await_permission(&deps, session, &token, spec).await? {
                PermissionFlow::Continue => {}
                PermissionFlow::Cancelled => {
                    return finish_cancelled(&deps, session, &reply).await;
                }
            }
        }

        if let Some(outcome) = translated.outcome {
            flush_reply(deps.history, session_id, &reply).await;
            if session.is_cancelled() {
                return Ok(acp::StopReason::Cancelled);
            }
            return Ok(match outcome {
                TurnOutcome::Success | TurnOutcome::Error => acp::StopReason::EndTurn,
                TurnOutcome::MaxTurns => acp::StopReason::MaxTurnRequests,
                TurnOutcome::Refusal => acp::StopReason::Refusal,
            });
        }
    }
}

/// Suspend the turn on a permission prompt until the client answers
async fn await_permission(
    deps: &TurnDeps<'_>,
    session: &Arc<Session>,
    token: &tokio_util::sync::CancellationToken,
    spec: PermissionPromptSpec,
) -> Result<PermissionFlow> {
    let session_id = session.session_id.as_str();
    session.set_current_tool_call(Some(spec.tool_call_id.clone()));

    let decision_rx = match deps.arbiter.register(session_id, &spec.tool_call_id) {
        Ok(rx) => rx,
        Err(err @ AgentError::DuplicatePermissionRequest { .. }) => {
            // Protocol misuse: surface on the session and deny the tool,
            // but keep the turn alive.
            tracing::error!(session_id, tool_call_id = %spec.tool_call_id, "{err}");
            deps.emitter.emit(
                session_id,
                acp::SessionUpdate::AgentMessageChunk(acp::ContentChunk::new(
                    format!("Error: {err}").into(),
                )),
            );
            deps.controller
                .authorize_tool(session_id, &spec.tool_call_id, false)
                .await?;
            session.set_current_tool_call(None);
            return Ok(PermissionFlow::Continue);
        }
        Err(err) => return Err(err),
    };

    deps.emitter
        .forward_permission(spec.request, session_id.to_string(), spec.tool_call_id.clone());
    tracing::debug!(
        session_id,
        tool_call_id = %spec.tool_call_id,
        tool_name = %spec.tool_name,
        "Awaiting permission decision"
    );

    let decision = tokio::select! {
        () = token.cancelled() => {
            deps.arbiter.reject_session(session_id);
            session.set_current_tool_call(None);
            return Ok(PermissionFlow::Cancelled);
        }
        decision = decision_rx => decision.unwrap_or(PermissionDecision::Cancelled),
    };

    session.set_current_tool_call(None);
    deps.controller
        .authorize_tool(session_id, &spec.tool_call_id, decision.is_allowed())
        .await?;
    Ok(PermissionFlow::Continue)
}

async fn finish_cancelled(
    deps: &TurnDeps<'_>,
    session: &Arc<Session>,
    reply: &str,
) -> Result<acp::StopReason> {
    let session_id = session.session_id.as_str();
    if let Err(e) = deps.controller.interrupt(session_id).await {
        tracing::warn!(session_id, "Failed to interrupt controller: {e}");
    }
    deps.arbiter.reject_session(session_id);
    deps.translator.forget_session(session_id);
    flush_reply(deps.history, session_id, reply).await;
    tracing::info!(session_id, "Prompt turn cancelled");
    Ok(acp::StopReason::Cancelled)
}

async fn flush_reply(history: &dyn HistoryStore, session_id: &str, reply: &str) {
    if reply.is_empty() {
        return;
    }
    record(history, session_id, HistoryEntry::agent(reply.to_string())).await;
}

/// Transcript writes never fail a turn
async fn record(history: &dyn HistoryStore, session_id: &str, entry: HistoryEntry) {
    if let Err(e) = history.append(session_id, entry).await {
        tracing::warn!(session_id, "Failed to record history entry: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistoryStore;
    use crate::permission::ToolNamePolicy;
    use crate::session::OutboundEvent;
    use crate::types::{ModelId, SessionMode};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct MockController {
        scripted: Mutex<Vec<ControllerEvent>>,
        hold_open: bool,
        held: Mutex<Option<mpsc::UnboundedSender<ControllerEvent>>>,
        requests: Mutex<Vec<TurnRequest>>,
        authorizations: Mutex<Vec<(String, bool)>>,
        interrupts: Mutex<Vec<String>>,
    }

    impl MockController {
        fn scripted(events: Vec<ControllerEvent>) -> Self {
            Self {
                scripted: Mutex::new(events),
                hold_open: false,
                held: Mutex::new(None),
                requests: Mutex::new(Vec::new()),
                authorizations: Mutex::new(Vec::new()),
                interrupts: Mutex::new(Vec::new()),
            }
        }

        fn hanging() -> Self {
            let mut mock = Self::scripted(Vec::new());
            mock.hold_open = true;
            mock
        }
    }

    #[async_trait]
    impl Controller for MockController {
        async fn start_turn(
            &self,
            request: TurnRequest,
        ) -> Result<mpsc::UnboundedReceiver<ControllerEvent>> {
            self.requests.lock().unwrap().push(request);
            let (tx, rx) = mpsc::unbounded_channel();
            for event in self.scripted.lock().unwrap().drain(..) {
                tx.send(event).unwrap();
            }
            if self.hold_open {
                *self.held.lock().unwrap() = Some(tx);
            }
            Ok(rx)
        }

        async fn authorize_tool(
            &self,
            _session_id: &str,
            tool_call_id: &str,
            allowed: bool,
        ) -> Result<()> {
            self.authorizations
                .lock()
                .unwrap()
                .push((tool_call_id.to_string(), allowed));
            Ok(())
        }

        async fn interrupt(&self, session_id: &str) -> Result<()> {
            self.interrupts.lock().unwrap().push(session_id.to_string());
            Ok(())
        }
    }

    struct Harness {
        controller: MockController,
        translator: EventTranslator,
        arbiter: PermissionArbiter,
        emitter: SessionEventEmitter,
        history: MemoryHistoryStore,
        config: AgentConfig,
        session: Arc<Session>,
        outbound: mpsc::UnboundedReceiver<OutboundEvent>,
    }

    impl Harness {
        fn new(controller: MockController) -> Self {
            let (tx, outbound) = mpsc::unbounded_channel();
            Self {
                controller,
                translator: EventTranslator::new(Arc::new(ToolNamePolicy::new(
                    ["Read"].into_iter().map(String::from),
                ))),
                arbiter: PermissionArbiter::new(),
                emitter: SessionEventEmitter::new(tx),
                history: MemoryHistoryStore::new(),
                config: AgentConfig::default(),
                session: Arc::new(Session::new(
                    "s1".to_string(),
                    PathBuf::from("/tmp"),
                    Vec::new(),
                )),
                outbound,
            }
        }

        fn deps(&self) -> TurnDeps<'_> {
            TurnDeps {
                controller: &self.controller,
                translator: &self.translator,
                arbiter: &self.arbiter,
                emitter: &self.emitter,
                history: &self.history,
                config: &self.config,
            }
        }

        fn text_prompt(&self) -> Vec<PromptChunk> {
            vec![PromptChunk::Text {
                text: "list files".to_string(),
            }]
        }
    }

    fn ended(outcome: TurnOutcome) -> ControllerEvent {
        ControllerEvent::TurnEnded { outcome }
    }

    #[tokio::test]
    async fn test_simple_turn_ends_with_end_turn() {
        let mut h = Harness::new(MockController::scripted(vec![
            ControllerEvent::MessageChunk {
                text: "hello".to_string(),
            },
            ControllerEvent::MessageChunk {
                text: " world".to_string(),
            },
            ended(TurnOutcome::Success),
        ]));

        let stop = run_turn(h.deps(), &h.session, h.text_prompt()).await.unwrap();
        assert_eq!(stop, acp::StopReason::EndTurn);

        // Both chunks reached the transport, in order.
        assert!(matches!(
            h.outbound.try_recv().unwrap(),
            OutboundEvent::Update(_)
        ));
        assert!(matches!(
            h.outbound.try_recv().unwrap(),
            OutboundEvent::Update(_)
        ));
        assert!(h.outbound.try_recv().is_err());

        // Turn left the session idle and recorded the transcript.
        assert!(!h.session.is_processing());
        let transcript = h.history.load("s1").await.unwrap().unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].text, "hello world");
    }

    #[tokio::test]
    async fn test_plan_mode_turn_carries_model_override() {
        let mut h = Harness::new(MockController::scripted(vec![ended(TurnOutcome::Success)]));
        h.config.plan_model = Some(ModelId::new("anthropic", "claude-sonnet-4"));
        h.session.set_mode(SessionMode::Plan);
        h.session
            .set_model_override(SessionMode::Plan, ModelId::new("anthropic", "claude-haiku-4"));

        run_turn(h.deps(), &h.session, h.text_prompt()).await.unwrap();

        let requests = h.controller.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].mode, SessionMode::Plan);
        // The per-session override wins over the configured default.
        assert_eq!(
            requests[0].model,
            Some(ModelId::new("anthropic", "claude-haiku-4"))
        );
    }

    #[tokio::test]
    async fn test_turn_model_falls_back_to_configured_default() {
        let mut h = Harness::new(MockController::scripted(vec![ended(TurnOutcome::Success)]));
        h.config.plan_model = Some(ModelId::new("anthropic", "claude-sonnet-4"));
        h.session.set_mode(SessionMode::Plan);

        run_turn(h.deps(), &h.session, h.text_prompt()).await.unwrap();

        let requests = h.controller.requests.lock().unwrap();
        assert_eq!(
            requests[0].model,
            Some(ModelId::new("anthropic", "claude-sonnet-4"))
        );
    }

    #[tokio::test]
    async fn test_stream_close_without_terminal_event_clears_tracking() {
        let h = Harness::new(MockController::scripted(vec![
            ControllerEvent::ToolCallStart {
                id: "t1".to_string(),
                name: "Read".to_string(),
                input: json!({"file_path": "/tmp/a"}),
            },
            ControllerEvent::ToolCallProgress {
                id: "t1".to_string(),
                status: crate::controller::ToolStatus::InProgress,
                output: None,
            },
        ]));

        let stop = run_turn(h.deps(), &h.session, h.text_prompt()).await.unwrap();
        assert_eq!(stop, acp::StopReason::EndTurn);
        assert!(h.translator.tool_status("s1", "t1").is_none());
        assert!(!h.session.is_processing());
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected() {
        let h = Harness::new(MockController::scripted(vec![]));
        let err = run_turn(h.deps(), &h.session, Vec::new()).await;
        assert!(matches!(err, Err(AgentError::EmptyPrompt)));
        assert!(!h.session.is_processing());
    }

    #[tokio::test]
    async fn test_second_prompt_rejected_while_processing() {
        let h = Harness::new(MockController::scripted(vec![]));
        let _guard = h.session.begin_turn().unwrap();

        let err = run_turn(h.deps(), &h.session, h.text_prompt()).await;
        assert!(matches!(err, Err(AgentError::AlreadyProcessing(_))));
    }

    #[tokio::test]
    async fn test_permission_allow_resumes_turn() {
        let h = Harness::new(MockController::scripted(vec![
            ControllerEvent::ToolCallStart {
                id: "t1".to_string(),
                name: "Bash".to_string(),
                input: json!({"command": "ls"}),
            },
            ControllerEvent::ToolCallProgress {
                id: "t1".to_string(),
                status: crate::controller::ToolStatus::Completed,
                output: None,
            },
            ended(TurnOutcome::Success),
        ]));

        let turn = run_turn(h.deps(), &h.session, h.text_prompt());
        tokio::pin!(turn);

        // Turn suspends on the prompt; nudge it, then answer.
        tokio::select! {
            _ = &mut turn => panic!("turn finished before permission was resolved"),
            () = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        assert!(h.arbiter.is_pending("s1", "t1"));
        h.arbiter
            .resolve("s1", "t1", PermissionDecision::AllowOnce)
            .unwrap();

        let stop = turn.await.unwrap();
        assert_eq!(stop, acp::StopReason::EndTurn);
        assert_eq!(
            *h.controller.authorizations.lock().unwrap(),
            vec![("t1".to_string(), true)]
        );
        assert_eq!(h.session.pending_tool_count(), 0);
    }

    #[tokio::test]
    async fn test_permission_rejection_denies_tool() {
        let h = Harness::new(MockController::scripted(vec![
            ControllerEvent::ToolCallStart {
                id: "t1".to_string(),
                name: "Bash".to_string(),
                input: json!({}),
            },
            ended(TurnOutcome::Success),
        ]));

        let turn = run_turn(h.deps(), &h.session, h.text_prompt());
        tokio::pin!(turn);
        tokio::select! {
            _ = &mut turn => panic!("turn finished before permission was resolved"),
            () = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        h.arbiter
            .resolve("s1", "t1", PermissionDecision::Rejected)
            .unwrap();

        let stop = turn.await.unwrap();
        assert_eq!(stop, acp::StopReason::EndTurn);
        assert_eq!(
            *h.controller.authorizations.lock().unwrap(),
            vec![("t1".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_auto_approved_tool_skips_arbiter() {
        let h = Harness::new(MockController::scripted(vec![
            ControllerEvent::ToolCallStart {
                id: "t1".to_string(),
                name: "Read".to_string(),
                input: json!({"file_path": "/tmp/a"}),
            },
            ended(TurnOutcome::Success),
        ]));

        let stop = run_turn(h.deps(), &h.session, h.text_prompt()).await.unwrap();
        assert_eq!(stop, acp::StopReason::EndTurn);
        assert_eq!(h.arbiter.pending_count(), 0);
        assert!(h.controller.authorizations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_stream() {
        let h = Harness::new(MockController::hanging());

        let turn = run_turn(h.deps(), &h.session, h.text_prompt());
        tokio::pin!(turn);
        tokio::select! {
            _ = &mut turn => panic!("turn finished without input"),
            () = tokio::time::sleep(Duration::from_millis(20)) => {}
        }

        assert!(h.session.cancel_turn());
        let stop = turn.await.unwrap();
        assert_eq!(stop, acp::StopReason::Cancelled);
        assert_eq!(*h.controller.interrupts.lock().unwrap(), vec!["s1"]);
        assert!(!h.session.is_processing());
    }

    #[tokio::test]
    async fn test_cancel_while_awaiting_permission() {
        let h = Harness::new(MockController::scripted(vec![ControllerEvent::ToolCallStart {
            id: "t1".to_string(),
            name: "Bash".to_string(),
            input: json!({}),
        }]));

        let turn = run_turn(h.deps(), &h.session, h.text_prompt());
        tokio::pin!(turn);
        tokio::select! {
            _ = &mut turn => panic!("turn finished before cancellation"),
            () = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        assert!(h.arbiter.is_pending("s1", "t1"));

        h.session.cancel_turn();
        let stop = turn.await.unwrap();
        assert_eq!(stop, acp::StopReason::Cancelled);
        // The outstanding prompt was settled, not leaked.
        assert_eq!(h.arbiter.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_outcome_mapping() {
        for (outcome, expected) in [
            (TurnOutcome::MaxTurns, acp::StopReason::MaxTurnRequests),
            (TurnOutcome::Refusal, acp::StopReason::Refusal),
            (TurnOutcome::Error, acp::StopReason::EndTurn),
        ] {
            let h = Harness::new(MockController::scripted(vec![ended(outcome)]));
            let stop = run_turn(h.deps(), &h.session, h.text_prompt()).await.unwrap();
            assert_eq!(stop, expected);
        }
    }
}
