//! Controller event translation
//!
//! Maps internal controller events onto protocol `sessionUpdate` payloads.
//! Keeps a per-tool-call status cache so out-of-order progress can never make
//! a tool call move backwards on the client side.

use std::path::PathBuf;
use std::sync::Arc;

use agent_client_protocol as acp;
use dashmap::DashMap;

use crate::controller::{
    CommandSpec, ControllerEvent, PlanPriority, PlanStep, PlanStepStatus, ToolStatus, TurnOutcome,
};
use crate::permission::{PermissionPolicy, permission_options};

/// A permission prompt the turn driver must forward before continuing the tool
#[derive(Debug)]
pub struct PermissionPromptSpec {
    pub tool_call_id: String,
    pub tool_name: String,
    pub request: acp::RequestPermissionRequest,
}

/// Result of translating one controller event
#[derive(Debug, Default)]
pub struct TranslatedMessage {
    /// Updates to emit, in order
    pub updates: Vec<acp::SessionUpdate>,
    /// Consent prompt to raise after the updates, if the policy demands one
    pub permission: Option<PermissionPromptSpec>,
    /// Set when the event was the turn's terminal marker
    pub outcome: Option<TurnOutcome>,
}

/// Stateful translator from controller events to session updates
pub struct EventTranslator {
    policy: Arc<dyn PermissionPolicy>,
    tool_status: DashMap<(String, String), ToolStatus>,
}

impl EventTranslator {
    pub fn new(policy: Arc<dyn PermissionPolicy>) -> Self {
        Self {
            policy,
            tool_status: DashMap::new(),
        }
    }

    /// Translate one event for a session
    pub fn translate(&self, session_id: &str, event: ControllerEvent) -> TranslatedMessage {
        let mut out = TranslatedMessage::default();
        match event {
            ControllerEvent::MessageChunk { text } => {
                out.updates.push(acp::SessionUpdate::AgentMessageChunk(
                    acp::ContentChunk::new(text.into()),
                ));
            }
            ControllerEvent::ThoughtChunk { text } => {
                out.updates.push(acp::SessionUpdate::AgentThoughtChunk(
                    acp::ContentChunk::new(text.into()),
                ));
            }
            ControllerEvent::ToolCallStart { id, name, input } => {
                self.translate_tool_start(session_id, id, &name, input, &mut out);
            }
            ControllerEvent::ToolCallProgress { id, status, output } => {
                self.translate_tool_progress(session_id, &id, status, output, &mut out);
            }
            ControllerEvent::PlanUpdate { entries } => {
                let entries = entries.into_iter().map(plan_entry).collect();
                out.updates
                    .push(acp::SessionUpdate::Plan(acp::Plan::new(entries)));
            }
            ControllerEvent::CommandsUpdate { commands } => {
                let commands = commands.into_iter().map(available_command).collect();
                out.updates.push(acp::SessionUpdate::AvailableCommandsUpdate(
                    acp::AvailableCommandsUpdate::new(commands),
                ));
            }
            ControllerEvent::Error { message } => {
                tracing::error!(session_id, %message, "Controller reported an error");
                out.updates.push(acp::SessionUpdate::AgentMessageChunk(
                    acp::ContentChunk::new(format!("Error: {message}").into()),
                ));
            }
            ControllerEvent::TurnEnded { outcome } => {
                self.forget_session(session_id);
                out.outcome = Some(outcome);
            }
            ControllerEvent::Unknown => {
                tracing::debug!(session_id, "Dropping unrecognized controller event");
            }
        }
        out
    }

    fn translate_tool_start(
        &self,
        session_id: &str,
        id: String,
        name: &str,
        input: serde_json::Value,
        out: &mut TranslatedMessage,
    ) {
        self.tool_status
            .insert((session_id.to_string(), id.clone()), ToolStatus::Pending);

        let kind = tool_kind(name);
        let title = tool_title(name, &input);
        let mut tool_call = acp::ToolCall::new(acp::ToolCallId::new(id.clone()), title.clone())
            .kind(kind)
            .status(acp::ToolCallStatus::Pending)
            .raw_input(input.clone());
        if let Some(location) = tool_location(&input) {
            tool_call = tool_call.locations(vec![location]);
        }
        out.updates.push(acp::SessionUpdate::ToolCall(tool_call));

        if self.policy.requires_consent(name, &input) {
            let update = acp::ToolCallUpdate::new(
                acp::ToolCallId::new(id.clone()),
                acp::ToolCallUpdateFields::new()
                    .title(title)
                    .kind(kind)
                    .status(acp::ToolCallStatus::Pending)
                    .raw_input(input),
            );
            let request = acp::RequestPermissionRequest::new(
                acp::SessionId::new(session_id.to_string()),
                update,
                permission_options(),
            );
            out.permission = Some(PermissionPromptSpec {
                tool_call_id: id,
                tool_name: name.to_string(),
                request,
            });
        }
    }

    fn translate_tool_progress(
        &self,
        session_id: &str,
        id: &str,
        status: ToolStatus,
        output: Option<serde_json::Value>,
        out: &mut TranslatedMessage,
    ) {
        let key = (session_id.to_string(), id.to_string());
        let Some(mut known) = self.tool_status.get_mut(&key) else {
            tracing::debug!(
                session_id,
                tool_call_id = id,
                "Dropping progress for unknown tool call"
            );
            return;
        };
        if status.rank() < known.rank() {
            tracing::warn!(
                session_id,
                tool_call_id = id,
                from = ?*known,
                to = ?status,
                "Dropping backwards tool status transition"
            );
            return;
        }
        *known = status;
        drop(known);

        let mut fields = acp::ToolCallUpdateFields::new().status(tool_call_status(status));
        if let Some(output) = output {
            fields = fields.raw_output(output);
        }
        out.updates.push(acp::SessionUpdate::ToolCallUpdate(
            acp::ToolCallUpdate::new(acp::ToolCallId::new(id.to_string()), fields),
        ));
    }

    /// Drop all cached tool state of one session
    pub fn forget_session(&self, session_id: &str) {
        self.tool_status.retain(|(sid, _), _| sid != session_id);
    }

    /// Last observed status of a tool call, if any
    pub fn tool_status(&self, session_id: &str, tool_call_id: &str) -> Option<ToolStatus> {
        self.tool_status
            .get(&(session_id.to_string(), tool_call_id.to_string()))
            .map(|r| *r)
    }
}

impl std::fmt::Debug for EventTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTranslator")
            .field("tracked_tool_calls", &self.tool_status.len())
            .finish_non_exhaustive()
    }
}

fn tool_call_status(status: ToolStatus) -> acp::ToolCallStatus {
    match status {
        ToolStatus::Pending => acp::ToolCallStatus::Pending,
        ToolStatus::InProgress => acp::ToolCallStatus::InProgress,
        ToolStatus::Completed => acp::ToolCallStatus::Completed,
        ToolStatus::Failed => acp::ToolCallStatus::Failed,
    }
}

fn plan_entry(step: PlanStep) -> acp::PlanEntry {
    let priority = match step.priority {
        PlanPriority::High => acp::PlanEntryPriority::High,
        PlanPriority::Medium => acp::PlanEntryPriority::Medium,
        PlanPriority::Low => acp::PlanEntryPriority::Low,
    };
    let status = match step.status {
        PlanStepStatus::Pending => acp::PlanEntryStatus::Pending,
        PlanStepStatus::InProgress => acp::PlanEntryStatus::InProgress,
        PlanStepStatus::Completed => acp::PlanEntryStatus::Completed,
    };
    acp::PlanEntry::new(step.content, priority, status)
}

fn available_command(spec: CommandSpec) -> acp::AvailableCommand {
    acp::AvailableCommand::new(spec.name, spec.description)
}

/// Classify a tool by name for client presentation
fn tool_kind(name: &str) -> acp::ToolKind {
    match name {
        "Read" => acp::ToolKind::Read,
        "Write" | "Edit" | "MultiEdit" | "NotebookEdit" => acp::ToolKind::Edit,
        "Bash" | "KillShell" => acp::ToolKind::Execute,
        "Grep" | "Glob" => acp::ToolKind::Search,
        "WebFetch" | "WebSearch" => acp::ToolKind::Fetch,
        "Think" | "TodoWrite" | "Task" => acp::ToolKind::Think,
        _ => acp::ToolKind::Other,
    }
}

/// Human-readable title for a tool call
fn tool_title(name: &str, input: &serde_json::Value) -> String {
    match name {
        "Bash" => input["command"]
            .as_str()
            .map_or_else(|| name.to_string(), |cmd| format!("$ {cmd}")),
        "Read" | "Write" | "Edit" => input_path(input)
            .map_or_else(|| name.to_string(), |p| format!("{name} {}", p.display())),
        "Grep" | "Glob" => input["pattern"]
            .as_str()
            .map_or_else(|| name.to_string(), |p| format!("{name} {p}")),
        "WebFetch" => input["url"]
            .as_str()
            .map_or_else(|| name.to_string(), |u| format!("Fetch {u}")),
        _ => name.to_string(),
    }
}

fn tool_location(input: &serde_json::Value) -> Option<acp::ToolCallLocation> {
    input_path(input).map(acp::ToolCallLocation::new)
}

fn input_path(input: &serde_json::Value) -> Option<PathBuf> {
    input["file_path"]
        .as_str()
        .or_else(|| input["path"].as_str())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::ToolNamePolicy;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn translator() -> EventTranslator {
        EventTranslator::new(Arc::new(ToolNamePolicy::new(
            ["Read", "Grep"].into_iter().map(String::from),
        )))
    }

    fn start(id: &str, name: &str, input: serde_json::Value) -> ControllerEvent {
        ControllerEvent::ToolCallStart {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }

    fn progress(id: &str, status: ToolStatus) -> ControllerEvent {
        ControllerEvent::ToolCallProgress {
            id: id.to_string(),
            status,
            output: None,
        }
    }

    #[test]
    fn test_message_and_thought_chunks() {
        let t = translator();

        let msg = t.translate(
            "s1",
            ControllerEvent::MessageChunk {
                text: "hello".to_string(),
            },
        );
        assert!(matches!(
            msg.updates.as_slice(),
            [acp::SessionUpdate::AgentMessageChunk(_)]
        ));

        let thought = t.translate(
            "s1",
            ControllerEvent::ThoughtChunk {
                text: "hmm".to_string(),
            },
        );
        assert!(matches!(
            thought.updates.as_slice(),
            [acp::SessionUpdate::AgentThoughtChunk(_)]
        ));
    }

    #[test]
    fn test_auto_approved_tool_needs_no_permission() {
        let t = translator();
        let out = t.translate("s1", start("t1", "Read", json!({"file_path": "/tmp/a.rs"})));

        assert!(out.permission.is_none());
        match out.updates.as_slice() {
            [acp::SessionUpdate::ToolCall(call)] => {
                let json = serde_json::to_value(call).unwrap();
                assert_eq!(json["kind"], "read");
                assert_eq!(json["title"], "Read /tmp/a.rs");
            }
            other => panic!("unexpected updates: {other:?}"),
        }
    }

    #[test]
    fn test_gated_tool_raises_permission_prompt() {
        let t = translator();
        let out = t.translate("s1", start("t1", "Bash", json!({"command": "make test"})));

        let prompt = out.permission.expect("Bash should need consent");
        assert_eq!(prompt.tool_call_id, "t1");
        assert_eq!(prompt.tool_name, "Bash");
        assert_eq!(prompt.request.options.len(), 3);
        // The tool-call creation update still precedes the prompt.
        assert!(matches!(
            out.updates.as_slice(),
            [acp::SessionUpdate::ToolCall(_)]
        ));
    }

    #[test]
    fn test_backwards_status_transition_dropped() {
        let t = translator();
        t.translate("s1", start("t1", "Bash", json!({})));
        t.translate("s1", progress("t1", ToolStatus::Completed));

        let regression = t.translate("s1", progress("t1", ToolStatus::InProgress));
        assert!(regression.updates.is_empty());
        assert_eq!(t.tool_status("s1", "t1"), Some(ToolStatus::Completed));
    }

    #[test]
    fn test_progress_for_unknown_tool_dropped() {
        let t = translator();
        let out = t.translate("s1", progress("ghost", ToolStatus::Completed));
        assert!(out.updates.is_empty());
    }

    #[test]
    fn test_progress_carries_output() {
        let t = translator();
        t.translate("s1", start("t1", "Bash", json!({})));

        let out = t.translate(
            "s1",
            ControllerEvent::ToolCallProgress {
                id: "t1".to_string(),
                status: ToolStatus::Completed,
                output: Some(json!({"exit_code": 0})),
            },
        );
        match out.updates.as_slice() {
            [acp::SessionUpdate::ToolCallUpdate(update)] => {
                let json = serde_json::to_value(update).unwrap();
                assert_eq!(json["status"], "completed");
                assert_eq!(json["rawOutput"], json!({"exit_code": 0}));
            }
            other => panic!("unexpected updates: {other:?}"),
        }
    }

    #[test]
    fn test_turn_ended_clears_session_state() {
        let t = translator();
        t.translate("s1", start("t1", "Bash", json!({})));
        t.translate("s2", start("t1", "Bash", json!({})));

        let out = t.translate(
            "s1",
            ControllerEvent::TurnEnded {
                outcome: TurnOutcome::Success,
            },
        );
        assert_eq!(out.outcome, Some(TurnOutcome::Success));
        assert!(out.updates.is_empty());
        assert!(t.tool_status("s1", "t1").is_none());
        assert!(t.tool_status("s2", "t1").is_some());
    }

    #[test]
    fn test_error_becomes_visible_text() {
        let t = translator();
        let out = t.translate(
            "s1",
            ControllerEvent::Error {
                message: "model overloaded".to_string(),
            },
        );
        match out.updates.as_slice() {
            [update @ acp::SessionUpdate::AgentMessageChunk(_)] => {
                let json = serde_json::to_value(update).unwrap();
                assert_eq!(json["content"]["text"], "Error: model overloaded");
            }
            other => panic!("unexpected updates: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_dropped() {
        let t = translator();
        let out = t.translate("s1", ControllerEvent::Unknown);
        assert!(out.updates.is_empty());
        assert!(out.outcome.is_none());
    }

    #[test]
    fn test_plan_and_commands_updates() {
        let t = translator();

        let plan = t.translate(
            "s1",
            ControllerEvent::PlanUpdate {
                entries: vec![PlanStep {
                    content: "write tests".to_string(),
                    priority: PlanPriority::High,
                    status: PlanStepStatus::InProgress,
                }],
            },
        );
        assert!(matches!(
            plan.updates.as_slice(),
            [acp::SessionUpdate::Plan(_)]
        ));

        let commands = t.translate(
            "s1",
            ControllerEvent::CommandsUpdate {
                commands: vec![CommandSpec {
                    name: "compact".to_string(),
                    description: "Compact the conversation".to_string(),
                }],
            },
        );
        assert!(matches!(
            commands.updates.as_slice(),
            [acp::SessionUpdate::AvailableCommandsUpdate(_)]
        ));
    }
}
