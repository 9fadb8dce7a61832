//! Controller abstraction
//!
//! The reasoning engine lives outside the bridge. All the bridge needs is a
//! stream of internal events per turn, plus two control verbs: authorizing a
//! tool call the engine is waiting on, and interrupting an in-flight turn.

mod process;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::{ModelId, Result, SessionMode};

pub use process::ProcessController;

/// One internal event produced by the controller during a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    /// Streamed assistant text fragment
    MessageChunk { text: String },
    /// Streamed reasoning fragment
    ThoughtChunk { text: String },
    /// A tool invocation was requested
    ToolCallStart {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    /// A tool call changed status
    ToolCallProgress {
        id: String,
        status: ToolStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
    },
    /// The controller revised its plan
    PlanUpdate { entries: Vec<PlanStep> },
    /// The controller advertised its slash commands
    CommandsUpdate { commands: Vec<CommandSpec> },
    /// A recoverable controller error
    Error { message: String },
    /// The turn reached a terminal outcome
    TurnEnded { outcome: TurnOutcome },
    /// Forward-compatibility catch-all; dropped by the translator
    #[serde(other)]
    Unknown,
}

/// Tool call lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ToolStatus {
    /// Monotonic ordering rank; terminal states share the top rank
    pub fn rank(self) -> u8 {
        match self {
            ToolStatus::Pending => 0,
            ToolStatus::InProgress => 1,
            ToolStatus::Completed | ToolStatus::Failed => 2,
        }
    }

    /// Whether the status is terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, ToolStatus::Completed | ToolStatus::Failed)
    }
}

/// One entry of a controller plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub content: String,
    #[serde(default)]
    pub priority: PlanPriority,
    #[serde(default)]
    pub status: PlanStepStatus,
}

/// Priority of a plan entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPriority {
    High,
    #[default]
    Medium,
    Low,
}

/// Progress state of a plan entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// A slash command advertised by the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
}

/// Terminal classification of a turn, as reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The controller finished normally
    Success,
    /// The controller hit its turn limit
    MaxTurns,
    /// The controller declined to act on the prompt
    Refusal,
    /// The controller failed; details arrive as an error event beforehand
    Error,
}

/// One prompt block handed to the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptChunk {
    Text { text: String },
    Image { mime_type: String, data: String },
    Resource { uri: String, text: String },
}

/// Everything the controller needs to run one turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnRequest {
    pub session_id: String,
    pub cwd: PathBuf,
    pub mode: SessionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelId>,
    pub prompt: Vec<PromptChunk>,
}

/// Interface to the external reasoning engine
#[async_trait]
pub trait Controller: Send + Sync {
    /// Begin one prompt turn
    ///
    /// Events for the turn arrive on the returned receiver; the stream ends
    /// with a [`ControllerEvent::TurnEnded`] or by closing the channel.
    async fn start_turn(
        &self,
        request: TurnRequest,
    ) -> Result<mpsc::UnboundedReceiver<ControllerEvent>>;

    /// Deliver a permission verdict for a tool call the controller is waiting on
    async fn authorize_tool(
        &self,
        session_id: &str,
        tool_call_id: &str,
        allowed: bool,
    ) -> Result<()>;

    /// Ask the controller to stop the session's in-flight turn
    async fn interrupt(&self, session_id: &str) -> Result<()>;
}
