//! Subprocess-backed controller
//!
//! Drives a configurable external engine over newline-delimited JSON: control
//! messages go to its stdin, per-session events come back on its stdout.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};

use crate::types::{AgentError, Result};

use super::{Controller, ControllerEvent, TurnRequest};

/// Control message written to the engine's stdin, one JSON object per line
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage<'a> {
    Start {
        #[serde(flatten)]
        request: &'a TurnRequest,
    },
    Authorize {
        session_id: &'a str,
        tool_call_id: &'a str,
        allowed: bool,
    },
    Interrupt {
        session_id: &'a str,
    },
}

/// Event line read from the engine's stdout
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    session_id: String,
    #[serde(flatten)]
    event: ControllerEvent,
}

/// Controller implementation speaking JSON lines to a subprocess
pub struct ProcessController {
    cmd: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    routes: Arc<DashMap<String, mpsc::UnboundedSender<ControllerEvent>>>,
}

impl ProcessController {
    /// Create a controller for the given command; the process is spawned
    /// lazily on the first turn.
    pub fn new(cmd: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            routes: Arc::new(DashMap::new()),
        }
    }

    async fn ensure_spawned(&self) -> Result<()> {
        let mut child_slot = self.child.lock().await;
        if child_slot.is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.cmd)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::ControllerFailed(format!("failed to spawn {}: {e}", self.cmd))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            AgentError::ControllerFailed("controller stdin not captured".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AgentError::ControllerFailed("controller stdout not captured".to_string())
        })?;

        tracing::info!(cmd = %self.cmd, "Spawned controller process");

        let routes = Arc::clone(&self.routes);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => route_event_line(&routes, &line),
                    Ok(None) => {
                        tracing::warn!("Controller stdout closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read controller output: {e}");
                        break;
                    }
                }
            }
            // Unblock any turns still waiting on events.
            routes.clear();
        });

        *self.stdin.lock().await = Some(stdin);
        *child_slot = Some(child);
        Ok(())
    }

    async fn write_control(&self, message: &ControlMessage<'_>) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        let Some(stdin) = stdin.as_mut() else {
            return Err(AgentError::ControllerFailed(
                "controller is not running".to_string(),
            ));
        };
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }
}

/// Parse one stdout line and deliver it to the owning session's turn.
fn route_event_line(
    routes: &DashMap<String, mpsc::UnboundedSender<ControllerEvent>>,
    line: &str,
) {
    if line.trim().is_empty() {
        return;
    }

    let envelope: EventEnvelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!("Dropping malformed controller event line: {e}");
            return;
        }
    };

    let ended = matches!(envelope.event, ControllerEvent::TurnEnded { .. });
    let delivered = routes
        .get(&envelope.session_id)
        .is_some_and(|tx| tx.send(envelope.event).is_ok());

    if !delivered {
        tracing::debug!(
            session_id = %envelope.session_id,
            "Dropping controller event for inactive session"
        );
        routes.remove(&envelope.session_id);
    } else if ended {
        routes.remove(&envelope.session_id);
    }
}

#[async_trait]
impl Controller for ProcessController {
    async fn start_turn(
        &self,
        request: TurnRequest,
    ) -> Result<mpsc::UnboundedReceiver<ControllerEvent>> {
        self.ensure_spawned().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert(request.session_id.clone(), tx);

        if let Err(e) = self.write_control(&ControlMessage::Start { request: &request }).await {
            self.routes.remove(&request.session_id);
            return Err(e);
        }
        Ok(rx)
    }

    async fn authorize_tool(
        &self,
        session_id: &str,
        tool_call_id: &str,
        allowed: bool,
    ) -> Result<()> {
        self.write_control(&ControlMessage::Authorize {
            session_id,
            tool_call_id,
            allowed,
        })
        .await
    }

    async fn interrupt(&self, session_id: &str) -> Result<()> {
        self.write_control(&ControlMessage::Interrupt { session_id })
            .await
    }
}

impl std::fmt::Debug for ProcessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessController")
            .field("cmd", &self.cmd)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}
