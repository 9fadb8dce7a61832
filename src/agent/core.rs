//! Protocol facade
//!
//! Implements the ACP `Agent` trait on top of the session registry, the turn
//! driver, and the permission arbiter. Model and per-option configuration ride
//! the extension method channel.

use std::sync::Arc;

use agent_client_protocol as acp;
use serde::Deserialize;
use serde_json::value::RawValue;
use tokio::sync::mpsc;

use crate::controller::{Controller, PromptChunk};
use crate::history::{HistoryRole, HistoryStore};
use crate::permission::{PermissionArbiter, PermissionDecision, ToolNamePolicy};
use crate::session::{OutboundEvent, SessionEventEmitter, SessionManager};
use crate::translate::EventTranslator;
use crate::types::{AgentConfig, AgentError, ModelId, SessionMode};

use super::auth::Authenticator;
use super::turn::{TurnDeps, run_turn};

/// Parameters of the `session/set_model` extension method
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetModelParams {
    pub session_id: String,
    /// Mode the override applies to; defaults to the session's current mode
    #[serde(default)]
    pub mode: Option<SessionMode>,
    /// `"<provider>/<modelId>"`
    pub model: String,
}

/// Parameters of the `session/set_config_option` extension method
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetConfigOptionParams {
    pub session_id: String,
    pub key: String,
    pub value: String,
}

/// The protocol-visible agent
#[derive(Clone)]
pub struct PilotAcpAgent {
    config: Arc<AgentConfig>,
    controller: Arc<dyn Controller>,
    history: Arc<dyn HistoryStore>,
    authenticator: Arc<dyn Authenticator>,
    sessions: Arc<SessionManager>,
    emitter: Arc<SessionEventEmitter>,
    arbiter: Arc<PermissionArbiter>,
    translator: Arc<EventTranslator>,
}

impl PilotAcpAgent {
    /// Wire the bridge together around one outbound transport channel
    pub fn new(
        config: AgentConfig,
        controller: Arc<dyn Controller>,
        history: Arc<dyn HistoryStore>,
        authenticator: Arc<dyn Authenticator>,
        transport_tx: mpsc::UnboundedSender<OutboundEvent>,
    ) -> Self {
        let emitter = Arc::new(SessionEventEmitter::new(transport_tx));
        let arbiter = Arc::new(PermissionArbiter::new());
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&arbiter),
            Arc::clone(&emitter),
        ));
        let translator = Arc::new(EventTranslator::new(Arc::new(ToolNamePolicy::new(
            config.auto_approved_tools.clone(),
        ))));
        Self {
            config: Arc::new(config),
            controller,
            history,
            authenticator,
            sessions,
            emitter,
            arbiter,
            translator,
        }
    }

    /// Deliver a client permission verdict to the waiting turn
    pub fn resolve_permission(
        &self,
        session_id: &str,
        tool_call_id: &str,
        decision: PermissionDecision,
    ) -> crate::types::Result<()> {
        self.arbiter.resolve(session_id, tool_call_id, decision)
    }

    /// Cancel all in-flight turns, settle outstanding permissions, and drop
    /// every session
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down session bridge");
        for session_id in self.sessions.session_ids() {
            if let Some(session) = self.sessions.get_session(&session_id) {
                if session.cancel_turn() {
                    if let Err(e) = self.controller.interrupt(&session_id).await {
                        tracing::warn!(session_id, "Failed to interrupt controller: {e}");
                    }
                }
            }
        }
        self.sessions.clear_all();
        let settled = self.arbiter.reject_all();
        if settled > 0 {
            tracing::debug!(settled, "Settled outstanding permission requests");
        }
    }

    /// Set the model override of one mode on a session
    pub async fn set_session_model(&self, params: SetModelParams) -> crate::types::Result<()> {
        let session = self.sessions.get_session_or_error(&params.session_id)?;
        let model: ModelId = params.model.parse()?;
        let mode = params.mode.unwrap_or_else(|| session.mode());
        tracing::info!(
            session_id = %params.session_id,
            %mode,
            %model,
            "Set session model override"
        );
        session.set_model_override(mode, model);
        Ok(())
    }

    /// Set a named configuration option on a session
    pub async fn set_session_config_option(
        &self,
        params: SetConfigOptionParams,
    ) -> crate::types::Result<()> {
        let session = self.sessions.get_session_or_error(&params.session_id)?;
        match params.key.as_str() {
            "mode" => {
                let mode: SessionMode = params.value.parse()?;
                session.set_mode(mode);
                self.emit_current_mode(&session.session_id, mode);
            }
            "planModel" => {
                session.set_model_override(SessionMode::Plan, params.value.parse()?);
            }
            "actModel" => {
                session.set_model_override(SessionMode::Act, params.value.parse()?);
            }
            other => {
                return Err(AgentError::config_error(format!(
                    "unknown config option: {other}"
                )));
            }
        }
        Ok(())
    }

    fn emit_current_mode(&self, session_id: &str, mode: SessionMode) {
        self.emitter.emit(
            session_id,
            acp::SessionUpdate::CurrentModeUpdate(acp::CurrentModeUpdate::new(
                acp::SessionModeId::new(mode.as_str().to_string()),
            )),
        );
    }

    fn mode_state(current: SessionMode) -> acp::SessionModeState {
        acp::SessionModeState::new(
            acp::SessionModeId::new(current.as_str().to_string()),
            SessionMode::all()
                .into_iter()
                .map(|mode| {
                    acp::SessionMode::new(
                        acp::SessionModeId::new(mode.as_str().to_string()),
                        mode.label().to_string(),
                    )
                    .description(mode.description().to_string())
                })
                .collect(),
        )
    }

    fn turn_deps(&self) -> TurnDeps<'_> {
        TurnDeps {
            controller: self.controller.as_ref(),
            translator: &self.translator,
            arbiter: &self.arbiter,
            emitter: &self.emitter,
            history: self.history.as_ref(),
            config: &self.config,
        }
    }
}

fn prompt_chunks(blocks: Vec<acp::ContentBlock>) -> Vec<PromptChunk> {
    blocks
        .into_iter()
        .filter_map(|block| match block {
            acp::ContentBlock::Text(text) => Some(PromptChunk::Text { text: text.text }),
            acp::ContentBlock::Image(image) => Some(PromptChunk::Image {
                mime_type: image.mime_type,
                data: image.data,
            }),
            acp::ContentBlock::Resource(resource) => match resource.resource {
                acp::EmbeddedResourceResource::TextResourceContents(contents) => {
                    Some(PromptChunk::Resource {
                        uri: contents.uri,
                        text: contents.text,
                    })
                }
                _ => None,
            },
            acp::ContentBlock::ResourceLink(link) => Some(PromptChunk::Resource {
                uri: link.uri,
                text: String::new(),
            }),
            _ => None,
        })
        .collect()
}

fn null_ext_response() -> Result<acp::ExtResponse, acp::Error> {
    let raw = RawValue::from_string("null".to_string())
        .map_err(|e| acp::Error::internal_error().data(serde_json::Value::String(e.to_string())))?;
    Ok(acp::ExtResponse::new(Arc::from(raw)))
}

#[async_trait::async_trait(?Send)]
impl acp::Agent for PilotAcpAgent {
    async fn initialize(
        &self,
        args: acp::InitializeRequest,
    ) -> Result<acp::InitializeResponse, acp::Error> {
        tracing::info!(protocol_version = ?args.protocol_version, "Initialize");
        let capabilities = acp::AgentCapabilities::new()
            .load_session(true)
            .prompt_capabilities(
                acp::PromptCapabilities::new()
                    .embedded_context(true)
                    .image(true)
                    .audio(false),
            )
            .mcp_capabilities(acp::McpCapabilities::new().http(true).sse(true));
        Ok(acp::InitializeResponse::new(acp::ProtocolVersion::V1)
            .agent_capabilities(capabilities)
            .agent_info(
                acp::Implementation::new("pilot-acp-rs", env!("CARGO_PKG_VERSION"))
                    .title("Pilot ACP Bridge".to_string()),
            )
            .auth_methods(self.authenticator.methods()))
    }

    async fn authenticate(
        &self,
        args: acp::AuthenticateRequest,
    ) -> Result<acp::AuthenticateResponse, acp::Error> {
        self.authenticator
            .authenticate(args.method_id.0.as_ref())
            .await?;
        Ok(acp::AuthenticateResponse::new())
    }

    async fn new_session(
        &self,
        args: acp::NewSessionRequest,
    ) -> Result<acp::NewSessionResponse, acp::Error> {
        let session = self.sessions.create_session(args.cwd, args.mcp_servers)?;
        tracing::info!(session_id = %session.session_id, cwd = %session.cwd.display(), "Created session");
        Ok(acp::NewSessionResponse::new(session.session_id.clone())
            .modes(Self::mode_state(session.mode())))
    }

    async fn load_session(
        &self,
        args: acp::LoadSessionRequest,
    ) -> Result<acp::LoadSessionResponse, acp::Error> {
        let session_id = args.session_id.0.as_ref().to_string();
        let transcript = self
            .history
            .load(&session_id)
            .await?
            .ok_or_else(|| AgentError::session_not_found(&session_id))?;

        let session =
            self.sessions
                .restore_session(session_id.clone(), args.cwd, args.mcp_servers)?;
        tracing::info!(session_id, entries = transcript.len(), "Restored session");

        for entry in transcript {
            let chunk = acp::ContentChunk::new(entry.text.into());
            let update = match entry.role {
                HistoryRole::User => acp::SessionUpdate::UserMessageChunk(chunk),
                HistoryRole::Agent => acp::SessionUpdate::AgentMessageChunk(chunk),
            };
            self.emitter.emit(&session_id, update);
        }

        Ok(acp::LoadSessionResponse::new().modes(Self::mode_state(session.mode())))
    }

    async fn prompt(&self, args: acp::PromptRequest) -> Result<acp::PromptResponse, acp::Error> {
        let session = self
            .sessions
            .get_session_or_error(args.session_id.0.as_ref())?;
        let prompt = prompt_chunks(args.prompt);
        let stop_reason = run_turn(self.turn_deps(), &session, prompt).await?;
        tracing::debug!(session_id = %session.session_id, ?stop_reason, "Prompt turn finished");
        Ok(acp::PromptResponse::new(stop_reason))
    }

    async fn cancel(&self, args: acp::CancelNotification) -> Result<(), acp::Error> {
        let session_id = args.session_id.0.as_ref();
        match self.sessions.get_session(session_id) {
            Some(session) => {
                if session.cancel_turn() {
                    tracing::info!(session_id, "Cancellation requested");
                } else {
                    tracing::debug!(session_id, "Cancel for idle session ignored");
                }
            }
            None => tracing::debug!(session_id, "Cancel for unknown session ignored"),
        }
        Ok(())
    }

    async fn set_session_mode(
        &self,
        args: acp::SetSessionModeRequest,
    ) -> Result<acp::SetSessionModeResponse, acp::Error> {
        let session = self
            .sessions
            .get_session_or_error(args.session_id.0.as_ref())?;
        let mode: SessionMode = args.mode_id.0.as_ref().parse()?;
        session.set_mode(mode);
        self.emit_current_mode(&session.session_id, mode);
        tracing::info!(session_id = %session.session_id, %mode, "Session mode changed");
        Ok(acp::SetSessionModeResponse::default())
    }

    async fn ext_method(&self, args: acp::ExtRequest) -> Result<acp::ExtResponse, acp::Error> {
        let raw = args.params.get();
        match args.method.as_ref() {
            "session/set_model" | "unstable_setSessionModel" => {
                let params: SetModelParams =
                    serde_json::from_str(raw).map_err(|_| acp::Error::invalid_params())?;
                self.set_session_model(params).await?;
            }
            "session/set_config_option" | "unstable_setSessionConfigOption" => {
                let params: SetConfigOptionParams =
                    serde_json::from_str(raw).map_err(|_| acp::Error::invalid_params())?;
                self.set_session_config_option(params).await?;
            }
            other => {
                tracing::debug!(method = other, "Unknown extension method");
                return Err(acp::Error::method_not_found());
            }
        }
        null_ext_response()
    }

    async fn ext_notification(&self, args: acp::ExtNotification) -> Result<(), acp::Error> {
        tracing::debug!(method = %args.method, "Ignoring extension notification");
        Ok(())
    }
}

impl std::fmt::Debug for PilotAcpAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PilotAcpAgent")
            .field("sessions", &self.sessions.session_count())
            .finish_non_exhaustive()
    }
}
