//! Error types for the ACP session bridge

use agent_client_protocol as acp;
use thiserror::Error;

/// ACP protocol error codes
///
/// Standard JSON-RPC error codes and bridge-specific codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Standard JSON-RPC errors (-32xxx)
    /// Parse error: Invalid JSON
    ParseError = -32700,
    /// Invalid request: Not a valid request object
    InvalidRequest = -32600,
    /// Method not found
    MethodNotFound = -32601,
    /// Invalid params
    InvalidParams = -32602,
    /// Internal error
    InternalError = -32603,

    // Bridge-specific errors (-32000 to -32099)
    /// Session not found
    SessionNotFound = -32001,
    /// Session already exists
    SessionAlreadyExists = -32002,
    /// A prompt turn is already in flight for the session
    AlreadyProcessing = -32003,
    /// Authentication required
    AuthRequired = -32004,
    /// Invalid session mode
    InvalidMode = -32005,
    /// Operation cancelled
    Cancelled = -32006,
    /// Permission request already outstanding for the tool call
    DuplicatePermission = -32007,
    /// Permission resolution arrived after the request was settled
    StaleResolution = -32008,
    /// Streaming error
    StreamingError = -32009,
    /// Configuration error
    ConfigError = -32010,
    /// Invalid model identifier
    InvalidModel = -32011,
    /// Controller process failure
    ControllerFailed = -32012,
}

impl ErrorCode {
    /// Get the error code value
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Main error type for the session bridge
#[derive(Debug, Error)]
pub enum AgentError {
    // === Session errors ===
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session already exists
    #[error("Session already exists: {0}")]
    SessionAlreadyExists(String),

    /// A prompt is already in flight for this session
    #[error("Session {0} already has a prompt in flight")]
    AlreadyProcessing(String),

    // === Permission errors ===
    /// A permission request is already outstanding for this tool call
    #[error(
        "Permission request already outstanding for tool call {tool_call_id} in session {session_id}"
    )]
    DuplicatePermissionRequest {
        session_id: String,
        tool_call_id: String,
    },

    /// A resolution arrived for a permission request that was already settled
    #[error("Stale permission resolution for tool call {tool_call_id} in session {session_id}")]
    StalePermissionResolution {
        session_id: String,
        tool_call_id: String,
    },

    // === Authentication errors ===
    /// Authentication required
    #[error("Authentication required")]
    AuthRequired,

    // === Mode/model errors ===
    /// Invalid mode
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// Invalid model identifier (expected "<provider>/<modelId>")
    #[error("Invalid model identifier: {0}")]
    InvalidModelId(String),

    // === Prompt errors ===
    /// Empty prompt
    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    // === Streaming errors ===
    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamingError(String),

    /// Notification send failed
    #[error("Failed to send notification: {0}")]
    NotificationFailed(String),

    // === Controller errors ===
    /// Controller process failure
    #[error("Controller failed: {0}")]
    ControllerFailed(String),

    // === Configuration errors ===
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // === External errors ===
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic errors ===
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Cancelled
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type for the session bridge
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Get the protocol error code for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AgentError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            AgentError::SessionAlreadyExists(_) => ErrorCode::SessionAlreadyExists,
            AgentError::AlreadyProcessing(_) => ErrorCode::AlreadyProcessing,
            AgentError::DuplicatePermissionRequest { .. } => ErrorCode::DuplicatePermission,
            AgentError::StalePermissionResolution { .. } => ErrorCode::StaleResolution,
            AgentError::AuthRequired => ErrorCode::AuthRequired,
            AgentError::InvalidMode(_) => ErrorCode::InvalidMode,
            AgentError::InvalidModelId(_) => ErrorCode::InvalidModel,
            AgentError::EmptyPrompt => ErrorCode::InvalidParams,
            AgentError::StreamingError(_) | AgentError::NotificationFailed(_) => {
                ErrorCode::StreamingError
            }
            AgentError::ControllerFailed(_) => ErrorCode::ControllerFailed,
            AgentError::ConfigError(_) => ErrorCode::ConfigError,
            AgentError::Io(_) => ErrorCode::InternalError,
            AgentError::Json(_) => ErrorCode::ParseError,
            AgentError::Internal(_) => ErrorCode::InternalError,
            AgentError::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::StreamingError(_)
                | AgentError::NotificationFailed(_)
                | AgentError::ControllerFailed(_)
        )
    }

    /// Check if this error is a client error (caused by invalid input)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AgentError::SessionNotFound(_)
                | AgentError::AlreadyProcessing(_)
                | AgentError::InvalidMode(_)
                | AgentError::InvalidModelId(_)
                | AgentError::EmptyPrompt
        )
    }

    // === Constructor helpers ===

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        AgentError::Internal(msg.into())
    }

    /// Create a session not found error
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        AgentError::SessionNotFound(session_id.into())
    }

    /// Create a session already exists error
    pub fn session_already_exists(session_id: impl Into<String>) -> Self {
        AgentError::SessionAlreadyExists(session_id.into())
    }

    /// Create an already-processing error
    pub fn already_processing(session_id: impl Into<String>) -> Self {
        AgentError::AlreadyProcessing(session_id.into())
    }

    /// Create a duplicate permission request error
    pub fn duplicate_permission(
        session_id: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> Self {
        AgentError::DuplicatePermissionRequest {
            session_id: session_id.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    /// Create a stale permission resolution error
    pub fn stale_resolution(
        session_id: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> Self {
        AgentError::StalePermissionResolution {
            session_id: session_id.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    /// Create an invalid mode error
    pub fn invalid_mode(mode: impl Into<String>) -> Self {
        AgentError::InvalidMode(mode.into())
    }

    /// Create a streaming error
    pub fn streaming_error(msg: impl Into<String>) -> Self {
        AgentError::StreamingError(msg.into())
    }

    /// Create a controller failure error
    pub fn controller_failed(msg: impl Into<String>) -> Self {
        AgentError::ControllerFailed(msg.into())
    }

    /// Create a configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        AgentError::ConfigError(msg.into())
    }
}

impl From<AgentError> for acp::Error {
    fn from(err: AgentError) -> Self {
        acp::Error::new(err.error_code().code(), err.to_string())
    }
}
