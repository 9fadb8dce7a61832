//! Session mode and model identifier types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::AgentError;

/// Operating mode of a session
///
/// The mode is changed only via the explicit set-mode operation and takes
/// effect starting with the next prompt turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Read-only planning mode
    Plan,
    /// Full execution mode
    #[default]
    Act,
}

impl SessionMode {
    /// Stable identifier used on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Plan => "plan",
            SessionMode::Act => "act",
        }
    }

    /// Human-readable name for clients
    pub fn label(self) -> &'static str {
        match self {
            SessionMode::Plan => "Plan",
            SessionMode::Act => "Act",
        }
    }

    /// Short description shown in mode pickers
    pub fn description(self) -> &'static str {
        match self {
            SessionMode::Plan => "Plan changes without executing tools",
            SessionMode::Act => "Execute tools and apply changes",
        }
    }

    /// All modes, default first
    pub fn all() -> [SessionMode; 2] {
        [SessionMode::Act, SessionMode::Plan]
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(SessionMode::Plan),
            "act" => Ok(SessionMode::Act),
            other => Err(AgentError::InvalidMode(other.to_string())),
        }
    }
}

/// Model identifier in `"<provider>/<modelId>"` form
///
/// The bridge treats both parts as opaque beyond the separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId {
    /// Provider segment, e.g. `anthropic`
    pub provider: String,
    /// Provider-scoped model segment
    pub model: String,
}

impl ModelId {
    /// Create a model id from its two segments
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

impl FromStr for ModelId {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok(ModelId::new(provider, model))
            }
            _ => Err(AgentError::InvalidModelId(s.to_string())),
        }
    }
}

impl TryFrom<String> for ModelId {
    type Error = AgentError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ModelId> for String {
    fn from(id: ModelId) -> Self {
        id.to_string()
    }
}
