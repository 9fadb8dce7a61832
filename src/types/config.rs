//! Bridge configuration from environment variables

use super::model::{ModelId, SessionMode};

/// Tool names that never need client consent
///
/// Read-only tools are safe to run without a permission round-trip; everything
/// else goes through the arbiter by default.
fn default_auto_approved() -> Vec<String> {
    ["Read", "Grep", "Glob", "TodoWrite", "Think"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Bridge configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Controller subprocess command
    /// Environment variable: `PILOT_CONTROLLER_CMD`
    pub controller_cmd: Option<String>,

    /// Controller subprocess arguments (whitespace-separated in the env var)
    /// Environment variable: `PILOT_CONTROLLER_ARGS`
    pub controller_args: Vec<String>,

    /// Tool names that bypass the permission handshake (comma-separated)
    /// Environment variable: `PILOT_AUTO_APPROVED_TOOLS`
    pub auto_approved_tools: Vec<String>,

    /// Default model for plan mode, `"<provider>/<modelId>"`
    /// Environment variable: `PILOT_PLAN_MODEL`
    pub plan_model: Option<ModelId>,

    /// Default model for act mode, `"<provider>/<modelId>"`
    /// Environment variable: `PILOT_ACT_MODEL`
    pub act_model: Option<ModelId>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            controller_cmd: None,
            controller_args: Vec::new(),
            auto_approved_tools: default_auto_approved(),
            plan_model: None,
            act_model: None,
        }
    }
}

impl AgentConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let controller_args = std::env::var("PILOT_CONTROLLER_ARGS")
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default();

        let auto_approved_tools = std::env::var("PILOT_AUTO_APPROVED_TOOLS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(|_| default_auto_approved());

        Self {
            controller_cmd: std::env::var("PILOT_CONTROLLER_CMD").ok(),
            controller_args,
            auto_approved_tools,
            plan_model: parse_model_env("PILOT_PLAN_MODEL"),
            act_model: parse_model_env("PILOT_ACT_MODEL"),
        }
    }

    /// Default model for the given mode, when configured
    pub fn default_model_for(&self, mode: SessionMode) -> Option<ModelId> {
        match mode {
            SessionMode::Plan => self.plan_model.clone(),
            SessionMode::Act => self.act_model.clone(),
        }
    }
}

fn parse_model_env(var: &str) -> Option<ModelId> {
    let raw = std::env::var(var).ok()?;
    match raw.parse::<ModelId>() {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!("Ignoring {var}: {e}");
            None
        }
    }
}
