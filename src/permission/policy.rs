//! Consent policy
//!
//! Decides which tool calls can run without asking the client. The default
//! policy keys off tool name alone; anything richer (path-based rules, input
//! inspection) plugs in behind the same trait.

use std::collections::HashSet;

use agent_client_protocol as acp;

/// Decides whether a tool call needs an interactive permission prompt
pub trait PermissionPolicy: Send + Sync {
    /// Whether the client must be asked before this tool call runs
    fn requires_consent(&self, tool_name: &str, input: &serde_json::Value) -> bool;
}

/// Policy that auto-approves an allowlist of tool names
#[derive(Debug, Clone)]
pub struct ToolNamePolicy {
    auto_approved: HashSet<String>,
}

impl ToolNamePolicy {
    pub fn new(auto_approved: impl IntoIterator<Item = String>) -> Self {
        Self {
            auto_approved: auto_approved.into_iter().collect(),
        }
    }
}

impl PermissionPolicy for ToolNamePolicy {
    fn requires_consent(&self, tool_name: &str, _input: &serde_json::Value) -> bool {
        !self.auto_approved.contains(tool_name)
    }
}

/// The option set offered with every permission prompt
pub fn permission_options() -> Vec<acp::PermissionOption> {
    vec![
        acp::PermissionOption::new(
            acp::PermissionOptionId::new("allow-once".to_string()),
            "Allow once".to_string(),
            acp::PermissionOptionKind::AllowOnce,
        ),
        acp::PermissionOption::new(
            acp::PermissionOptionId::new("allow-always".to_string()),
            "Allow always".to_string(),
            acp::PermissionOptionKind::AllowAlways,
        ),
        acp::PermissionOption::new(
            acp::PermissionOptionId::new("reject-once".to_string()),
            "Reject".to_string(),
            acp::PermissionOptionKind::RejectOnce,
        ),
    ]
}
