//! Permission handshake
//!
//! Tool calls the policy does not auto-approve are suspended until the client
//! answers a permission prompt; the arbiter tracks those outstanding prompts.

mod arbiter;
mod policy;

pub use arbiter::{PermissionArbiter, PermissionDecision};
pub use policy::{PermissionPolicy, ToolNamePolicy, permission_options};
