//! Shared types for the ACP session bridge

mod config;
mod error;
mod model;

pub use config::AgentConfig;
pub use error::{AgentError, ErrorCode, Result};
pub use model::{ModelId, SessionMode};
