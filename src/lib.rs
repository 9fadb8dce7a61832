//! Pilot ACP bridge
//!
//! An ACP (Agent Client Protocol) session bridge that exposes a stateful,
//! long-running coding-assistant controller to any ACP client. The bridge
//! owns concurrent sessions, translates the controller's event stream into
//! typed protocol updates, gates side-effecting tool calls behind a
//! permission handshake, and handles cancellation across in-flight turns.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use pilot_acp::{Cli, run_with_cli};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cli = Cli::parse();
//!     run_with_cli(&cli).await
//! }
//! ```
//!
//! ## Environment Variables
//!
//! - `PILOT_CONTROLLER_CMD`: controller command spawned for prompt turns
//! - `PILOT_CONTROLLER_ARGS`: whitespace-separated controller arguments
//! - `PILOT_AUTO_APPROVED_TOOLS`: comma-separated tool names that skip the
//!   permission handshake
//! - `PILOT_PLAN_MODEL` / `PILOT_ACT_MODEL`: default model per mode, as
//!   `"<provider>/<modelId>"`
//! - `RUST_LOG`: log filter, takes priority over `-v`/`-q`

pub mod agent;
pub mod cli;
pub mod controller;
pub mod history;
pub mod permission;
pub mod session;
pub mod translate;
pub mod types;

pub use agent::{Authenticator, NoAuth, PilotAcpAgent, run_with_cli, serve};
pub use cli::Cli;
pub use controller::{Controller, ControllerEvent, ProcessController};
pub use history::{HistoryStore, MemoryHistoryStore};
pub use session::SessionManager;
pub use types::{AgentConfig, AgentError, ModelId, Result, SessionMode};
