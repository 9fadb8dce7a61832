//! Agent facade, turn driver, and transport wiring

mod auth;
mod core;
mod runner;
mod turn;

pub use auth::{Authenticator, NoAuth};
pub use runner::{run_with_cli, serve};
pub use self::core::{PilotAcpAgent, SetConfigOptionParams, SetModelParams};
