//! Session lifecycle and event routing

mod emitter;
mod manager;
mod session;

pub use emitter::{OutboundEvent, SessionEventEmitter, SubscriptionToken};
pub use manager::SessionManager;
pub use session::{Session, TurnGuard, TurnPhase};
