//! The phase-driven install/upgrade operation FSM, and the
//! installer/joiner agent-registration protocol (§4.F). Grounded in
//! `nimbus-store::operation` for persistence and in
//! `nimbus_ore::retry` for the bounded-retry policy the FSM applies to
//! connection-flavored phase failures.

pub mod error;
pub mod fsm;
pub mod join;
pub mod phase;

pub use error::InstallError;
pub use fsm::InstallDriver;
pub use join::{heartbeat_loop, InMemoryJoinController, JoinController, JoinDecision};
pub use phase::{Phase, PhaseId, PhasePlan, PhaseTarget};
