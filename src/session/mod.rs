//! # Session Management
//!
//! The protocol state machine and the open gate that audio senders wait on.
//!
//! ## Key Components:
//! - **SessionState**: Phase, sequence counters and the reply/effect for each trigger
//! - **OpenGate**: One-shot signal released when the server sends `opened`

pub mod gate;
pub mod state;

pub use gate::{GateState, OpenGate};
pub use state::{Effect, Phase, Reaction, SessionIdentity, SessionState};
