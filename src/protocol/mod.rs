//! # AudioHook Control Protocol
//!
//! Message types and the JSON codec for the text side of the connection.
//! Audio travels separately as raw binary frames and never passes through
//! this module.

pub mod codec;
pub mod message;

pub use codec::{decode, encode};
pub use message::{ControlMessage, MessageHeader, MessageType, OpenParameters};
