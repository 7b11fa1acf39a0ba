//! # AudioHook Client
//!
//! Streams live audio to an AudioHook server over a WebSocket and follows
//! the session protocol the server drives: `open`/`opened`, pause and
//! resume, sideband updates, and an orderly `close`/`closed`.
//!
//! ## Module Layout:
//! - **signer**: HMAC-signed handshake headers
//! - **protocol**: Control message types and their JSON codec
//! - **session**: Lifecycle state machine and the open gate
//! - **transport**: Connection traits and the WebSocket implementation
//! - **audio**: Audio sources that feed the session
//! - **client**: Ties everything together into a running session
//! - **config**, **error**, **stats**: Ambient support

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod signer;
pub mod stats;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{SessionClient, SessionOptions};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, DecodeError};
pub use session::Phase;
