//! # Error Handling
//!
//! This module defines the error types produced by the AudioHook client and
//! how they map onto the protocol's failure semantics.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> Type
//! - **Purpose**: Every fallible operation returns `Result`, nothing panics
//! - **ClientResult<T>**: Shorthand for `Result<T, ClientError>`
//!
//! ### Enums for Error Types
//! - **Variants**: Each enum variant represents a different kind of failure
//! - **thiserror**: Derives `Display` and `std::error::Error` from the
//!   `#[error(...)]` attributes instead of a hand-written `fmt` impl
//!
//! ## Error Categories:
//! - **DecodeError**: An inbound control message could not be understood.
//!   Always recoverable: the reactor logs it and discards the frame.
//! - **ClientError**: Everything surfaced to a caller of the client API
//!   (connect, audio sends, pause/resume/update/close requests).

use crate::session::Phase;
use std::time::Duration;
use thiserror::Error;

/// Reasons an inbound text frame was rejected by the codec.
///
/// None of these are fatal to the session. The frame is dropped with a
/// warning and the lifecycle phase stays where it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The `type` discriminator is absent, not a string, or blank
    #[error("message has no type field")]
    MissingType,

    /// The `type` discriminator names a message this client does not know
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Not a JSON object, or a known field carried the wrong JSON type
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Errors surfaced by the session client.
///
/// ## Propagation policy:
/// - Handshake and transport-establishment failures (`CryptoUnavailable`,
///   `Connect`, `Config`) abort `connect`.
/// - `SendFailed` is reported to the caller of the send; the session phase
///   is left unchanged so the caller may retry.
/// - `SessionNotStreaming` means the session is not in a phase that accepts
///   the request. Callers decide whether to buffer or drop.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HMAC primitive could not be keyed, so no handshake signature exists
    #[error("keyed hash unavailable: {0}")]
    CryptoUnavailable(String),

    /// The transport could not be established
    #[error("connect failed: {0}")]
    Connect(String),

    /// A frame could not be written to the transport
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Audio or a lifecycle request was rejected in the current phase
    #[error("session is not streaming (phase: {0})")]
    SessionNotStreaming(Phase),

    /// The server did not answer `open` with `opened` in time
    #[error("session was not opened within {0:?}")]
    OpenTimeout(Duration),

    /// A control message could not be serialized
    #[error("encode error: {0}")]
    Encode(String),

    /// Configuration or header values are unusable
    #[error("configuration error: {0}")]
    Config(String),

    /// The audio source failed to produce audio
    #[error("audio source error: {0}")]
    Audio(String),
}

/// Serialization failures only happen while encoding outbound messages.
impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Encode(err.to_string())
    }
}

/// Configuration loading can fail for various reasons (missing files,
/// invalid syntax, a value of the wrong type in an environment variable).
impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

/// I/O in this crate is limited to reading audio files.
impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Audio(err.to_string())
    }
}

/// Type alias for Results that use the client error type.
///
/// ## Usage Example:
/// ```rust,ignore
/// fn request_pause(&self) -> ClientResult<()> {
///     // equivalent to Result<(), ClientError>
/// }
/// ```
pub type ClientResult<T> = Result<T, ClientError>;
