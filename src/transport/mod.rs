//! # Transport Abstraction
//!
//! The session client talks to the network only through these traits:
//! an outbound [`TransportSink`] for text and binary frames, and an inbound
//! stream of [`TransportEvent`]s delivered in arrival order.
//!
//! ## Implementations:
//! - **ws**: WebSocket over `tokio-tungstenite`
//! - Tests use an in-memory transport that records every frame

use crate::error::ClientResult;
use crate::signer::HandshakeHeaders;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub mod ws;

pub use ws::WsConnector;

/// Something the peer sent us, or the end of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Binary(Vec<u8>),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// Inbound events, in the order the peer sent them.
pub type TransportEvents = BoxStream<'static, TransportEvent>;

/// Outbound half of a connection.
///
/// Failures are reported as `ClientError::SendFailed`.
#[async_trait]
pub trait TransportSink: Send {
    async fn send_text(&mut self, text: String) -> ClientResult<()>;

    /// Ownership of the buffer moves into the transport.
    async fn send_binary(&mut self, data: Vec<u8>) -> ClientResult<()>;

    /// Start the closing handshake. Closing an already closed sink is not an error.
    async fn close(&mut self) -> ClientResult<()>;
}

/// Opens a connection with the signed handshake headers.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        uri: &str,
        headers: &HandshakeHeaders,
    ) -> ClientResult<(Box<dyn TransportSink>, TransportEvents)>;
}
