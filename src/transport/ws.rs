//! WebSocket transport over `tokio-tungstenite`.
//!
//! ## Frame mapping:
//! - **Text** frames carry JSON control messages
//! - **Binary** frames carry raw audio
//! - **Ping/Pong** are answered by tungstenite and never surface
//! - **Close** ends the event stream

use crate::error::{ClientError, ClientResult};
use crate::signer::HandshakeHeaders;
use crate::transport::{TransportConnector, TransportEvent, TransportEvents, TransportSink};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{future, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, Request};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a `ws://` endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

/// Build the upgrade request with every handshake header attached.
pub fn build_request(uri: &str, headers: &HandshakeHeaders) -> ClientResult<Request<()>> {
    let mut request = uri
        .into_client_request()
        .map_err(|e| ClientError::Config(format!("invalid server uri {}: {}", uri, e)))?;

    for (name, value) in headers.iter() {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::Config(format!("invalid header name {}: {}", name, e)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::Config(format!("invalid value for header {}: {}", name, e)))?;
        request.headers_mut().insert(header_name, header_value);
    }

    Ok(request)
}

#[async_trait]
impl TransportConnector for WsConnector {
    async fn connect(
        &self,
        uri: &str,
        headers: &HandshakeHeaders,
    ) -> ClientResult<(Box<dyn TransportSink>, TransportEvents)> {
        let request = build_request(uri, headers)?;

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| ClientError::Connect(format!("{}: {}", uri, e)))?;
        info!(uri = %uri, status = %response.status(), "WebSocket connected");

        let (write, read) = stream.split();
        let events = read
            .filter_map(|msg| future::ready(map_message(msg)))
            .boxed();

        Ok((Box::new(WsSink { inner: write }), events))
    }
}

fn map_message(msg: Result<Message, tungstenite::Error>) -> Option<TransportEvent> {
    match msg {
        Ok(Message::Text(text)) => Some(TransportEvent::Text(text)),
        Ok(Message::Binary(data)) => Some(TransportEvent::Binary(data)),
        Ok(Message::Close(frame)) => Some(match frame {
            Some(frame) => TransportEvent::Closed {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.into_owned(),
            },
            None => TransportEvent::Closed {
                code: None,
                reason: String::new(),
            },
        }),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
        Err(err) => Some(TransportEvent::Error(err.to_string())),
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send_text(&mut self, text: String) -> ClientResult<()> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| ClientError::SendFailed(e.to_string()))
    }

    async fn send_binary(&mut self, data: Vec<u8>) -> ClientResult<()> {
        self.inner
            .send(Message::Binary(data))
            .await
            .map_err(|e| ClientError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> ClientResult<()> {
        match self.inner.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                debug!("WebSocket already closed");
                Ok(())
            }
            Err(err) => Err(ClientError::SendFailed(err.to_string())),
        }
    }
}
