//! In-memory transport and audio source for driving a session in tests.

use crate::audio::AudioSource;
use crate::error::{ClientError, ClientResult};
use crate::signer::HandshakeHeaders;
use crate::transport::{TransportConnector, TransportEvent, TransportEvents, TransportSink};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// A frame the client wrote to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Test-side handle on an in-memory connection.
#[derive(Clone)]
pub struct MockTransport {
    frames: Arc<Mutex<Vec<SentFrame>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    fail_sends: Arc<AtomicBool>,
}

struct MockSink {
    frames: Arc<Mutex<Vec<SentFrame>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    fail_sends: Arc<AtomicBool>,
    closed: bool,
}

impl MockTransport {
    pub fn new() -> (Self, Box<dyn TransportSink>, TransportEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            frames: Arc::new(Mutex::new(Vec::new())),
            events: tx,
            fail_sends: Arc::new(AtomicBool::new(false)),
        };
        let sink = MockSink {
            frames: transport.frames.clone(),
            events: transport.events.clone(),
            fail_sends: transport.fail_sends.clone(),
            closed: false,
        };
        (transport, Box::new(sink), UnboundedReceiverStream::new(rx).boxed())
    }

    /// Deliver a text frame as if the server sent it.
    pub fn push_text(&self, text: &str) {
        self.push(TransportEvent::Text(text.to_string()));
    }

    pub fn push(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<SentFrame> {
        self.frames.lock().unwrap().clone()
    }

    /// Every text frame, parsed as JSON.
    pub fn sent_messages(&self) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                SentFrame::Text(text) => Some(serde_json::from_str(&text).unwrap()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent_messages()
            .iter()
            .map(|msg| msg["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn sent_audio(&self) -> Vec<Vec<u8>> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                SentFrame::Binary(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.frames().contains(&SentFrame::Close)
    }

    /// Poll until `check` holds for the recorded frames; panics after two seconds.
    pub async fn wait_for(&self, check: impl Fn(&MockTransport) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !check(self) {
            if tokio::time::Instant::now() > deadline {
                panic!("condition not met, frames: {:?}", self.frames());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl TransportSink for MockSink {
    async fn send_text(&mut self, text: String) -> ClientResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ClientError::SendFailed("mock transport refused frame".to_string()));
        }
        self.frames.lock().unwrap().push(SentFrame::Text(text));
        Ok(())
    }

    async fn send_binary(&mut self, data: Vec<u8>) -> ClientResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ClientError::SendFailed("mock transport refused frame".to_string()));
        }
        self.frames.lock().unwrap().push(SentFrame::Binary(data));
        Ok(())
    }

    /// Behaves like a peer completing the closing handshake.
    async fn close(&mut self) -> ClientResult<()> {
        if !self.closed {
            self.closed = true;
            self.frames.lock().unwrap().push(SentFrame::Close);
            let _ = self.events.send(TransportEvent::Closed {
                code: Some(1000),
                reason: String::new(),
            });
        }
        Ok(())
    }
}

/// Hands out one prepared connection and records the handshake headers.
pub struct MockConnector {
    connection: Mutex<Option<(Box<dyn TransportSink>, TransportEvents)>>,
    pub headers: Mutex<Option<HandshakeHeaders>>,
}

impl MockConnector {
    pub fn new() -> (Self, MockTransport) {
        let (transport, sink, events) = MockTransport::new();
        let connector = Self {
            connection: Mutex::new(Some((sink, events))),
            headers: Mutex::new(None),
        };
        (connector, transport)
    }

    /// A connector whose server is unreachable.
    pub fn unreachable() -> Self {
        Self {
            connection: Mutex::new(None),
            headers: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(
        &self,
        uri: &str,
        headers: &HandshakeHeaders,
    ) -> ClientResult<(Box<dyn TransportSink>, TransportEvents)> {
        *self.headers.lock().unwrap() = Some(headers.clone());
        self.connection
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ClientError::Connect(format!("{}: connection refused", uri)))
    }
}

/// Audio source that only emits what the test pushes.
pub struct MockAudioSource {
    handle: MockAudioHandle,
}

#[derive(Clone, Default)]
pub struct MockAudioHandle {
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    sender: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
}

impl MockAudioSource {
    pub fn new() -> (Self, MockAudioHandle) {
        let handle = MockAudioHandle::default();
        (Self { handle: handle.clone() }, handle)
    }
}

impl AudioSource for MockAudioSource {
    fn start_capturing(&mut self, _sample_rate_hz: u32, chunks: mpsc::Sender<Vec<u8>>) -> ClientResult<()> {
        self.handle.starts.fetch_add(1, Ordering::SeqCst);
        *self.handle.sender.lock().unwrap() = Some(chunks);
        Ok(())
    }

    fn stop(&mut self) {
        self.handle.stops.fetch_add(1, Ordering::SeqCst);
        self.handle.sender.lock().unwrap().take();
    }
}

impl MockAudioHandle {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Emit a chunk if capture is running. Returns whether it was accepted.
    pub async fn push(&self, chunk: Vec<u8>) -> bool {
        let sender = self.sender.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(chunk).await.is_ok(),
            None => false,
        }
    }
}
