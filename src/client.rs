//! # Session Client
//!
//! Runs one AudioHook session over a connected transport. The client sends
//! the signed handshake and the initial `open`, then two tasks share the
//! session:
//!
//! - **Reactor**: reads inbound frames one at a time, feeds them through the
//!   codec into [`SessionState`], and carries out the resulting reaction
//!   (capture changes first, then the reply).
//! - **Audio pump**: forwards chunks from the attached [`AudioSource`] as
//!   binary frames, but only after the server has sent `opened` and only
//!   while the session is open.
//!
//! ## Key Rust Concepts Used:
//! - **Arc<Shared>**: Both tasks and the public handle own the same session
//! - **tokio::sync::Mutex**: The state lock is held across the `.await` that
//!   writes a reply, so replies leave in the order their triggers arrived
//! - **watch channels**: The current phase is published for readers that
//!   must not contend for the state lock
//!
//! ## Lock order:
//! state → capture → sink. The phase is published while the state lock is
//! held and before the sink is taken, so no audio frame can follow `close`.

use crate::audio::AudioSource;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::message::{MediaFormat, Participant};
use crate::protocol::{codec, ControlMessage, OpenParameters};
use crate::session::{Effect, GateState, OpenGate, Phase, Reaction, SessionIdentity, SessionState};
use crate::signer::HandshakeHeaders;
use crate::stats::{SessionStats, StatsSnapshot};
use crate::transport::{TransportConnector, TransportEvent, TransportEvents, TransportSink};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Chunks buffered between the audio source and the pump.
const AUDIO_CHANNEL_CAPACITY: usize = 64;

/// Everything a session needs once the transport is connected.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub identity: SessionIdentity,
    pub protocol_version: String,
    pub open_parameters: OpenParameters,
    /// Rate the audio source is started at
    pub sample_rate: u32,
    /// `None` waits for `opened` indefinitely
    pub open_timeout: Option<Duration>,
    pub close_ack_timeout: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            identity: SessionIdentity {
                session_id: config.session.session_id.clone(),
                participant_id: config.session.participant_id.clone(),
            },
            protocol_version: config.session.protocol_version.clone(),
            open_parameters: OpenParameters {
                organization_id: config.auth.organization_id.clone(),
                conversation_id: config.auth.correlation_id.clone(),
                participant: Participant {
                    id: config.session.participant_id.clone(),
                },
                media: vec![MediaFormat {
                    kind: "audio".to_string(),
                    format: config.audio.format.clone(),
                    channels: vec!["external".to_string()],
                    rate: config.audio.sample_rate,
                }],
            },
            sample_rate: config.audio.sample_rate,
            open_timeout: config.session.open_timeout(),
            close_ack_timeout: config.session.close_ack_timeout(),
        }
    }
}

/// The attached audio source plus whether it is currently producing.
struct Capture {
    source: Box<dyn AudioSource>,
    sample_rate: u32,
    chunks: mpsc::Sender<Vec<u8>>,
    running: bool,
}

impl Capture {
    fn start(&mut self) -> ClientResult<()> {
        if !self.running {
            self.source.start_capturing(self.sample_rate, self.chunks.clone())?;
            self.running = true;
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.source.stop();
            self.running = false;
        }
    }
}

struct Shared {
    identity: SessionIdentity,
    state: Mutex<SessionState>,
    capture: Mutex<Option<Capture>>,
    sink: Mutex<Box<dyn TransportSink>>,
    phase: watch::Sender<Phase>,
    gate: OpenGate,
    stats: SessionStats,
    sample_rate: u32,
    open_timeout: Option<Duration>,
    close_ack_timeout: Duration,
}

impl Shared {
    fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    fn publish(&self, phase: Phase) {
        self.phase.send_if_modified(|current| {
            if *current != phase {
                *current = phase;
                true
            } else {
                false
            }
        });
    }

    /// Carry out a reaction. The caller holds the state lock.
    async fn apply(&self, state: &SessionState, reaction: Reaction) -> ClientResult<()> {
        self.publish(state.phase());

        for effect in &reaction.effects {
            match effect {
                Effect::ReleaseGate => {
                    if self.gate.release() {
                        info!(session_id = %self.identity.session_id, "Session opened, audio may flow");
                    }
                }
                Effect::AbandonGate => {
                    self.gate.abandon();
                }
                Effect::StopCapture => {
                    if let Some(capture) = self.capture.lock().await.as_mut() {
                        capture.stop();
                    }
                }
                Effect::StartCapture => {
                    if let Some(capture) = self.capture.lock().await.as_mut() {
                        if let Err(err) = capture.start() {
                            error!(error = %err, "Failed to restart audio capture");
                        }
                    }
                }
                // Deferred until the reply is out
                Effect::CloseTransport => {}
            }
        }

        let result = match &reaction.reply {
            Some(reply) => self.send_control(reply).await,
            None => Ok(()),
        };

        if reaction.has(Effect::CloseTransport) {
            self.close_transport().await;
        }
        if state.phase() == Phase::Closed {
            self.release_capture().await;
        }
        result
    }

    async fn send_control(&self, msg: &ControlMessage) -> ClientResult<()> {
        let text = codec::encode(msg)?;
        let header = msg.header();

        let result = self.sink.lock().await.send_text(text).await;
        match &result {
            Ok(()) => {
                self.stats.record_control_sent();
                info!(
                    message_type = %msg.message_type(),
                    seq = ?header.seq,
                    serverseq = ?header.serverseq,
                    "Sent control message"
                );
            }
            Err(err) => {
                self.stats.record_send_failure();
                error!(message_type = %msg.message_type(), error = %err, "Failed to send control message");
            }
        }
        result
    }

    async fn send_audio(&self, chunk: Vec<u8>) -> ClientResult<()> {
        match self.gate.wait_timeout(self.open_timeout).await {
            GateState::Released => {}
            GateState::Abandoned => return Err(ClientError::SessionNotStreaming(self.phase())),
            GateState::Pending => {
                return Err(ClientError::OpenTimeout(self.open_timeout.unwrap_or_default()))
            }
        }

        let mut sink = self.sink.lock().await;
        // Checked with the sink held: a close published after this point waits for us
        let phase = self.phase();
        if phase != Phase::Open {
            return Err(ClientError::SessionNotStreaming(phase));
        }

        let bytes = chunk.len();
        match sink.send_binary(chunk).await {
            Ok(()) => {
                self.stats.record_audio(bytes);
                Ok(())
            }
            Err(err) => {
                self.stats.record_send_failure();
                Err(err)
            }
        }
    }

    /// Run a local request against the state machine and carry out the result.
    async fn request<F>(&self, f: F) -> ClientResult<()>
    where
        F: FnOnce(&mut SessionState) -> ClientResult<Reaction>,
    {
        let mut state = self.state.lock().await;
        let reaction = f(&mut *state)?;
        let request = reaction.reply.clone();

        let result = self.apply(&state, reaction).await;
        if let (Err(ClientError::SendFailed(_)), Some(msg)) = (&result, request) {
            state.record_undelivered(msg);
        }
        result
    }

    async fn on_text(&self, text: &str) {
        debug!(raw = %text, "Received control message");
        self.stats.record_control_received();

        let msg = match codec::decode(text) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = %err, raw = %text, "Discarding undecodable control message");
                self.stats.record_discarded();
                return;
            }
        };

        let mut state = self.state.lock().await;
        let reaction = state.on_message(&msg);
        if let Err(err) = self.apply(&state, reaction).await {
            error!(message_type = %msg.message_type(), error = %err, "Failed to answer server message");
        }
    }

    async fn on_transport_closed(&self) {
        let mut state = self.state.lock().await;
        let reaction = state.on_transport_closed();
        // Nothing is sent in reaction to a lost transport
        let _ = self.apply(&state, reaction).await;
    }

    async fn close_transport(&self) {
        if let Err(err) = self.sink.lock().await.close().await {
            warn!(error = %err, "Error while closing transport");
        }
    }

    /// Drop the audio source; the pump ends once its channel drains.
    async fn release_capture(&self) {
        if let Some(mut capture) = self.capture.lock().await.take() {
            capture.stop();
        }
    }
}

/// Handle on a running session.
///
/// Dropping the handle aborts the reactor and the audio pump.
pub struct SessionClient {
    shared: Arc<Shared>,
    reactor: JoinHandle<()>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionClient {
    /// Sign the handshake, open the transport and send `open`.
    pub async fn connect(config: &ClientConfig, connector: &dyn TransportConnector) -> ClientResult<Self> {
        let headers = HandshakeHeaders::from_config(config)?;
        info!(
            uri = %config.server.uri,
            session_id = %config.session.session_id,
            "Connecting to AudioHook server"
        );

        let (sink, events) = connector.connect(&config.server.uri, &headers).await?;
        Self::start(SessionOptions::from_config(config), sink, events).await
    }

    /// Start a session on an already connected transport.
    pub async fn start(options: SessionOptions, sink: Box<dyn TransportSink>, events: TransportEvents) -> ClientResult<Self> {
        let mut state = SessionState::new(options.identity.clone(), options.protocol_version);
        let open = state.begin_open(options.open_parameters);
        let (phase, _) = watch::channel(state.phase());

        let shared = Arc::new(Shared {
            identity: options.identity,
            state: Mutex::new(state),
            capture: Mutex::new(None),
            sink: Mutex::new(sink),
            phase,
            gate: OpenGate::new(),
            stats: SessionStats::default(),
            sample_rate: options.sample_rate,
            open_timeout: options.open_timeout,
            close_ack_timeout: options.close_ack_timeout,
        });

        // `open` must precede anything the reactor could send
        if let Err(err) = shared.send_control(&open).await {
            shared.close_transport().await;
            return Err(err);
        }

        let reactor = tokio::spawn(run_reactor(shared.clone(), events));
        Ok(Self {
            shared,
            reactor,
            pump: Mutex::new(None),
        })
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.shared.identity
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Send one audio chunk as a binary frame.
    ///
    /// Waits for `opened` first. Fails with `SessionNotStreaming` when the
    /// session is not open, and with `OpenTimeout` when `opened` does not
    /// arrive within the configured bound.
    pub async fn send_audio(&self, chunk: Vec<u8>) -> ClientResult<()> {
        self.shared.send_audio(chunk).await
    }

    /// Attach an audio source and start pumping its chunks.
    ///
    /// The source starts right away unless the session is paused, in which
    /// case it starts on resume. Chunks produced while the session cannot
    /// stream are dropped and counted.
    pub async fn attach_audio(&self, source: Box<dyn AudioSource>) -> ClientResult<()> {
        let (tx, mut rx) = mpsc::channel(AUDIO_CHANNEL_CAPACITY);

        {
            let state = self.shared.state.lock().await;
            let phase = state.phase();
            if matches!(phase, Phase::Closing | Phase::Closed) {
                return Err(ClientError::SessionNotStreaming(phase));
            }

            let mut capture = Capture {
                source,
                sample_rate: self.shared.sample_rate,
                chunks: tx,
                running: false,
            };
            if phase != Phase::Paused {
                capture.start()?;
            }
            if let Some(mut previous) = self.shared.capture.lock().await.replace(capture) {
                previous.stop();
            }
        }

        let shared = self.shared.clone();
        let pump = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                match shared.send_audio(chunk).await {
                    Ok(()) => {}
                    Err(ClientError::SessionNotStreaming(phase)) => {
                        shared.stats.record_dropped_chunk();
                        debug!(phase = %phase, "Dropping audio chunk");
                    }
                    Err(err) => {
                        shared.stats.record_dropped_chunk();
                        warn!(error = %err, "Dropping audio chunk");
                    }
                }
            }
            debug!("Audio pump stopped");
        });

        if let Some(previous) = self.pump.lock().await.replace(pump) {
            previous.abort();
        }
        Ok(())
    }

    /// Ask the server to pause. Capture stops before the request is sent.
    pub async fn request_pause(&self) -> ClientResult<()> {
        self.shared.request(|state| state.request_pause()).await
    }

    pub async fn request_resume(&self) -> ClientResult<()> {
        self.shared.request(|state| state.request_resume()).await
    }

    pub async fn request_update(&self, parameters: Option<Map<String, Value>>) -> ClientResult<()> {
        self.shared.request(move |state| state.request_update(parameters)).await
    }

    /// End the session.
    ///
    /// Sends `close`, waits up to the configured bound for the server's
    /// `closed`, then closes the transport. The session is `Closed` when
    /// this returns, even if the server never acknowledged.
    pub async fn request_close(&self) -> ClientResult<()> {
        let mut phase_rx = self.shared.phase.subscribe();

        let sent = self.shared.request(|state| state.request_close("end")).await;
        if let Err(ClientError::SessionNotStreaming(_)) = sent {
            return sent;
        }

        if sent.is_ok() {
            let acked = tokio::time::timeout(
                self.shared.close_ack_timeout,
                phase_rx.wait_for(|phase| *phase == Phase::Closed),
            )
            .await
            .is_ok();
            if !acked {
                warn!(
                    timeout = ?self.shared.close_ack_timeout,
                    "Server did not acknowledge close, closing transport"
                );
            }
        }

        self.shared.close_transport().await;
        self.shared.on_transport_closed().await;
        sent
    }

    /// Resolves once the session reaches `Closed`.
    pub async fn wait_closed(&self) {
        let mut phase_rx = self.shared.phase.subscribe();
        let _ = phase_rx.wait_for(|phase| *phase == Phase::Closed).await;
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.reactor.abort();
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

/// Process inbound events until the transport goes away or the session closes.
async fn run_reactor(shared: Arc<Shared>, mut events: TransportEvents) {
    while let Some(event) = events.next().await {
        match event {
            TransportEvent::Text(text) => shared.on_text(&text).await,
            TransportEvent::Binary(data) => {
                debug!(bytes = data.len(), "Ignoring binary frame from server");
            }
            TransportEvent::Closed { code, reason } => {
                info!(code = ?code, reason = %reason, "Transport closed by peer");
                break;
            }
            TransportEvent::Error(err) => {
                error!(error = %err, "Transport error");
                break;
            }
        }

        if shared.phase() == Phase::Closed {
            break;
        }
    }

    shared.on_transport_closed().await;
    info!(session_id = %shared.identity.session_id, stats = ?shared.stats.snapshot(), "Session ended");
}
