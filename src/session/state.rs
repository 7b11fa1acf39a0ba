//! # Session Protocol State Machine
//!
//! Tracks the lifecycle phase and sequence counters of one AudioHook
//! session and decides, for every trigger, which reply to send and which
//! side effects the owner must apply. It performs no I/O: the client owns
//! the transport and the capture device and carries out the returned
//! [`Reaction`].
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: Handshake sent, waiting for `opened`
//! 2. **Open**: Audio flows
//! 3. **Paused**: Audio stopped at the server's or the user's request
//! 4. **Closing**: `close` sent or received, waiting for teardown
//! 5. **Closed**: Terminal, every further trigger is ignored
//!
//! ## Sequence numbers:
//! The client numbers every message it originates (`client_seq`) and
//! remembers the last `seq` it saw from the server (`server_seq`). A reply
//! to a server request takes its numbers from that request only:
//! `seq = request.clientseq + 1`, `serverseq = request.seq`.

use crate::error::{ClientError, ClientResult};
use crate::protocol::{ControlMessage, MessageHeader, MessageType, OpenParameters};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, info, warn};

/// Current lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Open,
    Paused,
    Closing,
    Closed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Connecting => "connecting",
            Phase::Open => "open",
            Phase::Paused => "paused",
            Phase::Closing => "closing",
            Phase::Closed => "closed",
        }
    }

    /// Capture may be running in these phases; stopping it is meaningful.
    fn capture_may_run(&self) -> bool {
        matches!(self, Phase::Connecting | Phase::Open)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable identity of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session_id: String,
    pub participant_id: String,
}

/// Side effects the owner of the state machine must carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Let audio through: `opened` arrived
    ReleaseGate,
    /// Wake audio waiters with a refusal: the session ended before opening
    AbandonGate,
    StopCapture,
    StartCapture,
    CloseTransport,
}

/// What one trigger produced.
///
/// Effects are applied before the reply is sent so capture stops before
/// the peer learns about a pause or close.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reaction {
    pub reply: Option<ControlMessage>,
    pub effects: Vec<Effect>,
}

impl Reaction {
    fn none() -> Self {
        Self::default()
    }

    fn reply(msg: ControlMessage) -> Self {
        Self {
            reply: Some(msg),
            effects: Vec::new(),
        }
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn has(&self, effect: Effect) -> bool {
        self.effects.contains(&effect)
    }
}

/// The authoritative protocol state for one session.
#[derive(Debug)]
pub struct SessionState {
    identity: SessionIdentity,
    version: String,
    phase: Phase,
    client_seq: u64,
    server_seq: Option<u64>,
    /// A locally originated request the transport refused; re-sent on retry
    undelivered: Option<ControlMessage>,
}

impl SessionState {
    /// A fresh session in `Connecting`.
    pub fn new(identity: SessionIdentity, version: impl Into<String>) -> Self {
        Self {
            identity,
            version: version.into(),
            phase: Phase::Connecting,
            client_seq: 0,
            server_seq: None,
            undelivered: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn client_seq(&self) -> u64 {
        self.client_seq
    }

    pub fn server_seq(&self) -> Option<u64> {
        self.server_seq
    }

    /// Build the initial `open`. Carries `seq = 1` and no `serverseq`
    /// since nothing has been heard from the server yet.
    pub fn begin_open(&mut self, parameters: OpenParameters) -> ControlMessage {
        let mut header = self.next_header();
        header.parameters = Some(parameters.into_map());
        info!(session_id = %self.identity.session_id, seq = ?header.seq, "Sending open");
        ControlMessage::Open(header)
    }

    /// React to a message received from the server.
    pub fn on_message(&mut self, msg: &ControlMessage) -> Reaction {
        let kind = msg.message_type();
        let header = msg.header();

        if self.phase == Phase::Closed {
            debug!(message_type = %kind, "Ignoring message on closed session");
            return Reaction::none();
        }

        if let Some(seq) = header.seq {
            self.server_seq = Some(seq);
        }

        match kind {
            MessageType::Opened => self.on_opened(),
            MessageType::Pause => self.on_pause(header),
            MessageType::Close => self.on_close(header),
            MessageType::Closed => self.on_closed(),
            MessageType::Paused | MessageType::Resumed => {
                // Acknowledges a local request; capture was already adjusted
                info!(message_type = %kind, phase = %self.phase, "Server acknowledged request");
                Reaction::none()
            }
            MessageType::Update => {
                info!(phase = %self.phase, "Received update from server");
                Reaction::none()
            }
            MessageType::Pong => {
                debug!("Received pong");
                Reaction::none()
            }
            MessageType::Open | MessageType::Resume => {
                warn!(message_type = %kind, "Unexpected client-side message from server");
                Reaction::none()
            }
        }
    }

    fn on_opened(&mut self) -> Reaction {
        if self.phase != Phase::Connecting {
            warn!(phase = %self.phase, "Duplicate opened ignored");
            return Reaction::none();
        }
        self.transition(Phase::Open);
        Reaction::none().with_effect(Effect::ReleaseGate)
    }

    fn on_pause(&mut self, request: &MessageHeader) -> Reaction {
        match self.phase {
            Phase::Open => {
                self.transition(Phase::Paused);
                let reply = self.paused_reply(request);
                Reaction::reply(reply).with_effect(Effect::StopCapture)
            }
            // Duplicate pause: acknowledge again, capture is already stopped
            Phase::Paused => Reaction::reply(self.paused_reply(request)),
            // Nothing is streaming yet, so acknowledging is all there is to do
            Phase::Connecting => {
                warn!(phase = %self.phase, "pause received before opened, acknowledging");
                Reaction::reply(self.paused_reply(request))
            }
            _ => {
                warn!(phase = %self.phase, "pause received out of phase, ignoring");
                Reaction::none()
            }
        }
    }

    fn on_close(&mut self, request: &MessageHeader) -> Reaction {
        let mut reaction = Reaction::none();
        if self.phase.capture_may_run() {
            reaction = reaction.with_effect(Effect::StopCapture);
        }
        if self.phase == Phase::Connecting {
            reaction = reaction.with_effect(Effect::AbandonGate);
        }
        self.transition(Phase::Closing);

        let header = self.reply_header(request);
        reaction.reply = Some(ControlMessage::Closed(header));
        reaction.with_effect(Effect::CloseTransport)
    }

    fn on_closed(&mut self) -> Reaction {
        if self.phase != Phase::Closing {
            warn!(phase = %self.phase, "closed received without a pending close, ignoring");
            return Reaction::none();
        }
        self.transition(Phase::Closed);
        Reaction::none().with_effect(Effect::CloseTransport)
    }

    /// The transport went away; nothing more can be exchanged.
    pub fn on_transport_closed(&mut self) -> Reaction {
        if self.phase == Phase::Closed {
            return Reaction::none();
        }
        let mut reaction = Reaction::none();
        if self.phase.capture_may_run() {
            reaction = reaction.with_effect(Effect::StopCapture);
        }
        self.transition(Phase::Closed);
        reaction.with_effect(Effect::AbandonGate)
    }

    /// User asked to pause. Only meaningful while audio is flowing; a
    /// repeated request while already paused is a no-op unless the earlier
    /// `pause` never reached the transport, in which case it is sent again.
    pub fn request_pause(&mut self) -> ClientResult<Reaction> {
        match self.phase {
            Phase::Open => {
                self.transition(Phase::Paused);
                let msg = ControlMessage::Pause(self.next_header());
                Ok(Reaction::reply(msg).with_effect(Effect::StopCapture))
            }
            Phase::Paused => match self.undelivered.take() {
                Some(msg) if msg.message_type() == MessageType::Pause => {
                    Ok(Reaction::reply(ControlMessage::Pause(self.next_header())))
                }
                other => {
                    self.undelivered = other;
                    Ok(Reaction::none())
                }
            },
            phase => Err(ClientError::SessionNotStreaming(phase)),
        }
    }

    /// User asked to resume.
    pub fn request_resume(&mut self) -> ClientResult<Reaction> {
        match self.phase {
            Phase::Open | Phase::Paused => {
                let was_paused = self.phase == Phase::Paused;
                self.transition(Phase::Open);
                let mut reaction = Reaction::reply(ControlMessage::Resume(self.next_header()));
                if was_paused {
                    reaction = reaction.with_effect(Effect::StartCapture);
                }
                Ok(reaction)
            }
            phase => Err(ClientError::SessionNotStreaming(phase)),
        }
    }

    /// Sideband notification; does not change the phase.
    pub fn request_update(&mut self, parameters: Option<Map<String, Value>>) -> ClientResult<Reaction> {
        match self.phase {
            Phase::Open | Phase::Paused => {
                let mut header = self.next_header();
                header.parameters = parameters;
                Ok(Reaction::reply(ControlMessage::Update(header)))
            }
            phase => Err(ClientError::SessionNotStreaming(phase)),
        }
    }

    /// User asked to end the session.
    pub fn request_close(&mut self, reason: &str) -> ClientResult<Reaction> {
        let phase = self.phase;
        if matches!(phase, Phase::Closing | Phase::Closed) {
            return Err(ClientError::SessionNotStreaming(phase));
        }

        let mut reaction = Reaction::none();
        if phase.capture_may_run() {
            reaction = reaction.with_effect(Effect::StopCapture);
        }
        if phase == Phase::Connecting {
            reaction = reaction.with_effect(Effect::AbandonGate);
        }
        self.transition(Phase::Closing);

        let mut header = self.next_header();
        let mut parameters = Map::new();
        parameters.insert("reason".to_string(), Value::String(reason.to_string()));
        header.parameters = Some(parameters);
        reaction.reply = Some(ControlMessage::Close(header));
        Ok(reaction)
    }

    /// The transport refused `msg`. Kept so a retry of the same request
    /// sends it again, with a fresh header, instead of treating the phase
    /// as already reached.
    pub fn record_undelivered(&mut self, msg: ControlMessage) {
        self.undelivered = Some(msg);
    }

    /// Header for a message the client originates.
    fn next_header(&mut self) -> MessageHeader {
        self.client_seq = self.client_seq.saturating_add(1);
        MessageHeader {
            id: uuid::Uuid::new_v4().to_string(),
            version: self.version.clone(),
            seq: Some(self.client_seq),
            clientseq: None,
            serverseq: self.server_seq,
            parameters: None,
        }
    }

    /// Header for a reply, numbered from the request being answered.
    fn reply_header(&mut self, request: &MessageHeader) -> MessageHeader {
        let seq = request.clientseq.unwrap_or(self.client_seq).saturating_add(1);
        // Keep later client-originated messages ahead of this reply
        self.client_seq = self.client_seq.max(seq);
        MessageHeader {
            id: request.id.clone(),
            version: request.version.clone(),
            seq: Some(seq),
            clientseq: None,
            serverseq: request.seq,
            parameters: None,
        }
    }

    fn paused_reply(&mut self, request: &MessageHeader) -> ControlMessage {
        ControlMessage::Paused {
            header: self.reply_header(request),
            position: String::new(),
        }
    }

    fn transition(&mut self, next: Phase) {
        if self.phase != next {
            info!(
                session_id = %self.identity.session_id,
                from = %self.phase,
                to = %next,
                "Session phase changed"
            );
            self.phase = next;
            self.undelivered = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;
    use crate::protocol::message::{MediaFormat, Participant};

    fn new_state() -> SessionState {
        SessionState::new(
            SessionIdentity {
                session_id: "demo-session-001".to_string(),
                participant_id: "user-123".to_string(),
            },
            "2",
        )
    }

    fn open_parameters() -> OpenParameters {
        OpenParameters {
            organization_id: "org".to_string(),
            conversation_id: "conv".to_string(),
            participant: Participant { id: "user-123".to_string() },
            media: vec![MediaFormat {
                kind: "audio".to_string(),
                format: "L16".to_string(),
                channels: vec!["external".to_string()],
                rate: 8000,
            }],
        }
    }

    fn opened_state() -> SessionState {
        let mut state = new_state();
        state.begin_open(open_parameters());
        state.on_message(&decode(r#"{"type":"opened","id":"X","version":"1","seq":1,"clientseq":1}"#).unwrap());
        state
    }

    #[test]
    fn test_begin_open() {
        let mut state = new_state();
        let msg = state.begin_open(open_parameters());
        let header = msg.header();
        assert_eq!(msg.message_type(), MessageType::Open);
        assert_eq!(header.seq, Some(1));
        assert_eq!(header.serverseq, None);
        assert_eq!(header.version, "2");
        assert!(header.parameters.is_some());
        assert_eq!(state.phase(), Phase::Connecting);
    }

    #[test]
    fn test_opened_releases_gate_once() {
        let mut state = new_state();
        state.begin_open(open_parameters());
        let reaction = state.on_message(&decode(r#"{"type":"opened","id":"X","version":"1"}"#).unwrap());
        assert_eq!(state.phase(), Phase::Open);
        assert!(reaction.has(Effect::ReleaseGate));
        assert!(reaction.reply.is_none());

        let again = state.on_message(&decode(r#"{"type":"opened"}"#).unwrap());
        assert_eq!(again, Reaction::default());
        assert_eq!(state.phase(), Phase::Open);
    }

    #[test]
    fn test_server_pause_replies_paused() {
        let mut state = opened_state();
        let reaction =
            state.on_message(&decode(r#"{"type":"pause","id":"A","clientseq":5,"seq":9,"version":"2"}"#).unwrap());

        assert_eq!(state.phase(), Phase::Paused);
        assert_eq!(reaction.effects, vec![Effect::StopCapture]);
        let reply = reaction.reply.unwrap();
        assert_eq!(
            reply,
            ControlMessage::Paused {
                header: MessageHeader {
                    id: "A".to_string(),
                    version: "2".to_string(),
                    seq: Some(6),
                    serverseq: Some(9),
                    ..MessageHeader::default()
                },
                position: String::new(),
            }
        );
        assert_eq!(state.server_seq(), Some(9));
    }

    #[test]
    fn test_repeated_pause_is_idempotent() {
        let mut state = opened_state();
        let pause = decode(r#"{"type":"pause","id":"A","clientseq":5,"seq":9,"version":"2"}"#).unwrap();
        state.on_message(&pause);

        let pause_again = decode(r#"{"type":"pause","id":"B","clientseq":6,"seq":10,"version":"2"}"#).unwrap();
        let reaction = state.on_message(&pause_again);
        assert_eq!(state.phase(), Phase::Paused);
        assert!(reaction.effects.is_empty(), "capture must not be stopped twice");
        let reply = reaction.reply.unwrap();
        assert_eq!(reply.message_type(), MessageType::Paused);
        assert_eq!(reply.header().seq, Some(7));
        assert_eq!(reply.header().serverseq, Some(10));
    }

    #[test]
    fn test_close_from_every_live_phase() {
        let setups: Vec<fn() -> SessionState> = vec![
            new_state,
            opened_state,
            || {
                let mut s = opened_state();
                s.request_pause().unwrap();
                s
            },
            || {
                let mut s = opened_state();
                s.request_close("end").unwrap();
                s
            },
        ];

        for setup in setups {
            let mut state = setup();
            let close = decode(r#"{"type":"close","id":"C","clientseq":11,"seq":20,"version":"2"}"#).unwrap();
            let reaction = state.on_message(&close);
            assert_eq!(state.phase(), Phase::Closing);
            assert!(reaction.has(Effect::CloseTransport));

            let reply = reaction.reply.expect("exactly one closed reply");
            assert_eq!(reply.message_type(), MessageType::Closed);
            assert_eq!(reply.header().id, "C");
            assert_eq!(reply.header().version, "2");
            assert_eq!(reply.header().seq, Some(12));
            assert_eq!(reply.header().serverseq, Some(20));
        }
    }

    #[test]
    fn test_close_stops_capture_only_when_running() {
        let mut open = opened_state();
        let reaction = open.on_message(&decode(r#"{"type":"close","clientseq":1,"seq":2}"#).unwrap());
        assert!(reaction.has(Effect::StopCapture));

        let mut paused = opened_state();
        paused.request_pause().unwrap();
        let reaction = paused.on_message(&decode(r#"{"type":"close","clientseq":1,"seq":2}"#).unwrap());
        assert!(!reaction.has(Effect::StopCapture));
    }

    #[test]
    fn test_close_before_opened_abandons_gate() {
        let mut state = new_state();
        let reaction = state.on_message(&decode(r#"{"type":"close","clientseq":1,"seq":1}"#).unwrap());
        assert!(reaction.has(Effect::AbandonGate));
    }

    #[test]
    fn test_closed_ack_completes_close() {
        let mut state = opened_state();
        state.request_close("end").unwrap();
        let reaction = state.on_message(&decode(r#"{"type":"closed","seq":3}"#).unwrap());
        assert_eq!(state.phase(), Phase::Closed);
        assert!(reaction.has(Effect::CloseTransport));

        // Terminal: nothing moves it
        let reaction = state.on_message(&decode(r#"{"type":"close","clientseq":1,"seq":4}"#).unwrap());
        assert_eq!(reaction, Reaction::default());
        assert_eq!(state.phase(), Phase::Closed);
    }

    #[test]
    fn test_unsolicited_closed_is_ignored() {
        let mut state = opened_state();
        let reaction = state.on_message(&decode(r#"{"type":"closed"}"#).unwrap());
        assert_eq!(reaction, Reaction::default());
        assert_eq!(state.phase(), Phase::Open);
    }

    #[test]
    fn test_local_pause_and_resume() {
        let mut state = opened_state();

        let reaction = state.request_pause().unwrap();
        assert_eq!(state.phase(), Phase::Paused);
        assert!(reaction.has(Effect::StopCapture));
        let pause = reaction.reply.unwrap();
        assert_eq!(pause.message_type(), MessageType::Pause);
        assert_eq!(pause.header().seq, Some(2));
        assert_eq!(pause.header().serverseq, Some(1));

        assert_eq!(state.request_pause().unwrap(), Reaction::default());

        let reaction = state.request_resume().unwrap();
        assert_eq!(state.phase(), Phase::Open);
        assert!(reaction.has(Effect::StartCapture));
        assert_eq!(reaction.reply.unwrap().header().seq, Some(3));

        // Resuming while open re-sends resume but does not restart capture
        let reaction = state.request_resume().unwrap();
        assert!(!reaction.has(Effect::StartCapture));
    }

    #[test]
    fn test_acknowledgements_do_not_change_phase() {
        let mut state = opened_state();
        state.request_pause().unwrap();
        state.on_message(&decode(r#"{"type":"paused","seq":2}"#).unwrap());
        assert_eq!(state.phase(), Phase::Paused);

        state.request_resume().unwrap();
        state.on_message(&decode(r#"{"type":"resumed","seq":3}"#).unwrap());
        assert_eq!(state.phase(), Phase::Open);
        assert_eq!(state.server_seq(), Some(3));
    }

    #[test]
    fn test_update_keeps_phase() {
        let mut state = opened_state();
        let mut params = Map::new();
        params.insert("language".to_string(), Value::String("en-US".to_string()));
        let reaction = state.request_update(Some(params.clone())).unwrap();
        let update = reaction.reply.unwrap();
        assert_eq!(update.message_type(), MessageType::Update);
        assert_eq!(update.header().parameters, Some(params));
        assert_eq!(state.phase(), Phase::Open);

        state.on_message(&decode(r#"{"type":"update","seq":4}"#).unwrap());
        assert_eq!(state.phase(), Phase::Open);
    }

    #[test]
    fn test_local_requests_rejected_out_of_phase() {
        let mut state = new_state();
        assert!(matches!(
            state.request_pause(),
            Err(ClientError::SessionNotStreaming(Phase::Connecting))
        ));
        assert!(state.request_resume().is_err());
        assert!(state.request_update(None).is_err());
        assert_eq!(state.phase(), Phase::Connecting);

        state.request_close("end").unwrap();
        assert!(matches!(
            state.request_close("end"),
            Err(ClientError::SessionNotStreaming(Phase::Closing))
        ));
    }

    #[test]
    fn test_local_close_carries_reason() {
        let mut state = opened_state();
        let reaction = state.request_close("end").unwrap();
        assert!(reaction.has(Effect::StopCapture));
        let close = reaction.reply.unwrap();
        assert_eq!(close.message_type(), MessageType::Close);
        let params = close.header().parameters.clone().unwrap();
        assert_eq!(params["reason"], "end");
    }

    #[test]
    fn test_reply_keeps_client_seq_monotonic() {
        let mut state = opened_state();
        state.on_message(&decode(r#"{"type":"pause","id":"A","clientseq":5,"seq":9}"#).unwrap());
        let reaction = state.request_resume().unwrap();
        // paused went out as seq 6, so resume must follow it
        assert_eq!(reaction.reply.unwrap().header().seq, Some(7));
    }

    #[test]
    fn test_transport_closed() {
        let mut state = opened_state();
        let reaction = state.on_transport_closed();
        assert_eq!(state.phase(), Phase::Closed);
        assert!(reaction.has(Effect::StopCapture));
        assert!(reaction.has(Effect::AbandonGate));
        assert_eq!(state.on_transport_closed(), Reaction::default());
    }

    #[test]
    fn test_reply_seq_saturates_at_max_clientseq() {
        let mut state = opened_state();
        let pause = decode(r#"{"type":"pause","id":"A","clientseq":18446744073709551615,"seq":9}"#).unwrap();
        let reply = state.on_message(&pause).reply.unwrap();
        assert_eq!(reply.header().seq, Some(u64::MAX));
        assert_eq!(state.phase(), Phase::Paused);

        // Later client messages stay numbered without wrapping
        let resume = state.request_resume().unwrap().reply.unwrap();
        assert_eq!(resume.header().seq, Some(u64::MAX));
    }

    #[test]
    fn test_pause_before_opened_is_acknowledged() {
        let mut state = new_state();
        state.begin_open(open_parameters());
        let reaction = state.on_message(&decode(r#"{"type":"pause","id":"P","clientseq":1,"seq":1,"version":"2"}"#).unwrap());

        assert_eq!(state.phase(), Phase::Connecting);
        assert!(reaction.effects.is_empty());
        let reply = reaction.reply.unwrap();
        assert_eq!(reply.message_type(), MessageType::Paused);
        assert_eq!(reply.header().id, "P");
        assert_eq!(reply.header().seq, Some(2));
    }

    #[test]
    fn test_undelivered_pause_is_sent_again() {
        let mut state = opened_state();
        let first = state.request_pause().unwrap().reply.unwrap();
        state.record_undelivered(first);

        let retry = state.request_pause().unwrap();
        let pause = retry.reply.unwrap();
        assert_eq!(pause.message_type(), MessageType::Pause);
        assert_eq!(pause.header().seq, Some(3));
        assert!(retry.effects.is_empty(), "capture is already stopped");

        // Delivered now, so a further request is a no-op again
        assert_eq!(state.request_pause().unwrap(), Reaction::default());
    }

    #[test]
    fn test_undelivered_request_forgotten_on_phase_change() {
        let mut state = opened_state();
        let first = state.request_pause().unwrap().reply.unwrap();
        state.record_undelivered(first);
        state.request_resume().unwrap();
        state.request_pause().unwrap();

        assert_eq!(state.request_pause().unwrap(), Reaction::default());
    }
}
