//! # Configuration Management
//!
//! This module handles loading and managing client configuration from multiple sources:
//! - TOML configuration files (audiohook.toml)
//! - Environment variables (with AUDIOHOOK__ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **impl blocks**: Add methods to structs
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (AUDIOHOOK__SERVER__URI, AUDIOHOOK__AUTH__API_KEY, etc.)
//! 2. Configuration file (audiohook.toml)
//! 3. Default values (defined in the Default impl)

use crate::error::{ClientError, ClientResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_tungstenite::tungstenite::http::Uri;

/// Main client configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, auth, session, audio)
/// mirrors the stages of a session: where to connect, how to sign the
/// handshake, how to run the protocol, and what to stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub session: SessionConfig,
    pub audio: AudioConfig,
}

/// Where the AudioHook server lives.
///
/// ## Fields:
/// - `uri`: WebSocket endpoint, e.g. `ws://localhost:8080/audiohook/ws`
/// - `authority`: Value signed as `@authority`. Defaults to the URI's
///   `host:port` when not set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub uri: String,
    #[serde(default)]
    pub authority: Option<String>,
}

/// Handshake credentials.
///
/// The `client_secret` keys the HMAC used for the `Signature` header and is
/// never sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub organization_id: String,
    pub correlation_id: String,
    pub api_key: String,
    pub client_secret: String,
    /// Fixed nonce for `Signature-Input`; a random one is generated when absent
    #[serde(default)]
    pub nonce: Option<String>,
    /// How long the signature stays valid (`expires - created`)
    pub signature_ttl_secs: u64,
}

/// Protocol-level settings for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_id: String,
    pub participant_id: String,
    pub protocol_version: String,
    /// Upper bound on waiting for `opened`; 0 waits forever
    pub open_timeout_ms: u64,
    /// How long `request_close` waits for the server's `closed`
    pub close_ack_timeout_ms: u64,
}

/// Audio capture settings.
///
/// ## Fields:
/// - `sample_rate`: Samples per second (8000 in the reference deployment)
/// - `chunk_ms`: Duration covered by one binary frame
/// - `format`: Media format announced in the `open` message
/// - `wav_path`: Stream this WAV file; generated silence when absent
/// - `loop_source`: Restart the file from the beginning when it runs out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub chunk_ms: u32,
    pub format: String,
    #[serde(default)]
    pub wav_path: Option<String>,
    pub loop_source: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                uri: "ws://localhost:8080/audiohook/ws".to_string(),
                authority: None,
            },
            auth: AuthConfig {
                organization_id: "d7934305-0972-4844-938e-9060eef73d05".to_string(),
                correlation_id: "e160e428-53e2-487c-977d-96989bf5c99d".to_string(),
                api_key: String::new(),
                client_secret: String::new(),
                nonce: None,
                signature_ttl_secs: 300,
            },
            session: SessionConfig {
                session_id: "30b0e395-84d3-4570-ac13-9a62d8f514c0".to_string(),
                participant_id: "user-123".to_string(),
                protocol_version: "2".to_string(),
                open_timeout_ms: 10_000,
                close_ack_timeout_ms: 2_000,
            },
            audio: AudioConfig {
                sample_rate: 8000,  // 8kHz telephony audio
                chunk_ms: 20,       // 20ms frames
                format: "L16".to_string(),
                wav_path: None,
                loop_source: false,
            },
        }
    }
}

impl ClientConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from audiohook.toml (if it exists)
    /// 3. Override with environment variables prefixed with AUDIOHOOK__
    ///
    /// ## Environment Variable Examples:
    /// - `AUDIOHOOK__SERVER__URI=wss://audiohook.example.com/ws`
    /// - `AUDIOHOOK__AUTH__API_KEY=...`
    /// - `AUDIOHOOK__AUDIO__WAV_PATH=call.wav`
    pub fn load() -> ClientResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&ClientConfig::default())?)
            .add_source(config::File::with_name("audiohook").required(false))
            // Double underscore keeps field names like `api_key` intact
            .add_source(
                config::Environment::with_prefix("AUDIOHOOK")
                    .prefix_separator("__")
                    .separator("__"),
            );

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - The server URI parses and names a host
    /// - Identifiers and credentials used in the signature are not empty
    /// - Audio parameters produce a non-empty chunk
    pub fn validate(&self) -> ClientResult<()> {
        let uri: Uri = self
            .server
            .uri
            .parse()
            .map_err(|e| ClientError::Config(format!("invalid server uri: {}", e)))?;
        if uri.host().is_none() {
            return Err(ClientError::Config("server uri has no host".to_string()));
        }

        let required = [
            ("auth.organization_id", &self.auth.organization_id),
            ("auth.correlation_id", &self.auth.correlation_id),
            ("auth.api_key", &self.auth.api_key),
            ("auth.client_secret", &self.auth.client_secret),
            ("session.session_id", &self.session.session_id),
            ("session.participant_id", &self.session.participant_id),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ClientError::Config(format!("{} must not be empty", name)));
            }
        }

        if self.audio.sample_rate == 0 {
            return Err(ClientError::Config("Sample rate must be greater than 0".to_string()));
        }

        if self.audio.chunk_bytes() == 0 {
            return Err(ClientError::Config("Audio chunk size must be greater than 0".to_string()));
        }

        Ok(())
    }

    /// The `@authority` component: explicit override or the URI's host and port.
    pub fn authority(&self) -> ClientResult<String> {
        if let Some(authority) = &self.server.authority {
            return Ok(authority.clone());
        }
        let uri: Uri = self
            .server
            .uri
            .parse()
            .map_err(|e| ClientError::Config(format!("invalid server uri: {}", e)))?;
        uri.authority()
            .map(|a| a.as_str().to_string())
            .ok_or_else(|| ClientError::Config("server uri has no authority".to_string()))
    }

    /// The `@request-target` component: lowercase method plus path.
    pub fn request_target(&self) -> ClientResult<String> {
        let uri: Uri = self
            .server
            .uri
            .parse()
            .map_err(|e| ClientError::Config(format!("invalid server uri: {}", e)))?;
        Ok(format!("get {}", uri.path()))
    }
}

impl SessionConfig {
    pub fn open_timeout(&self) -> Option<Duration> {
        match self.open_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn close_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.close_ack_timeout_ms)
    }
}

impl AudioConfig {
    /// Bytes in one chunk of 16-bit mono PCM.
    pub fn chunk_bytes(&self) -> usize {
        (self.sample_rate as usize * self.chunk_ms as usize / 1000) * 2
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_ms as u64)
    }
}
