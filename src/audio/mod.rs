//! # Audio Capture
//!
//! Audio reaches the session as fixed-size chunks of 16-bit little-endian
//! mono PCM, pushed into a channel at a fixed cadence. The session client
//! starts and stops the source as the protocol pauses and resumes.
//!
//! ## Key Components:
//! - **AudioSource**: The capture seam the client drives
//! - **PcmSource**: Streams a WAV file or generated silence
//!
//! ## Key Rust Concepts Used:
//! - **Trait objects**: `Box<dyn AudioSource>` lets the client accept any source
//! - **mpsc channels**: The source produces, the client's audio pump consumes
//! - **Send**: Sources move into the client and are driven from async tasks

use crate::error::ClientResult;
use tokio::sync::mpsc;

pub mod source;

pub use source::PcmSource;

/// A producer of binary audio chunks.
///
/// `start_capturing` must return promptly; chunks are delivered later
/// through `chunks`. After `stop` no further chunks are sent until the
/// next `start_capturing`.
pub trait AudioSource: Send {
    fn start_capturing(&mut self, sample_rate_hz: u32, chunks: mpsc::Sender<Vec<u8>>) -> ClientResult<()>;

    fn stop(&mut self);
}
