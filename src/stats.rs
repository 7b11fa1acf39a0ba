//! # Session Statistics
//!
//! Counters updated from the reactor task and the audio pump at the same
//! time. Plain atomics keep recording lock-free; a [`StatsSnapshot`] gives
//! a consistent-enough copy for logging at teardown.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SessionStats {
    audio_frames_sent: AtomicU64,
    audio_bytes_sent: AtomicU64,
    audio_chunks_dropped: AtomicU64,
    control_sent: AtomicU64,
    control_received: AtomicU64,
    control_discarded: AtomicU64,
    send_failures: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub audio_frames_sent: u64,
    pub audio_bytes_sent: u64,
    /// Chunks the pump produced while the session could not stream
    pub audio_chunks_dropped: u64,
    pub control_sent: u64,
    pub control_received: u64,
    /// Inbound text frames that failed to decode
    pub control_discarded: u64,
    pub send_failures: u64,
}

impl SessionStats {
    pub fn record_audio(&self, bytes: usize) {
        self.audio_frames_sent.fetch_add(1, Ordering::Relaxed);
        self.audio_bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_dropped_chunk(&self) {
        self.audio_chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_control_sent(&self) {
        self.control_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_control_received(&self) {
        self.control_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.control_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            audio_frames_sent: self.audio_frames_sent.load(Ordering::Relaxed),
            audio_bytes_sent: self.audio_bytes_sent.load(Ordering::Relaxed),
            audio_chunks_dropped: self.audio_chunks_dropped.load(Ordering::Relaxed),
            control_sent: self.control_sent.load(Ordering::Relaxed),
            control_received: self.control_received.load(Ordering::Relaxed),
            control_discarded: self.control_discarded.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}
