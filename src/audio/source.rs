//! PCM audio source backed by a WAV file or generated silence.
//!
//! The whole recording is decoded up front into 16-bit little-endian mono
//! PCM. A tokio task then slices it into chunks and pushes one chunk per
//! tick. Stopping aborts the task but keeps the read position, so a resumed
//! stream continues where it paused.

use crate::audio::AudioSource;
use crate::config::AudioConfig;
use crate::error::{ClientError, ClientResult};
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use wav::BitDepth;

/// Streams pre-decoded PCM in fixed-size chunks.
pub struct PcmSource {
    pcm: Arc<Vec<u8>>,
    sample_rate: u32,
    chunk_bytes: usize,
    interval: Duration,
    looping: bool,
    position: Arc<AtomicUsize>,
    task: Option<JoinHandle<()>>,
}

impl PcmSource {
    /// Wrap raw 16-bit little-endian mono PCM recorded at `sample_rate`.
    pub fn from_pcm(pcm: Vec<u8>, sample_rate: u32, audio: &AudioConfig) -> Self {
        Self {
            pcm: Arc::new(pcm),
            sample_rate,
            chunk_bytes: audio.chunk_bytes(),
            interval: audio.chunk_interval(),
            looping: audio.loop_source,
            position: Arc::new(AtomicUsize::new(0)),
            task: None,
        }
    }

    /// Decode a WAV file. Multi-channel files are reduced to their first channel.
    pub fn from_wav_file(path: impl AsRef<Path>, audio: &AudioConfig) -> ClientResult<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .map_err(|e| ClientError::Audio(format!("cannot open {}: {}", path.display(), e)))?;
        let (header, data) = wav::read(&mut file)
            .map_err(|e| ClientError::Audio(format!("cannot decode {}: {}", path.display(), e)))?;

        let pcm = to_pcm16_mono(data, header.channel_count)?;
        info!(
            path = %path.display(),
            sample_rate = header.sampling_rate,
            channels = header.channel_count,
            bytes = pcm.len(),
            "Loaded WAV audio source"
        );

        Ok(Self::from_pcm(pcm, header.sampling_rate, audio))
    }

    /// Endless silence at the configured rate.
    pub fn silence(audio: &AudioConfig) -> Self {
        let mut source = Self::from_pcm(vec![0u8; audio.chunk_bytes()], audio.sample_rate, audio);
        source.looping = true;
        source
    }

    /// Bytes already handed out.
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl AudioSource for PcmSource {
    /// Spawns the chunking task; must be called from within a tokio runtime.
    fn start_capturing(&mut self, sample_rate_hz: u32, chunks: mpsc::Sender<Vec<u8>>) -> ClientResult<()> {
        if self.is_running() {
            debug!("Audio source already capturing");
            return Ok(());
        }
        if self.pcm.is_empty() {
            return Err(ClientError::Audio("audio source has no samples".to_string()));
        }
        if sample_rate_hz != self.sample_rate {
            // No resampling: the server is told `sample_rate_hz` regardless
            warn!(
                requested = sample_rate_hz,
                recorded = self.sample_rate,
                "Audio source sample rate differs from the announced rate"
            );
        }

        let pcm = self.pcm.clone();
        let position = self.position.clone();
        let chunk_bytes = self.chunk_bytes;
        let interval = self.interval;
        let looping = self.looping;

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let mut start = position.load(Ordering::Acquire);
                if start >= pcm.len() {
                    if !looping {
                        debug!(bytes = pcm.len(), "Audio source exhausted");
                        break;
                    }
                    start = 0;
                }

                let end = (start + chunk_bytes).min(pcm.len());
                if chunks.send(pcm[start..end].to_vec()).await.is_err() {
                    debug!("Audio consumer dropped, stopping capture task");
                    break;
                }
                position.store(end, Ordering::Release);
            }
        }));

        debug!(sample_rate = sample_rate_hz, chunk_bytes, "Audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(position = self.position(), "Audio capture stopped");
        }
    }
}

impl Drop for PcmSource {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Convert decoded WAV samples to 16-bit little-endian PCM, keeping channel 0.
fn to_pcm16_mono(data: BitDepth, channel_count: u16) -> ClientResult<Vec<u8>> {
    let samples: Vec<i16> = match data {
        BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| (s as i16 - 128) << 8)
            .collect(),
        BitDepth::Sixteen(samples) => samples,
        BitDepth::TwentyFour(samples) => samples.into_iter().map(|s| (s >> 8) as i16).collect(),
        BitDepth::ThirtyTwoFloat(samples) => samples
            .into_iter()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect(),
        BitDepth::Empty => return Err(ClientError::Audio("WAV file contains no samples".to_string())),
    };

    let step = channel_count.max(1) as usize;
    let mut pcm = Vec::with_capacity(samples.len() / step * 2);
    for sample in samples.iter().step_by(step) {
        pcm.write_i16::<LittleEndian>(*sample)?;
    }
    Ok(pcm)
}
