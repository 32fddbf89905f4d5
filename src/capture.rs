//! Microphone capture and fixed-interval chunking
//!
//! The microphone streams f32 samples into a shared buffer; a ticker slices
//! the buffer every chunk interval and forwards each slice to the connection
//! as a self-contained WAV chunk. Chunks produced while the socket is not
//! open are dropped on the spot — freshness over completeness.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::connection::ConnectionHandle;
use crate::{Error, Result};

/// Sample rate for capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16_000;

/// A start/stoppable source of outbound audio chunks.
///
/// The session controller drives capture through this seam; tests substitute
/// a scripted implementation.
pub trait Capture {
    /// Acquire the device and begin producing chunks
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be acquired; the caller's state is
    /// left unchanged and no retry is attempted.
    fn start(&mut self, conn: ConnectionHandle) -> Result<()>;

    /// Stop producing chunks and release the device, unconditionally
    fn stop(&mut self);

    /// True while the device is held
    fn is_recording(&self) -> bool;
}

/// Captures from the default input device and emits fixed-interval chunks
pub struct MicCapture {
    chunk_interval: Duration,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
    ticker: Option<JoinHandle<()>>,
}

impl MicCapture {
    /// Create an idle capture pipeline; no device is touched until `start`
    #[must_use]
    pub fn new(chunk_interval: Duration) -> Self {
        Self {
            chunk_interval,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
            ticker: None,
        }
    }

    /// Open the microphone and begin filling the sample buffer.
    ///
    /// Used directly by hardware diagnostics; `start` layers the chunk
    /// ticker on top.
    ///
    /// # Errors
    ///
    /// Returns error if no input device or suitable config is available
    pub fn acquire(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.stream = Some(open_input_stream(&self.buffer)?);
        Ok(())
    }

    /// Copy of the samples captured since the last clear
    #[must_use]
    pub fn peek_samples(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    /// Discard buffered samples
    pub fn clear_samples(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }
}

impl Capture for MicCapture {
    fn start(&mut self, conn: ConnectionHandle) -> Result<()> {
        if self.ticker.is_some() {
            return Ok(());
        }
        self.acquire()?;
        self.clear_samples();
        self.ticker = Some(tokio::spawn(run_chunk_ticker(
            self.chunk_interval,
            Arc::clone(&self.buffer),
            conn,
        )));
        tracing::debug!(
            interval_ms = u64::try_from(self.chunk_interval.as_millis()).unwrap_or(u64::MAX),
            "recording started"
        );
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("microphone released");
        }
        self.clear_samples();
    }

    fn is_recording(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the default input device as a mono 16kHz f32 stream
fn open_input_stream(buffer: &Arc<Mutex<Vec<f32>>>) -> Result<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(format!("input configs unavailable: {e}")))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no mono 16kHz input config found".to_string()))?;
    let config = supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        "microphone acquired"
    );

    let sink = Arc::clone(buffer);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| tracing::error!(error = %err, "microphone stream error"),
            None,
        )
        .map_err(|e| Error::Audio(format!("failed to open microphone: {e}")))?;

    stream
        .play()
        .map_err(|e| Error::Audio(format!("failed to start capture: {e}")))?;

    Ok(stream)
}

/// Drain the sample buffer every chunk interval and forward each slice.
///
/// Separated from the device so the cadence and the send-if-open guard run
/// against any sample source. A tick that finds no samples produces no
/// chunk; a chunk the connection refuses (socket not open) is dropped, not
/// queued.
pub async fn run_chunk_ticker(
    chunk_interval: Duration,
    buffer: Arc<Mutex<Vec<f32>>>,
    conn: ConnectionHandle,
) {
    let mut ticker = tokio::time::interval(chunk_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let samples = buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        if samples.is_empty() {
            continue;
        }

        match samples_to_wav(&samples, SAMPLE_RATE) {
            Ok(chunk) => {
                if !conn.send_chunk(chunk.into()) {
                    tracing::trace!(samples = samples.len(), "chunk dropped, socket not open");
                }
            }
            Err(e) => tracing::warn!(error = %e, "chunk encode failed"),
        }
    }
}

/// Encode f32 samples as a self-contained 16-bit WAV chunk
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Audio(format!("WAV encode error: {e}")))?;
        for &sample in samples {
            writer
                .write_sample(to_i16(sample))
                .map_err(|e| Error::Audio(format!("WAV encode error: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| Error::Audio(format!("WAV encode error: {e}")))?;
    }

    Ok(cursor.into_inner())
}

#[allow(clippy::cast_possible_truncation)]
fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_chunk_is_self_contained() {
        let samples = vec![0.25_f32; 160];
        let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.samples::<i16>().count(), samples.len());
    }

    #[test]
    fn clipping_samples_saturate() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), -i16::MAX);
        assert_eq!(to_i16(0.0), 0);
    }
}
