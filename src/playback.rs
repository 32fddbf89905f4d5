//! Ordered playback of synthesized speech
//!
//! Payloads from the server queue in arrival order and play strictly one at
//! a time. The queue is unbounded and self-healing: a payload that fails to
//! decode or play is logged and skipped, never allowed to stall the items
//! behind it.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate of the output engine (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Destination for decoded audio.
///
/// `play` blocks until the payload has been rendered; the queue calls it
/// from a blocking task, one payload at a time.
pub trait AudioSink: Send {
    /// Render decoded samples to the output device
    ///
    /// # Errors
    ///
    /// Returns error if output fails; the queue logs and moves on.
    fn play(&mut self, samples: &[f32]) -> Result<()>;
}

/// Factory used to lazily (re)acquire the output engine
pub type SinkFactory = Arc<dyn Fn() -> Result<Box<dyn AudioSink>> + Send + Sync>;

/// Queue state: the FIFO, the single-flight flag, and the engine.
///
/// The `playing` flag is the system's only mutual-exclusion primitive for
/// playback; it is owned here and mutated only by the queue's own methods.
struct QueueState {
    items: VecDeque<Bytes>,
    playing: bool,
    sink: Option<Box<dyn AudioSink>>,
}

/// FIFO of received speech payloads with a single-flight drain
#[derive(Clone)]
pub struct PlaybackQueue {
    state: Arc<Mutex<QueueState>>,
    factory: SinkFactory,
}

impl PlaybackQueue {
    /// Create a queue backed by the default output device.
    ///
    /// The engine itself is not acquired until the first payload needs it.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sink_factory(Arc::new(|| {
            Ok(Box::new(SpeakerSink::acquire()?) as Box<dyn AudioSink>)
        }))
    }

    /// Create a queue with a custom output engine factory
    #[must_use]
    pub fn with_sink_factory(factory: SinkFactory) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                items: VecDeque::new(),
                playing: false,
                sink: None,
            })),
            factory,
        }
    }

    /// Append a payload and trigger a drain if nothing is playing.
    ///
    /// Returns immediately; payloads render on a background task in strict
    /// arrival order. Must be called from within a tokio runtime.
    pub fn enqueue(&self, payload: Bytes) {
        let trigger = {
            let mut state = self.lock();
            state.items.push_back(payload);
            !state.playing
        };

        if trigger {
            let queue = self.clone();
            tokio::spawn(async move { queue.drain().await });
        }
    }

    /// True when nothing is queued or playing
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.items.is_empty() && !state.playing
    }

    /// Tear down the output engine.
    ///
    /// The next payload that needs it re-acquires through the factory, so
    /// teardown across session restarts is deterministic rather than left
    /// to implicit recreation.
    pub fn release(&self) {
        if self.lock().sink.take().is_some() {
            tracing::debug!("output engine released");
        }
    }

    /// Sequentially play queued payloads until the queue is empty.
    ///
    /// Idempotent: a drain observing another drain's `playing` flag returns
    /// immediately, so at most one payload renders at any time.
    async fn drain(&self) {
        loop {
            let payload = {
                let mut state = self.lock();
                if state.playing {
                    return;
                }
                let Some(payload) = state.items.pop_front() else {
                    return;
                };
                state.playing = true;
                payload
            };

            self.play_one(payload).await;
            self.lock().playing = false;
        }
    }

    /// Decode and render one payload; all failures are contained here
    async fn play_one(&self, payload: Bytes) {
        let samples = match decode_payload(&payload) {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(error = %e, bytes = payload.len(), "undecodable payload skipped");
                return;
            }
        };

        // A zero-length decode is a completed no-op; the engine is not touched.
        if samples.is_empty() {
            tracing::trace!("empty payload skipped");
            return;
        }

        let sink = match self.take_sink() {
            Ok(sink) => sink,
            Err(e) => {
                tracing::error!(error = %e, "audio output unavailable, payload dropped");
                return;
            }
        };

        match tokio::task::spawn_blocking(move || {
            let mut sink = sink;
            let outcome = sink.play(&samples);
            (sink, outcome)
        })
        .await
        {
            Ok((sink, outcome)) => {
                if let Err(e) = outcome {
                    tracing::warn!(error = %e, "playback failed, advancing to next payload");
                }
                self.lock().sink = Some(sink);
            }
            Err(e) => tracing::error!(error = %e, "playback task aborted"),
        }
    }

    /// Take the engine out of the state, lazily acquiring it if absent
    fn take_sink(&self) -> Result<Box<dyn AudioSink>> {
        if let Some(sink) = self.lock().sink.take() {
            return Ok(sink);
        }
        (self.factory)()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a server payload into mono f32 samples.
///
/// Payload format is chosen by the server; WAV is sniffed by header,
/// anything else goes through the MP3 decoder.
fn decode_payload(data: &[u8]) -> Result<Vec<f32>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        decode_wav(data)
    } else {
        decode_mp3(data)
    }
}

/// Decode WAV bytes to mono f32 samples
#[allow(clippy::cast_precision_loss)]
fn decode_wav(data: &[u8]) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::new(Cursor::new(data))
        .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let raw: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
        }
    };

    if channels == 1 {
        return Ok(raw);
    }
    Ok(raw
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect())
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

/// Shared cursor between the output callback and the waiting play call
struct PlayCursor {
    samples: Vec<f32>,
    position: AtomicUsize,
    done: AtomicBool,
}

/// Output engine backed by the default output device
pub struct SpeakerSink {
    device: Device,
    config: StreamConfig,
}

impl SpeakerSink {
    /// Acquire the default output device.
    ///
    /// Prefers a mono config at the playback rate, falling back to stereo.
    ///
    /// # Errors
    ///
    /// Returns error if no output device or suitable config exists
    pub fn acquire() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let rate = SampleRate(PLAYBACK_SAMPLE_RATE);
        let pick = |channels: u16| {
            device
                .supported_output_configs()
                .ok()?
                .find(|c| {
                    c.channels() == channels
                        && c.min_sample_rate() <= rate
                        && c.max_sample_rate() >= rate
                })
        };

        let supported = pick(1)
            .or_else(|| pick(2))
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;
        let config = supported.with_sample_rate(rate).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "output engine acquired"
        );

        Ok(Self { device, config })
    }
}

impl AudioSink for SpeakerSink {
    fn play(&mut self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let channels = usize::from(self.config.channels);
        let cursor = Arc::new(PlayCursor {
            samples: samples.to_vec(),
            position: AtomicUsize::new(0),
            done: AtomicBool::new(false),
        });

        let shared = Arc::clone(&cursor);
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in out.chunks_mut(channels) {
                        let pos = shared.position.load(Ordering::Relaxed);
                        let sample = if pos < shared.samples.len() {
                            shared.position.store(pos + 1, Ordering::Relaxed);
                            shared.samples[pos]
                        } else {
                            shared.done.store(true, Ordering::Release);
                            0.0
                        };
                        for slot in frame.iter_mut() {
                            *slot = sample;
                        }
                    }
                },
                |err| tracing::error!(error = %err, "output stream error"),
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        // Wait for the callback to run past the final sample, bounded by the
        // payload duration plus slack.
        let duration_ms = samples.len() as u64 * 1000 / u64::from(PLAYBACK_SAMPLE_RATE);
        let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);
        while !cursor.done.load(Ordering::Acquire) {
            if Instant::now() > deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        std::thread::sleep(Duration::from_millis(50));

        drop(stream);
        tracing::debug!(samples = samples.len(), "payload rendered");
        Ok(())
    }
}
