//! Shared test utilities
//!
//! Playback tests run against a recording sink instead of audio hardware;
//! the sink also asserts the single-flight invariant on every call.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fluentnow::playback::{AudioSink, PlaybackQueue};
use fluentnow::{Error, Result};

/// One completed `play` call
pub struct PlayedItem {
    pub samples: usize,
    pub first: f32,
}

/// Shared log of completed plays, in playback order
pub type PlayLog = Arc<Mutex<Vec<PlayedItem>>>;

/// Sink that records plays and panics if two overlap
pub struct RecordingSink {
    log: PlayLog,
    active: Arc<AtomicBool>,
    delay: Duration,
    fail_above: Option<f32>,
}

impl AudioSink for RecordingSink {
    fn play(&mut self, samples: &[f32]) -> Result<()> {
        assert!(
            !self.active.swap(true, Ordering::SeqCst),
            "two payloads playing at once"
        );
        std::thread::sleep(self.delay);

        let first = samples.first().copied().unwrap_or_default();
        self.log.lock().unwrap().push(PlayedItem {
            samples: samples.len(),
            first,
        });

        self.active.store(false, Ordering::SeqCst);

        if let Some(limit) = self.fail_above {
            if first > limit {
                return Err(Error::Audio("sink rejected payload".to_string()));
            }
        }
        Ok(())
    }
}

/// Build a queue whose output engine records plays instead of touching
/// hardware. Returns the play log, an engine-creation counter, and the
/// queue. `fail_above` makes the sink error after playing any payload whose
/// first sample exceeds the limit.
pub fn recording_queue(
    delay: Duration,
    fail_above: Option<f32>,
) -> (PlayLog, Arc<AtomicUsize>, PlaybackQueue) {
    let log: PlayLog = Arc::default();
    let created = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicBool::new(false));

    let queue = PlaybackQueue::with_sink_factory({
        let log = Arc::clone(&log);
        let created = Arc::clone(&created);
        let active = Arc::clone(&active);
        Arc::new(move || {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingSink {
                log: Arc::clone(&log),
                active: Arc::clone(&active),
                delay,
                fail_above,
            }) as Box<dyn AudioSink>)
        })
    });

    (log, created, queue)
}

/// Mono 16-bit WAV chunk with every sample at `amplitude`
pub fn tone_wav(amplitude: f32, samples: usize) -> Vec<u8> {
    fluentnow::capture::samples_to_wav(&vec![amplitude; samples], 16_000).unwrap()
}

/// Wait until the queue has drained everything, or panic
pub async fn wait_idle(queue: &PlaybackQueue) {
    for _ in 0..500 {
        if queue.is_idle() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("playback queue never drained");
}
