//! Synthetic audio source.
//!
//! [`SyntheticBackend`] plays the part of a microphone: a generator thread
//! emits sine blocks in real time at a frequency that can be changed (or
//! silenced) while a capture is running. The server's `--simulate` mode and
//! the session integration tests drive sessions with it.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::debug;

use crate::audio::{AudioBackend, AudioError, AudioEvent, CaptureStream};
use crate::config::AudioConfig;

/// Samples per generated block.
pub const BLOCK_SIZE: usize = 1024;

#[derive(Debug, Default)]
struct Shared {
    frequency: Mutex<Option<f64>>,
    pending_errors: Mutex<Vec<String>>,
    open_streams: AtomicUsize,
}

/// Sine-wave audio backend with a runtime-adjustable tone.
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    shared: Arc<Shared>,
    amplitude: f32,
}

impl SyntheticBackend {
    /// `frequency` of `None` produces silence.
    pub fn new(frequency: Option<f64>) -> Self {
        let backend = Self {
            shared: Arc::new(Shared::default()),
            amplitude: 0.4,
        };
        backend.set_frequency(frequency);
        backend
    }

    /// Changes the tone of running and future captures; `None` is silence.
    pub fn set_frequency(&self, frequency: Option<f64>) {
        *lock(&self.shared.frequency) = frequency;
    }

    /// The tone currently generated.
    pub fn frequency(&self) -> Option<f64> {
        *lock(&self.shared.frequency)
    }

    /// Queues a stream error notification for the next generated block.
    pub fn inject_error(&self, message: impl Into<String>) {
        lock(&self.shared.pending_errors).push(message.into());
    }

    /// Number of captures currently running.
    pub fn open_streams(&self) -> usize {
        self.shared.open_streams.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AudioBackend for SyntheticBackend {
    fn open(
        &self,
        config: &AudioConfig,
        events: Sender<AudioEvent>,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        let sample_rate = config.sample_rate;
        if sample_rate == 0 {
            return Err(AudioError::Stream("sample rate must be positive".into()));
        }

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let shared = self.shared.clone();
        let amplitude = self.amplitude;
        let block_period = Duration::from_secs_f64(BLOCK_SIZE as f64 / sample_rate as f64);

        let thread = thread::Builder::new()
            .name("tuner-synthetic".into())
            .spawn(move || {
                let mut phase = 0.0_f64;
                loop {
                    match shutdown_rx.recv_timeout(block_period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }

                    for message in lock(&shared.pending_errors).drain(..) {
                        let _ = events.send(AudioEvent::Error(message));
                    }

                    let frequency = *lock(&shared.frequency);
                    let block: Vec<f32> = match frequency {
                        Some(hz) => {
                            let step = TAU * hz / sample_rate as f64;
                            (0..BLOCK_SIZE)
                                .map(|_| {
                                    let sample = amplitude * phase.sin() as f32;
                                    phase = (phase + step) % TAU;
                                    sample
                                })
                                .collect()
                        }
                        None => vec![0.0; BLOCK_SIZE],
                    };
                    if events.send(AudioEvent::Block(block)).is_err() {
                        break;
                    }
                }
                debug!("synthetic source finished");
            })
            .map_err(|e| AudioError::Stream(format!("spawning synthetic source: {e}")))?;

        self.shared.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticCapture {
            sample_rate,
            shared: self.shared.clone(),
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        }))
    }
}

struct SyntheticCapture {
    sample_rate: u32,
    shared: Arc<Shared>,
    shutdown_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for SyntheticCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn stop(&mut self) {
        let Some(tx) = self.shutdown_tx.take() else {
            return;
        };
        let _ = tx.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.shared.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for SyntheticCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_blocks_until_stopped() {
        let backend = SyntheticBackend::new(Some(110.0));
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut capture = backend.open(&AudioConfig::default(), tx).unwrap();
        assert_eq!(capture.sample_rate(), 44_100);
        assert_eq!(backend.open_streams(), 1);

        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            AudioEvent::Block(block) => {
                assert_eq!(block.len(), BLOCK_SIZE);
                assert!(block.iter().any(|s| s.abs() > 0.1));
            }
            other => panic!("unexpected event {other:?}"),
        }

        backend.set_frequency(None);
        assert_eq!(backend.frequency(), None);

        capture.stop();
        capture.stop();
        assert_eq!(backend.open_streams(), 0);
    }

    #[test]
    fn silence_and_errors() {
        let backend = SyntheticBackend::new(None);
        backend.inject_error("device unplugged");
        let (tx, rx) = crossbeam_channel::unbounded();
        let _capture = backend.open(&AudioConfig::default(), tx).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first, AudioEvent::Error("device unplugged".into()));
        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            AudioEvent::Block(block) => assert!(block.iter().all(|&s| s == 0.0)),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
