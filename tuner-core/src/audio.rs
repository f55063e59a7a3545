//! # Audio Capture Module
//!
//! The session talks to microphones through [`AudioBackend`]: opening a
//! backend starts a capture that pushes [`AudioEvent`]s (mono blocks in
//! [-1.0, 1.0], or asynchronous stream errors) into a channel, and returns a
//! [`CaptureStream`] handle that stops it.
//!
//! [`CpalBackend`] is the real implementation. cpal streams cannot move
//! between threads, so each capture lives on its own thread, which builds the
//! stream, reports the outcome back, and holds the stream until told to stop.

use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SupportedStreamConfigRange;
use crossbeam_channel::Sender;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AudioConfig;

/// Something the audio source delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Mono samples normalized to [-1.0, 1.0].
    Block(Vec<f32>),
    /// Asynchronous stream failure (device unplugged, overrun...).
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    #[error("no audio capture device is available: {0}")]
    CaptureUnavailable(String),
    #[error("microphone access was denied: {0}")]
    PermissionDenied(String),
    #[error("failed to start audio capture: {0}")]
    Stream(String),
}

impl AudioError {
    /// What the user can do about it.
    pub fn guidance(&self) -> &'static str {
        match self {
            AudioError::CaptureUnavailable(_) => {
                "Connect a microphone or audio interface and make sure the system audio \
                 service (ALSA/PulseAudio, CoreAudio, WASAPI) is installed and running."
            }
            AudioError::PermissionDenied(_) => {
                "Grant this program microphone access in the system privacy settings \
                 (or add your user to the audio group), then start the session again."
            }
            AudioError::Stream(_) => {
                "Check that no other application holds the input device exclusively \
                 and that it supports 32-bit float capture."
            }
        }
    }

    /// Stable machine-readable name of the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            AudioError::CaptureUnavailable(_) => "capture_unavailable",
            AudioError::PermissionDenied(_) => "permission_denied",
            AudioError::Stream(_) => "audio_stream",
        }
    }
}

/// Sorts a backend error message into the permission bucket when it looks
/// like an access failure. `device_missing` marks errors the backend itself
/// attributes to an absent device.
pub fn classify_error(message: String, device_missing: bool) -> AudioError {
    let lower = message.to_lowercase();
    let permission = ["permission", "denied", "not permitted", "unauthorized", "eacces"]
        .iter()
        .any(|needle| lower.contains(needle));
    if permission {
        AudioError::PermissionDenied(message)
    } else if device_missing {
        AudioError::CaptureUnavailable(message)
    } else {
        AudioError::Stream(message)
    }
}

/// A source of microphone audio.
pub trait AudioBackend: Send + Sync {
    /// Starts capturing. Blocks and errors go to `events` until the returned
    /// handle is stopped or dropped.
    fn open(
        &self,
        config: &AudioConfig,
        events: Sender<AudioEvent>,
    ) -> Result<Box<dyn CaptureStream>, AudioError>;
}

/// A running capture.
pub trait CaptureStream: Send {
    /// Rate of the delivered samples, which may differ from the request.
    fn sample_rate(&self) -> u32;

    /// Stops delivery. Idempotent.
    fn stop(&mut self);
}

/// Captures from a cpal input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open(
        &self,
        config: &AudioConfig,
        events: Sender<AudioEvent>,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32, AudioError>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let config = config.clone();

        let thread = thread::Builder::new()
            .name("tuner-capture".into())
            .spawn(move || {
                let (stream, sample_rate) = match start_audio_capture(&config, events) {
                    Ok(started) => started,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(sample_rate));

                // Hold the stream until stop() sends or drops the shutdown sender.
                let _ = shutdown_rx.recv();
                if let Err(e) = stream.pause() {
                    warn!(error = %e, "error pausing capture stream");
                }
                drop(stream);
                debug!("capture thread finished");
            })
            .map_err(|e| AudioError::Stream(format!("spawning capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => Ok(Box::new(CpalCapture {
                sample_rate,
                shutdown_tx: Some(shutdown_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::Stream("capture thread exited during setup".into()))
            }
        }
    }
}

struct CpalCapture {
    sample_rate: u32,
    shutdown_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("capture thread panicked");
            }
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Picks the input device: the named one, or the host default.
fn select_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, AudioError> {
    match name {
        None | Some("default") => host.default_input_device().ok_or_else(|| {
            AudioError::CaptureUnavailable("no default input device".into())
        }),
        Some(wanted) => {
            let devices = host
                .input_devices()
                .map_err(|e| classify_error(e.to_string(), true))?;
            for device in devices {
                if device.name().map(|n| n == wanted).unwrap_or(false) {
                    return Ok(device);
                }
            }
            Err(AudioError::CaptureUnavailable(format!(
                "input device not found: {wanted}"
            )))
        }
    }
}

/// Builds and starts an input stream on the calling thread.
///
/// Interleaved frames are averaged to mono before they are sent.
fn start_audio_capture(
    config: &AudioConfig,
    events: Sender<AudioEvent>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = select_device(&host, config.device.as_deref())?;
    info!(
        device = %device.name().unwrap_or_else(|_| "<unnamed>".into()),
        "using audio input device"
    );

    let configs = device
        .supported_input_configs()
        .map_err(|e| {
            let missing = matches!(e, cpal::SupportedStreamConfigsError::DeviceNotAvailable);
            classify_error(e.to_string(), missing)
        })?
        .collect::<Vec<_>>();
    let supported = find_supported_config(configs, config.sample_rate)
        .ok_or_else(|| AudioError::Stream("no suitable f32 input format found".into()))?;

    let rate = config
        .sample_rate
        .clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
    let supported = supported.with_sample_rate(cpal::SampleRate(rate));
    let channels = supported.channels().max(1) as usize;
    let stream_config: cpal::StreamConfig = supported.into();
    info!(sample_rate = rate, channels, "selected capture format");

    let error_events = events.clone();
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = events.send(AudioEvent::Block(downmix(data, channels)));
            },
            move |err| {
                let _ = error_events.send(AudioEvent::Error(err.to_string()));
            },
            None,
        )
        .map_err(|e| {
            let missing = matches!(e, cpal::BuildStreamError::DeviceNotAvailable);
            classify_error(e.to_string(), missing)
        })?;

    stream.play().map_err(|e| {
        let missing = matches!(e, cpal::PlayStreamError::DeviceNotAvailable);
        classify_error(e.to_string(), missing)
    })?;

    Ok((stream, rate))
}

/// Averages interleaved frames into mono samples.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Finds the best supported f32 configuration: mono first, then the one whose
/// sample-rate range is closest to `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (c.channels() != 1, distance)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_messages_are_recognized() {
        for message in [
            "Permission denied (os error 13)",
            "Operation not permitted",
            "ALSA function 'snd_pcm_open' failed with error 'EACCES'",
        ] {
            assert!(matches!(
                classify_error(message.into(), false),
                AudioError::PermissionDenied(_)
            ));
        }
    }

    #[test]
    fn missing_device_and_generic_errors() {
        assert!(matches!(
            classify_error("The requested device is no longer available".into(), true),
            AudioError::CaptureUnavailable(_)
        ));
        assert!(matches!(
            classify_error("stream config not supported".into(), false),
            AudioError::Stream(_)
        ));
    }

    #[test]
    fn guidance_differs_per_failure() {
        let unavailable = AudioError::CaptureUnavailable(String::new());
        let denied = AudioError::PermissionDenied(String::new());
        assert_ne!(unavailable.guidance(), denied.guidance());
        assert_eq!(unavailable.kind(), "capture_unavailable");
        assert_eq!(denied.kind(), "permission_denied");
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        assert_eq!(downmix(&[0.5, 0.25, -0.5, -0.25], 2), vec![0.375, -0.375]);
        assert_eq!(downmix(&[0.5, 0.1], 1), vec![0.5, 0.1]);
    }
}
