//! # Pitch Estimator
//!
//! Turns a stream of variable-size sample blocks into a running frequency
//! estimate. Samples accumulate in a rolling buffer; once a full analysis
//! window is available it is gated on RMS energy, handed to the configured
//! [`PitchDetector`], and the buffer is cut back to half a window so the
//! next analysis overlaps the previous one by 50%.
//!
//! ## Features
//! - Accepts blocks of any size from the audio callback
//! - RMS noise gate that clears the estimate on silence
//! - Holds the last estimate through detector misses
//! - Refuses analysis windows too short for the detector's search band

use thiserror::Error;
use tracing::{debug, trace};

use crate::config::EstimatorConfig;
use crate::pitch::{DetectorError, FrequencyBand, PitchDetector};
use crate::tuning::in_guitar_range;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimatorError {
    #[error("pitch estimator is not initialized")]
    NotInitialized,
    #[error("analysis window of {window} samples is too small; the detector needs at least {required}")]
    WindowTooSmall { window: usize, required: usize },
    #[error("pitch detector rejected its configuration: {0}")]
    Detector(#[from] DetectorError),
}

/// Root-mean-square energy of a block of samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

pub struct PitchEstimator {
    detector: Box<dyn PitchDetector>,
    config: EstimatorConfig,
    buffer: Vec<f32>,
    last_frequency: Option<f64>,
    ready: bool,
}

impl std::fmt::Debug for PitchEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PitchEstimator")
            .field("config", &self.config)
            .field("buffered", &self.buffer.len())
            .field("last_frequency", &self.last_frequency)
            .field("ready", &self.ready)
            .finish()
    }
}

impl PitchEstimator {
    /// Creates an estimator in the uninitialized state.
    pub fn new(detector: Box<dyn PitchDetector>, config: EstimatorConfig) -> Self {
        Self {
            detector,
            buffer: Vec::with_capacity(config.window_size * 2),
            config,
            last_frequency: None,
            ready: false,
        }
    }

    /// Configures the detector for `sample_rate` and the guitar search band.
    /// Must succeed before [`process`](Self::process) can be called.
    ///
    /// Fails when the analysis window cannot hold enough periods of the
    /// lowest frequency in the band at this sample rate.
    pub fn initialize(&mut self, sample_rate: u32) -> Result<(), EstimatorError> {
        self.ready = false;
        let band = FrequencyBand::new(self.config.min_detect_hz, self.config.max_detect_hz);
        self.detector.initialize(sample_rate, band)?;

        let window = self.config.window_size;
        let required = self.detector.min_window().max(2);
        if window < required {
            return Err(EstimatorError::WindowTooSmall { window, required });
        }
        self.reset();
        self.ready = true;
        debug!(
            sample_rate,
            window = self.config.window_size,
            min_hz = band.min_hz,
            max_hz = band.max_hz,
            "pitch estimator initialized"
        );
        Ok(())
    }

    /// True once [`initialize`](Self::initialize) has succeeded.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Appends a block and, when a full window is buffered, analyses it.
    ///
    /// Returns the most recent estimate: a fresh one after an analysis, or
    /// the previous value while samples are still accumulating. A window
    /// under the noise gate clears the estimate; a detector miss or an
    /// out-of-range detection keeps it.
    pub fn process(&mut self, block: &[f32]) -> Result<Option<f64>, EstimatorError> {
        if !self.ready {
            return Err(EstimatorError::NotInitialized);
        }

        self.buffer.extend_from_slice(block);
        let window_size = self.config.window_size;
        if self.buffer.len() < window_size {
            return Ok(self.last_frequency);
        }

        // Analyse the newest full window if a large block overshot it.
        let start = self.buffer.len() - window_size;
        let window = &self.buffer[start..];

        let energy = rms(window);
        if energy < self.config.noise_gate_rms {
            trace!(rms = energy, "window below noise gate");
            self.last_frequency = None;
        } else {
            match self.detector.detect(window) {
                Some(frequency) if in_guitar_range(frequency) => {
                    trace!(frequency, rms = energy, "pitch detected");
                    self.last_frequency = Some(frequency);
                }
                other => {
                    trace!(detected = ?other, "detector miss, holding last estimate");
                }
            }
        }

        let keep = window_size / 2;
        let drop = self.buffer.len() - keep;
        self.buffer.drain(..drop);

        Ok(self.last_frequency)
    }

    /// Forgets buffered samples and the last estimate.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_frequency = None;
    }

    /// The estimate [`process`](Self::process) last returned.
    pub fn last_frequency(&self) -> Option<f64> {
        self.last_frequency
    }

    /// Samples waiting in the rolling buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Detector that replays scripted answers and records window sizes.
    struct Scripted {
        answers: Arc<Mutex<Vec<Option<f64>>>>,
        windows: Arc<Mutex<Vec<usize>>>,
    }

    impl PitchDetector for Scripted {
        fn initialize(&mut self, _: u32, _: FrequencyBand) -> Result<(), DetectorError> {
            Ok(())
        }

        fn detect(&mut self, window: &[f32]) -> Option<f64> {
            self.windows.lock().unwrap().push(window.len());
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() { None } else { answers.remove(0) }
        }
    }

    fn config() -> EstimatorConfig {
        EstimatorConfig {
            window_size: 8,
            noise_gate_rms: 0.01,
            ..EstimatorConfig::default()
        }
    }

    fn scripted(answers: Vec<Option<f64>>) -> (PitchEstimator, Arc<Mutex<Vec<usize>>>) {
        let windows = Arc::new(Mutex::new(Vec::new()));
        let detector = Scripted {
            answers: Arc::new(Mutex::new(answers)),
            windows: windows.clone(),
        };
        let mut estimator = PitchEstimator::new(Box::new(detector), config());
        estimator.initialize(44_100).unwrap();
        (estimator, windows)
    }

    const LOUD: [f32; 4] = [0.5, -0.5, 0.5, -0.5];
    const QUIET: [f32; 4] = [0.001, -0.001, 0.001, -0.001];

    #[test]
    fn processing_before_initialize_fails() {
        let mut estimator = PitchEstimator::new(
            Box::new(crate::pitch::YinDetector::default()),
            EstimatorConfig::default(),
        );
        assert!(!estimator.is_ready());
        assert_eq!(estimator.process(&[0.0; 16]), Err(EstimatorError::NotInitialized));
    }

    #[test]
    fn accumulates_until_window_then_keeps_half() {
        let (mut estimator, windows) = scripted(vec![Some(110.0)]);
        assert_eq!(estimator.process(&LOUD).unwrap(), None);
        assert_eq!(estimator.buffered(), 4);
        assert!(windows.lock().unwrap().is_empty());

        assert_eq!(estimator.process(&LOUD).unwrap(), Some(110.0));
        assert_eq!(estimator.buffered(), 4);
        assert_eq!(*windows.lock().unwrap(), vec![8]);

        // Half a window more completes the next overlapping window.
        assert_eq!(estimator.process(&LOUD).unwrap(), Some(110.0));
        assert_eq!(windows.lock().unwrap().len(), 2);
    }

    #[test]
    fn oversized_block_analyses_newest_window_once() {
        let (mut estimator, windows) = scripted(vec![Some(196.0)]);
        let big: Vec<f32> = LOUD.iter().cycle().take(20).copied().collect();
        assert_eq!(estimator.process(&big).unwrap(), Some(196.0));
        assert_eq!(*windows.lock().unwrap(), vec![8]);
        assert_eq!(estimator.buffered(), 4);
    }

    #[test]
    fn silence_drops_previous_estimate() {
        let (mut estimator, windows) = scripted(vec![Some(110.0), Some(110.0)]);
        estimator.process(&LOUD).unwrap();
        assert_eq!(estimator.process(&LOUD).unwrap(), Some(110.0));
        // Half loud, half quiet: still above the gate.
        assert_eq!(estimator.process(&QUIET).unwrap(), Some(110.0));
        // Fully quiet window.
        assert_eq!(estimator.process(&QUIET).unwrap(), None);
        // The gate short-circuits the detector.
        assert_eq!(windows.lock().unwrap().len(), 2);
    }

    #[test]
    fn detector_miss_holds_last_estimate() {
        let (mut estimator, _) = scripted(vec![Some(146.83), None, Some(2000.0)]);
        estimator.process(&LOUD).unwrap();
        assert_eq!(estimator.process(&LOUD).unwrap(), Some(146.83));
        // Miss.
        assert_eq!(estimator.process(&LOUD).unwrap(), Some(146.83));
        // Out-of-range detection.
        assert_eq!(estimator.process(&LOUD).unwrap(), Some(146.83));
    }

    #[test]
    fn reset_forgets_buffer_and_estimate() {
        let (mut estimator, _) = scripted(vec![Some(110.0)]);
        estimator.process(&LOUD).unwrap();
        estimator.process(&LOUD).unwrap();
        estimator.process(&[0.5, -0.5]).unwrap();
        estimator.reset();
        assert_eq!(estimator.buffered(), 0);
        assert_eq!(estimator.last_frequency(), None);
        assert!(estimator.is_ready());
    }

    #[test]
    fn real_detector_tracks_sine_in_small_blocks() {
        let mut estimator = PitchEstimator::new(
            Box::new(crate::pitch::YinDetector::default()),
            EstimatorConfig::default(),
        );
        estimator.initialize(44_100).unwrap();
        let signal: Vec<f32> = (0..12_000)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * 110.0 * i as f32 / 44_100.0).sin())
            .collect();
        let mut last = None;
        for block in signal.chunks(512) {
            last = estimator.process(block).unwrap();
        }
        let frequency = last.unwrap();
        assert!((frequency - 110.0).abs() < 0.5, "{frequency}");
    }

    #[test]
    fn window_shorter_than_detector_needs_is_rejected() {
        let short = EstimatorConfig {
            window_size: 1024,
            ..EstimatorConfig::default()
        };
        let mut estimator =
            PitchEstimator::new(Box::new(crate::pitch::YinDetector::default()), short);
        assert_eq!(
            estimator.initialize(44_100),
            Err(EstimatorError::WindowTooSmall {
                window: 1024,
                required: 1264
            })
        );
        assert!(!estimator.is_ready());

        // The default window is fine at 44.1 kHz but not at 192 kHz.
        let mut estimator = PitchEstimator::new(
            Box::new(crate::pitch::YinDetector::default()),
            EstimatorConfig::default(),
        );
        assert!(matches!(
            estimator.initialize(192_000),
            Err(EstimatorError::WindowTooSmall { window: 4096, .. })
        ));
        assert!(!estimator.is_ready());
        assert_eq!(estimator.process(&[0.0; 16]), Err(EstimatorError::NotInitialized));

        estimator.initialize(44_100).unwrap();
        assert!(estimator.is_ready());
    }

    #[test]
    fn rms_of_known_signals() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&LOUD) - 0.5).abs() < 1e-6);
    }
}
