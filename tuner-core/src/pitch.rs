//! # Pitch Detection Module
//!
//! The [`PitchDetector`] trait is the seam between the estimator's
//! buffering/gating logic and the algorithm that turns one analysis window
//! into a frequency. [`YinDetector`] is the default implementation.
//!
//! ## YIN
//! - Difference function computed from FFT lagged products
//! - Cumulative mean normalized difference
//! - First dip under an absolute threshold, walked down to its local minimum
//! - Parabolic interpolation for sub-sample accuracy

use thiserror::Error;

use crate::fft::{Correlator, remove_dc_offset};

/// Frequency search band for a detector, in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyBand {
    pub min_hz: f64,
    pub max_hz: f64,
}

impl FrequencyBand {
    /// Band from `min_hz` to `max_hz`. Validated by the detector.
    pub fn new(min_hz: f64, max_hz: f64) -> Self {
        Self { min_hz, max_hz }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectorError {
    #[error("sample rate must be positive")]
    InvalidSampleRate,
    #[error("invalid frequency band {min_hz}..{max_hz} Hz for sample rate {sample_rate}")]
    InvalidBand {
        min_hz: f64,
        max_hz: f64,
        sample_rate: u32,
    },
}

/// A monophonic pitch detection algorithm.
pub trait PitchDetector: Send {
    /// Configures the detector for a fixed sample rate and search band.
    fn initialize(&mut self, sample_rate: u32, band: FrequencyBand) -> Result<(), DetectorError>;

    /// Estimates the fundamental of one analysis window, or `None` when the
    /// window holds no clear periodicity.
    fn detect(&mut self, window: &[f32]) -> Option<f64>;

    /// Shortest window [`detect`](Self::detect) can analyse with the current
    /// configuration. Zero when any length will do.
    fn min_window(&self) -> usize {
        0
    }
}

/// Default absolute threshold on the normalized difference. Above the
/// textbook 0.10–0.15 so the thin upper strings are not missed.
pub const DEFAULT_YIN_THRESHOLD: f32 = 0.2;

#[derive(Debug)]
struct YinState {
    sample_rate: u32,
    tau_min: usize,
    tau_max: usize,
    correlator: Option<Correlator>,
}

/// YIN pitch detector.
#[derive(Debug)]
pub struct YinDetector {
    threshold: f32,
    state: Option<YinState>,
}

impl Default for YinDetector {
    fn default() -> Self {
        Self::new(DEFAULT_YIN_THRESHOLD)
    }
}

impl YinDetector {
    /// Creates an unconfigured detector with the given absolute threshold.
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            state: None,
        }
    }
}

impl PitchDetector for YinDetector {
    fn initialize(&mut self, sample_rate: u32, band: FrequencyBand) -> Result<(), DetectorError> {
        if sample_rate == 0 {
            return Err(DetectorError::InvalidSampleRate);
        }
        let nyquist = sample_rate as f64 / 2.0;
        if !(band.min_hz > 0.0 && band.min_hz < band.max_hz && band.max_hz < nyquist) {
            return Err(DetectorError::InvalidBand {
                min_hz: band.min_hz,
                max_hz: band.max_hz,
                sample_rate,
            });
        }

        let tau_min = ((sample_rate as f64 / band.max_hz).floor() as usize).max(2);
        let tau_max = (sample_rate as f64 / band.min_hz).ceil() as usize;
        self.state = Some(YinState {
            sample_rate,
            tau_min,
            tau_max,
            correlator: None,
        });
        Ok(())
    }

    fn detect(&mut self, window: &[f32]) -> Option<f64> {
        let threshold = self.threshold;
        let state = self.state.as_mut()?;

        if window.len() < state.min_window() {
            return None;
        }
        let lags = state.lags();
        let span = window.len() - lags;

        let mut signal = window.to_vec();
        remove_dc_offset(&mut signal);

        let correlator = match state.correlator.take() {
            Some(c) if c.fits(span, lags) => c,
            _ => Correlator::new(span, lags),
        };
        let correlator = state.correlator.insert(correlator);
        let products = correlator.lagged_products(&signal, span, lags);

        let cmnd = cumulative_mean_normalized_difference(&signal, &products, span, lags);
        let period = first_dip(&cmnd, state.tau_min, state.tau_max, threshold)?;
        let refined = parabolic_interpolation(&cmnd, period);

        let frequency = state.sample_rate as f64 / refined;
        (frequency.is_finite() && frequency > 0.0).then_some(frequency)
    }

    fn min_window(&self) -> usize {
        self.state.as_ref().map_or(0, YinState::min_window)
    }
}

impl YinState {
    /// Lags examined: the search range plus one on each side for interpolation.
    fn lags(&self) -> usize {
        self.tau_max + 2
    }

    /// The difference function needs at least as many samples as lags.
    fn min_window(&self) -> usize {
        self.lags() * 2
    }
}

/// YIN steps 2 and 3: difference function from lagged products, then
/// normalization by its running mean.
fn cumulative_mean_normalized_difference(
    signal: &[f32],
    products: &[f32],
    span: usize,
    lags: usize,
) -> Vec<f32> {
    // prefix[i] = sum of squares of signal[..i]
    let mut prefix = Vec::with_capacity(signal.len() + 1);
    prefix.push(0.0_f64);
    for &s in signal {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + (s as f64) * (s as f64));
    }
    let energy = |start: usize| prefix[start + span] - prefix[start];

    let e0 = energy(0);
    let mut cmnd = vec![1.0_f32; lags];
    let mut running_sum = 0.0_f64;
    for tau in 1..lags {
        let diff = (e0 + energy(tau) - 2.0 * products[tau] as f64).max(0.0);
        running_sum += diff;
        cmnd[tau] = if running_sum > 0.0 {
            (diff * tau as f64 / running_sum) as f32
        } else {
            1.0
        };
    }
    cmnd
}

/// YIN step 4: the first lag under `threshold`, followed down to the bottom
/// of its dip. Taking the first dip rather than the global minimum avoids
/// reporting multiples of the period.
fn first_dip(cmnd: &[f32], tau_min: usize, tau_max: usize, threshold: f32) -> Option<usize> {
    let mut tau = tau_min;
    while tau <= tau_max {
        if cmnd[tau] < threshold {
            while tau < tau_max && cmnd[tau + 1] < cmnd[tau] {
                tau += 1;
            }
            return Some(tau);
        }
        tau += 1;
    }
    None
}

/// YIN step 5: refine the period between neighbouring lags.
fn parabolic_interpolation(cmnd: &[f32], tau: usize) -> f64 {
    if tau == 0 || tau + 1 >= cmnd.len() {
        return tau as f64;
    }
    let y1 = cmnd[tau - 1] as f64;
    let y2 = cmnd[tau] as f64;
    let y3 = cmnd[tau + 1] as f64;
    let denominator = y1 - 2.0 * y2 + y3;
    if denominator.abs() < 1e-12 {
        return tau as f64;
    }
    tau as f64 + (y1 - y3) / (2.0 * denominator)
}
