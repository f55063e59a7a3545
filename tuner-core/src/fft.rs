//! # Fast Fourier Transform (FFT) Module
//!
//! FFT helpers for the pitch detector. The YIN difference function needs the
//! lagged products `r(tau) = sum x[i] * x[i + tau]` for every candidate
//! period; computing them through a forward/inverse FFT pair keeps a 4096
//! sample window at O(n log n) instead of O(n^2).

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Removes the DC offset from a signal by making its average value zero.
///
/// A microphone bias shifts every lagged product by a constant and flattens
/// the dips YIN is looking for.
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Cached FFT plans for computing lagged products of one window length.
pub struct Correlator {
    size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    head: Vec<Complex<f32>>,
    full: Vec<Complex<f32>>,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator").field("size", &self.size).finish()
    }
}

impl Correlator {
    /// Plans transforms large enough for `span + lags` samples without
    /// circular wrap-around.
    pub fn new(span: usize, lags: usize) -> Self {
        let size = (span + lags).next_power_of_two();
        let mut planner = FftPlanner::new();
        Self {
            size,
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
            head: vec![Complex::default(); size],
            full: vec![Complex::default(); size],
        }
    }

    /// Whether this plan fits a request of `span` samples and `lags` lags.
    pub fn fits(&self, span: usize, lags: usize) -> bool {
        span + lags <= self.size
    }

    /// Returns `r(tau) = sum_{i < span} signal[i] * signal[i + tau]` for
    /// `tau` in `0..lags`. Samples past the end of `signal` count as zero.
    pub fn lagged_products(&mut self, signal: &[f32], span: usize, lags: usize) -> Vec<f32> {
        debug_assert!(self.fits(span, lags));
        let used = signal.len().min(span + lags);

        for (i, slot) in self.head.iter_mut().enumerate() {
            let re = if i < span && i < used { signal[i] } else { 0.0 };
            *slot = Complex { re, im: 0.0 };
        }
        for (i, slot) in self.full.iter_mut().enumerate() {
            let re = if i < used { signal[i] } else { 0.0 };
            *slot = Complex { re, im: 0.0 };
        }

        self.forward.process(&mut self.head);
        self.forward.process(&mut self.full);

        // Cross-correlation: conj(A) * B in the frequency domain.
        for (a, b) in self.head.iter_mut().zip(self.full.iter()) {
            *a = a.conj() * b;
        }
        self.inverse.process(&mut self.head);

        // rustfft leaves the inverse unnormalized.
        let scale = 1.0 / self.size as f32;
        self.head.iter().take(lags).map(|c| c.re * scale).collect()
    }
}
