//! Tuner settings, defaults and TOML loading.
//!
//! Every section is `#[serde(default)]`, so a config file only needs the
//! keys it overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::pitch::DEFAULT_YIN_THRESHOLD;

/// Capture settings handed to the audio backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Requested sample rate in Hz. The backend reports the rate it got.
    pub sample_rate: u32,
    /// Input device name; `None` or `"default"` selects the system default.
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            device: None,
        }
    }
}

/// Pitch estimator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Samples per analysis window. Must hold several periods of the low E
    /// string (~535 samples at 44.1 kHz).
    pub window_size: usize,
    /// Windows with RMS energy below this are treated as silence.
    pub noise_gate_rms: f32,
    /// Detector search band, in Hz.
    pub min_detect_hz: f64,
    pub max_detect_hz: f64,
    /// YIN absolute threshold (0.0–1.0). Higher accepts weaker periodicity.
    pub yin_threshold: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            window_size: 4096,
            noise_gate_rms: 0.01,
            min_detect_hz: 70.0,
            max_detect_hz: 500.0,
            yin_threshold: DEFAULT_YIN_THRESHOLD,
        }
    }
}

/// Stability and wait timing for a tuning session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long the same string must be held before a reading is reported.
    pub dwell_ms: u64,
    /// Upper bound between stability re-checks while waiting.
    pub poll_interval_ms: u64,
    /// Wait timeout used when the caller does not give one.
    pub default_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dwell_ms: 400,
            poll_interval_ms: 50,
            default_timeout_ms: 30_000,
        }
    }
}

impl SessionConfig {
    /// How long a string must be held.
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    /// Re-check interval while waiting, never zero.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Wait timeout when the caller gives none.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Top-level tuner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub audio: AudioConfig,
    pub estimator: EstimatorConfig,
    pub session: SessionConfig,
}

impl TunerConfig {
    /// Reads a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parses a TOML document; missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
