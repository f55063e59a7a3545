//! # Frequency Matcher
//!
//! Maps a detected frequency onto the nearest string of a [`TuningPreset`],
//! with a one-semitone lock guard and a single octave-up correction for
//! detectors that report the sub-octave of a fundamental-poor tone.
//!
//! ## Features
//! - Nearest-string search within one semitone
//! - Octave-up correction when no string matches directly
//! - Flat / sharp / in-tune classification with tuning advice
//! - [`PitchResult`] assembly for no-pitch, unmatched and matched readings

use serde::Serialize;

use crate::catalog::{GuitarString, TuningPreset};
use crate::tuning::{cents, in_guitar_range, round_to};

/// Largest deviation, in cents, at which a string may still be matched.
pub const MAX_MATCH_CENTS: f64 = 100.0;

/// Deviation, in cents, considered in tune.
pub const IN_TUNE_CENTS: f64 = 5.0;

/// A frequency matched to a string of the active tuning.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub position: u8,
    /// Target note with octave, e.g. "A2".
    pub note: String,
    pub target_frequency: f64,
    /// Signed deviation rounded to 0.1 cent, positive = sharp.
    pub cents: f64,
    /// The frequency the match was made with: raw, or doubled when
    /// `octave_corrected` is set.
    pub frequency: f64,
    pub octave_corrected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TuningStatus {
    Flat,
    Sharp,
    InTune,
}

/// Nearest string within [`MAX_MATCH_CENTS`] of `frequency`, with its
/// unrounded deviation.
fn nearest_string(frequency: f64, tuning: &TuningPreset) -> Option<(&GuitarString, f64)> {
    tuning
        .strings
        .iter()
        .map(|string| (string, cents(frequency, string.note.frequency)))
        .filter(|(_, deviation)| deviation.abs() <= MAX_MATCH_CENTS)
        .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
}

/// Finds the string a detected frequency belongs to.
///
/// A direct match always wins over an octave-corrected one. The corrected
/// search doubles the input exactly once. Returns `None` outside
/// 70–1500 Hz or when neither search lands within one semitone.
pub fn match_string(frequency: f64, tuning: &TuningPreset) -> Option<MatchResult> {
    if !frequency.is_finite() || !in_guitar_range(frequency) {
        return None;
    }

    let (used, octave_corrected, (string, deviation)) = match nearest_string(frequency, tuning) {
        Some(hit) => (frequency, false, hit),
        None => {
            let doubled = frequency * 2.0;
            (doubled, true, nearest_string(doubled, tuning)?)
        }
    };

    Some(MatchResult {
        position: string.position,
        note: string.note.full_name(),
        target_frequency: string.note.frequency,
        cents: round_to(deviation, 1),
        frequency: used,
        octave_corrected,
    })
}

/// In tune within ±[`IN_TUNE_CENTS`], otherwise flat or sharp by sign.
pub fn classify(cents: f64) -> TuningStatus {
    if cents.abs() <= IN_TUNE_CENTS {
        TuningStatus::InTune
    } else if cents < 0.0 {
        TuningStatus::Flat
    } else {
        TuningStatus::Sharp
    }
}

/// Human-readable instruction for a matched reading.
pub fn advice(status: TuningStatus, matched: &MatchResult) -> String {
    let position = matched.position;
    let note = &matched.note;
    let off = matched.cents.abs();
    match status {
        TuningStatus::InTune => format!("String {position} ({note}) is in tune!"),
        TuningStatus::Flat => {
            format!("String {position} ({note}) is {off:.1} cents flat: tune UP (tighten)")
        }
        TuningStatus::Sharp => {
            format!("String {position} ({note}) is {off:.1} cents sharp: tune DOWN (loosen)")
        }
    }
}

/// User-facing snapshot of one pitch reading against the active tuning.
///
/// Readings without a matched string carry `status: flat` by convention;
/// `in_tune` and `closest_string` are what callers should branch on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PitchResult {
    /// Hz, rounded to 0.01. This is the matched frequency when a string was
    /// found, otherwise the detected one.
    pub frequency: Option<f64>,
    pub note: Option<String>,
    pub target_frequency: Option<f64>,
    pub cents: Option<f64>,
    pub closest_string: Option<u8>,
    pub in_tune: bool,
    pub status: TuningStatus,
    pub octave_corrected: bool,
    pub advice: String,
}

impl PitchResult {
    /// A result carrying no measurement, only advice.
    pub fn empty(advice: impl Into<String>) -> Self {
        Self {
            frequency: None,
            note: None,
            target_frequency: None,
            cents: None,
            closest_string: None,
            in_tune: false,
            status: TuningStatus::Flat,
            octave_corrected: false,
            advice: advice.into(),
        }
    }
}

pub const NO_PITCH_ADVICE: &str = "No pitch detected. Play a single string and let it ring.";

/// Composes matching and classification into a [`PitchResult`].
pub fn build_pitch_result(frequency: Option<f64>, tuning: &TuningPreset) -> PitchResult {
    let Some(detected) = frequency else {
        return PitchResult::empty(NO_PITCH_ADVICE);
    };

    let Some(matched) = match_string(detected, tuning) else {
        let rounded = round_to(detected, 2);
        return PitchResult {
            frequency: Some(rounded),
            ..PitchResult::empty(format!(
                "Detected {rounded:.2} Hz, which does not match any string in {}",
                tuning.name
            ))
        };
    };

    let status = classify(matched.cents);
    PitchResult {
        frequency: Some(round_to(matched.frequency, 2)),
        note: Some(matched.note.clone()),
        target_frequency: Some(matched.target_frequency),
        cents: Some(matched.cents),
        closest_string: Some(matched.position),
        in_tune: status == TuningStatus::InTune,
        status,
        octave_corrected: matched.octave_corrected,
        advice: advice(status, &matched),
    }
}
