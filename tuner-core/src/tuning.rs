//! # Musical Tuning Module
//!
//! Equal-temperament note math for the guitar tuner: note construction from
//! pitch-class spelling and octave, frequency derivation from the A4 reference,
//! and cent deviation measurements.
//!
//! Frequencies are rounded to two decimals when a [`Note`] is built. Matching
//! and the reference values (82.41 Hz, 110.00 Hz, 329.63 Hz...) depend on that
//! rounding, so never compare against unrounded equal-temperament values.

use serde::Serialize;
use thiserror::Error;

/// Reference pitch (A4) in Hz.
pub const REFERENCE_FREQUENCY: f64 = 440.0;

/// MIDI-style index of the reference pitch.
pub const REFERENCE_INDEX: i32 = 69;

/// Lowest frequency the matcher will consider, in Hz.
pub const MIN_GUITAR_FREQUENCY: f64 = 70.0;

/// Highest frequency the matcher will consider, in Hz.
pub const MAX_GUITAR_FREQUENCY: f64 = 1500.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NoteError {
    #[error("unknown pitch class: {0}")]
    UnknownPitchClass(String),
}

/// A single musical note. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    /// Pitch-class spelling as given (e.g. "E", "Eb", "F#").
    pub name: String,
    pub octave: i32,
    /// Monotonic pitch index, same numbering as MIDI (A4 = 69).
    pub index: i32,
    /// Frequency in Hz, rounded to 2 decimals.
    pub frequency: f64,
}

impl Note {
    /// Builds a note from its pitch-class spelling and octave.
    ///
    /// Accepts naturals plus a single `#` or `b` accidental, so "Eb2" and
    /// "D#2" resolve to the same index while keeping their own spelling.
    pub fn new(name: &str, octave: i32) -> Result<Self, NoteError> {
        let pitch_class = pitch_class(name)?;
        let index = (octave + 1) * 12 + pitch_class;
        Ok(Self {
            name: name.to_string(),
            octave,
            index,
            frequency: note_frequency(index),
        })
    }

    /// Full name including octave, e.g. "A2".
    pub fn full_name(&self) -> String {
        format!("{}{}", self.name, self.octave)
    }
}

/// Semitone offset of a pitch-class spelling from C of the same octave.
fn pitch_class(name: &str) -> Result<i32, NoteError> {
    let mut chars = name.chars();
    let base = match chars.next() {
        Some('C') => 0,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => return Err(NoteError::UnknownPitchClass(name.to_string())),
    };
    let accidental = match chars.as_str() {
        "" => 0,
        "#" => 1,
        "b" => -1,
        _ => return Err(NoteError::UnknownPitchClass(name.to_string())),
    };
    // Cb and B# deliberately cross the octave boundary.
    Ok(base + accidental)
}

/// Equal-temperament frequency of a pitch index, rounded to 2 decimals.
///
/// `f = 440 * 2^((index - 69) / 12)`
pub fn note_frequency(index: i32) -> f64 {
    let raw = REFERENCE_FREQUENCY * 2.0_f64.powf((index - REFERENCE_INDEX) as f64 / 12.0);
    round_to(raw, 2)
}

/// Calculates the deviation from a target frequency in cents.
///
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn cents(detected: f64, target: f64) -> f64 {
    1200.0 * (detected / target).log2()
}

/// Rounds half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10.0_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Whether a frequency lies in the plausible range of a guitar string
/// (fundamentals and the first overtones a detector may lock onto).
pub fn in_guitar_range(frequency: f64) -> bool {
    (MIN_GUITAR_FREQUENCY..=MAX_GUITAR_FREQUENCY).contains(&frequency)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_indices_match_known_frequencies() {
        assert_eq!(note_frequency(69), 440.0);
        assert_eq!(note_frequency(40), 82.41);
        assert_eq!(note_frequency(45), 110.0);
        assert_eq!(note_frequency(50), 146.83);
        assert_eq!(note_frequency(55), 196.0);
        assert_eq!(note_frequency(59), 246.94);
        assert_eq!(note_frequency(64), 329.63);
    }

    #[test]
    fn frequency_is_rounded_equal_temperament_across_range() {
        for index in 21..=108 {
            let expected = 440.0 * 2.0_f64.powf((index - 69) as f64 / 12.0);
            let expected = (expected * 100.0).round() / 100.0;
            assert_eq!(note_frequency(index), expected, "index {index}");
        }
    }

    #[test]
    fn note_spelling_resolves_index() {
        let e2 = Note::new("E", 2).unwrap();
        assert_eq!(e2.index, 40);
        assert_eq!(e2.frequency, 82.41);
        assert_eq!(e2.full_name(), "E2");

        let eb2 = Note::new("Eb", 2).unwrap();
        let ds2 = Note::new("D#", 2).unwrap();
        assert_eq!(eb2.index, 39);
        assert_eq!(eb2.index, ds2.index);
        assert_eq!(eb2.full_name(), "Eb2");

        assert_eq!(Note::new("Cb", 4).unwrap().index, Note::new("B", 3).unwrap().index);
    }

    #[test]
    fn unknown_spelling_is_rejected() {
        assert!(Note::new("H", 2).is_err());
        assert!(Note::new("E##", 2).is_err());
        assert!(Note::new("", 2).is_err());
    }

    #[test]
    fn cents_identities() {
        for f in [70.0, 82.41, 110.0, 440.0, 1234.5] {
            assert!(cents(f, f).abs() < 1e-9);
            assert!((cents(2.0 * f, f) - 1200.0).abs() < 1e-9);
            assert!((cents(f, 2.0 * f) + 1200.0).abs() < 1e-9);
        }
    }

    #[test]
    fn guitar_range_bounds() {
        assert!(!in_guitar_range(69.99));
        assert!(in_guitar_range(70.0));
        assert!(in_guitar_range(1500.0));
        assert!(!in_guitar_range(1500.01));
    }
}
