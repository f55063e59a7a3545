//! # Tuning Catalog
//!
//! Fixed, read-only table of guitar tunings. Each preset maps the six string
//! positions (1 = high E side, 6 = low E side) to a target [`Note`].

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::tuning::Note;

/// Id used when a caller does not name a tuning.
pub const DEFAULT_TUNING_ID: &str = "standard";

/// One string of a tuning preset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuitarString {
    /// 1..=6, 1 being the highest-pitched string.
    pub position: u8,
    pub note: Note,
}

/// A named tuning. Always exactly six strings, positions 1..=6.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningPreset {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Conventionally ordered 6 → 1.
    pub strings: [GuitarString; 6],
}

impl TuningPreset {
    /// Looks up a string by position.
    pub fn string(&self, position: u8) -> Option<&GuitarString> {
        self.strings.iter().find(|s| s.position == position)
    }
}

/// Spellings for strings 6 → 1.
type Spelling = [(&'static str, i32); 6];

const PRESETS: [(&str, &str, &str, Spelling); 6] = [
    (
        "standard",
        "Standard",
        "E A D G B E, the default six-string tuning",
        [("E", 2), ("A", 2), ("D", 3), ("G", 3), ("B", 3), ("E", 4)],
    ),
    (
        "drop_d",
        "Drop D",
        "Standard with the low E dropped a whole step to D",
        [("D", 2), ("A", 2), ("D", 3), ("G", 3), ("B", 3), ("E", 4)],
    ),
    (
        "half_step_down",
        "Half Step Down",
        "Every string lowered one semitone (Eb Ab Db Gb Bb Eb)",
        [("Eb", 2), ("Ab", 2), ("Db", 3), ("Gb", 3), ("Bb", 3), ("Eb", 4)],
    ),
    (
        "open_g",
        "Open G",
        "D G D G B D, strums a G major chord open",
        [("D", 2), ("G", 2), ("D", 3), ("G", 3), ("B", 3), ("D", 4)],
    ),
    (
        "open_d",
        "Open D",
        "D A D F# A D, strums a D major chord open",
        [("D", 2), ("A", 2), ("D", 3), ("F#", 3), ("A", 3), ("D", 4)],
    ),
    (
        "dadgad",
        "DADGAD",
        "D A D G A D, a modal tuning common in Celtic music",
        [("D", 2), ("A", 2), ("D", 3), ("G", 3), ("A", 3), ("D", 4)],
    ),
];

static CATALOG: Lazy<Vec<TuningPreset>> = Lazy::new(|| {
    PRESETS
        .iter()
        .map(|&(id, name, description, spelling)| TuningPreset {
            id,
            name,
            description,
            strings: std::array::from_fn(|i| {
                let (pitch, octave) = spelling[i];
                GuitarString {
                    position: 6 - i as u8,
                    // The table above only uses plain and single-accidental spellings.
                    note: Note::new(pitch, octave).expect("catalog spelling is valid"),
                }
            }),
        })
        .collect()
});

/// Returns the preset with the given id.
pub fn get_by_id(id: &str) -> Option<&'static TuningPreset> {
    CATALOG.iter().find(|preset| preset.id == id)
}

/// Ids of every preset, in catalog order.
pub fn list_ids() -> Vec<&'static str> {
    CATALOG.iter().map(|preset| preset.id).collect()
}

/// All presets, in catalog order.
pub fn all() -> &'static [TuningPreset] {
    &CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_preset_has_positions_one_through_six() {
        for preset in all() {
            let mut positions: Vec<u8> = preset.strings.iter().map(|s| s.position).collect();
            positions.sort_unstable();
            assert_eq!(positions, vec![1, 2, 3, 4, 5, 6], "{}", preset.id);
        }
    }

    #[test]
    fn standard_matches_reference_frequencies() {
        let standard = get_by_id("standard").unwrap();
        let expected = [(6, 82.41), (5, 110.0), (4, 146.83), (3, 196.0), (2, 246.94), (1, 329.63)];
        for (position, frequency) in expected {
            assert_eq!(standard.string(position).unwrap().note.frequency, frequency);
        }
        assert_eq!(standard.string(1).unwrap().note.full_name(), "E4");
        assert_eq!(standard.string(6).unwrap().note.full_name(), "E2");
    }

    #[test]
    fn variants_alter_expected_strings() {
        let drop_d = get_by_id("drop_d").unwrap();
        assert_eq!(drop_d.string(6).unwrap().note.full_name(), "D2");
        assert_eq!(drop_d.string(6).unwrap().note.frequency, 73.42);
        assert_eq!(drop_d.string(5).unwrap().note.full_name(), "A2");

        let half = get_by_id("half_step_down").unwrap();
        assert_eq!(half.string(6).unwrap().note.full_name(), "Eb2");
        assert_eq!(half.string(6).unwrap().note.frequency, 77.78);

        let open_d = get_by_id("open_d").unwrap();
        assert_eq!(open_d.string(3).unwrap().note.full_name(), "F#3");

        let dadgad = get_by_id("dadgad").unwrap();
        let names: Vec<String> = dadgad.strings.iter().map(|s| s.note.name.clone()).collect();
        assert_eq!(names, vec!["D", "A", "D", "G", "A", "D"]);
    }

    #[test]
    fn lookup_and_listing() {
        assert_eq!(
            list_ids(),
            vec!["standard", "drop_d", "half_step_down", "open_g", "open_d", "dadgad"]
        );
        assert!(get_by_id(DEFAULT_TUNING_ID).is_some());
        assert!(get_by_id("nashville").is_none());
    }
}
