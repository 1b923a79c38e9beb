//! # Musical Tuning Module
//!
//! Maps detected frequencies onto the chromatic scale and onto the strings of
//! the active instrument tuning.
//!
//! ## Features
//! - Equal temperament note mapping against a configurable A4 reference
//! - Cents deviation, always clamped to ±50
//! - Instrument tuning presets (ukulele family and guitar)
//! - Nearest-string matching with switch hysteresis
//! - Tuning status classification (flat / sharp / close / in tune)

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, TunerError};

/// Sharp-spelled pitch class names, indexed by pitch class (C = 0).
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Largest cents deviation ever reported.
pub const CENTS_LIMIT: f32 = 50.0;

/// In-tune window for the standard mode.
pub const STANDARD_IN_TUNE_CENTS: f32 = 6.0;

/// In-tune window for precision mode.
pub const PRECISION_IN_TUNE_CENTS: f32 = 2.0;

/// Readings inside this window (but outside the in-tune window) are `Close`.
pub const CLOSE_CENTS: f32 = 15.0;

/// Default hysteresis applied before switching to a different target string.
pub const STRING_SWITCH_HYSTERESIS_CENTS: f32 = 4.0;

/// Lookup from spelled note names (sharps and flats) to pitch classes.
static NOTE_MAP: Lazy<BTreeMap<&'static str, u8>> = Lazy::new(|| {
    let mut map: BTreeMap<&'static str, u8> = NOTE_NAMES
        .iter()
        .enumerate()
        .map(|(pc, &name)| (name, pc as u8))
        .collect();
    for (name, pc) in [("Db", 1), ("Eb", 3), ("Gb", 6), ("Ab", 8), ("Bb", 10)] {
        map.insert(name, pc);
    }
    map
});

/// Built-in instrument tunings, computed once.
static PRESETS: Lazy<Vec<Tuning>> = Lazy::new(|| {
    let build = |id: &str, name: &str, strings: &[&str]| Tuning {
        id: id.to_string(),
        name: name.to_string(),
        strings: strings
            .iter()
            .map(|s| TuningString::parse(s).expect("preset notes are well formed"))
            .collect(),
    };
    vec![
        build("ukulele-standard", "Ukulele standard (GCEA)", &["G4", "C4", "E4", "A4"]),
        build("ukulele-low-g", "Ukulele low G", &["G3", "C4", "E4", "A4"]),
        build("ukulele-d", "Ukulele D tuning (ADF#B)", &["A4", "D4", "F#4", "B4"]),
        build("baritone", "Baritone ukulele (DGBE)", &["D3", "G3", "B3", "E4"]),
        build(
            "guitar-standard",
            "Guitar standard (EADGBE)",
            &["E2", "A2", "D3", "G3", "B3", "E4"],
        ),
    ]
});

/// The chromatic note nearest to a detected frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteInfo {
    /// Pitch class name, sharp spelling.
    pub name: &'static str,
    /// Scientific pitch octave (A4 = 440 Hz lives in octave 4).
    pub octave: i32,
    /// Pitch class, 0 (C) to 11 (B).
    pub pitch_class: u8,
    /// MIDI note number of the nearest semitone.
    pub midi: i32,
    /// Deviation from the nearest semitone, clamped to ±50.
    pub cents: f32,
    /// The detected frequency that produced this note.
    pub frequency_hz: f32,
    /// Equal-tempered frequency of the nearest semitone.
    pub target_frequency_hz: f32,
}

impl NoteInfo {
    /// Note name with octave, e.g. `"A4"`.
    pub fn label(&self) -> String {
        format!("{}{}", self.name, self.octave)
    }
}

/// One string of an instrument tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningString {
    /// Pitch class, 0 (C) to 11 (B).
    pub pitch_class: u8,
    /// Scientific pitch octave.
    pub octave: i32,
}

impl TuningString {
    /// Parses a note label such as `"G4"`, `"F#4"` or `"Bb3"`.
    pub fn parse(label: &str) -> Result<Self> {
        let split = label
            .find(|c: char| c.is_ascii_digit() || c == '-')
            .ok_or_else(|| TunerError::Config(format!("note `{label}` has no octave")))?;
        let (name, octave) = label.split_at(split);
        let pitch_class = *NOTE_MAP
            .get(name)
            .ok_or_else(|| TunerError::Config(format!("unknown note name `{name}`")))?;
        let octave = octave
            .parse::<i32>()
            .map_err(|_| TunerError::Config(format!("bad octave in `{label}`")))?;
        Ok(Self { pitch_class, octave })
    }

    /// MIDI note number of the open string.
    pub fn midi(&self) -> i32 {
        (self.octave + 1) * 12 + self.pitch_class as i32
    }

    /// Target frequency of the open string for the given A4 reference.
    pub fn frequency(&self, a4_reference: f32) -> f32 {
        midi_to_frequency(self.midi(), a4_reference)
    }

    /// Label such as `"G4"`.
    pub fn label(&self) -> String {
        format!("{}{}", NOTE_NAMES[self.pitch_class as usize], self.octave)
    }
}

/// A named instrument tuning: the ordered list of open strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuning {
    /// Stable identifier, used on the command line and in config files.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Open strings, in playing order.
    pub strings: Vec<TuningString>,
}

impl Default for Tuning {
    fn default() -> Self {
        PRESETS[0].clone()
    }
}

/// All built-in tunings.
pub fn presets() -> &'static [Tuning] {
    &PRESETS
}

/// Looks up a built-in tuning by its id.
pub fn preset(id: &str) -> Option<Tuning> {
    PRESETS.iter().find(|t| t.id == id).cloned()
}

/// The string a reading is being tuned against.
#[derive(Debug, Clone, PartialEq)]
pub struct StringMatch {
    /// Index into `Tuning::strings`.
    pub string_index: usize,
    /// Label of the string's target note.
    pub string_name: String,
    /// Deviation from the string's target, clamped to ±50.
    pub cents_from_target: f32,
    /// Target frequency of the string.
    pub target_frequency_hz: f32,
}

/// Tuning status shown to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TuningStatus {
    /// No reading.
    Silent,
    /// Below the target, outside the close window.
    Flat,
    /// Above the target, outside the close window.
    Sharp,
    /// Within the active in-tune threshold.
    InTune,
    /// Within the close window but not yet in tune.
    Close,
}

impl TuningStatus {
    /// Lower-case label for logs and spoken feedback.
    pub fn as_str(&self) -> &'static str {
        match self {
            TuningStatus::Silent => "silent",
            TuningStatus::Flat => "flat",
            TuningStatus::Sharp => "sharp",
            TuningStatus::InTune => "in tune",
            TuningStatus::Close => "close",
        }
    }
}

/// Converts a MIDI note number to a frequency for the given A4 reference.
pub fn midi_to_frequency(midi: i32, a4_reference: f32) -> f32 {
    a4_reference * 2.0_f32.powf((midi - 69) as f32 / 12.0)
}

/// Calculates the deviation from a target frequency in cents.
///
/// Positive values are sharp, negative values flat. Not clamped.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Clamps a cents value into the reportable ±50 range.
pub fn clamp_cents(cents: f32) -> f32 {
    cents.clamp(-CENTS_LIMIT, CENTS_LIMIT)
}

/// Maps a frequency to the nearest chromatic note.
///
/// # Arguments
/// * `freq` - Detected frequency in Hz
/// * `a4_reference` - Frequency of A4 in Hz (usually 440)
///
/// # Returns
/// * `Some(note)` - Nearest note with cents deviation
/// * `None` - Frequency or reference is not a positive finite number
pub fn map_frequency(freq: f32, a4_reference: f32) -> Option<NoteInfo> {
    if !freq.is_finite() || freq <= 0.0 || !a4_reference.is_finite() || a4_reference <= 0.0 {
        return None;
    }
    let midi_exact = 69.0 + 12.0 * (freq / a4_reference).log2();
    let midi = midi_exact.round() as i32;
    let pitch_class = midi.rem_euclid(12) as u8;

    Some(NoteInfo {
        name: NOTE_NAMES[pitch_class as usize],
        octave: midi.div_euclid(12) - 1,
        pitch_class,
        midi,
        cents: clamp_cents((midi_exact - midi as f32) * 100.0),
        frequency_hz: freq,
        target_frequency_hz: midi_to_frequency(midi, a4_reference),
    })
}

/// Matches a note against one specific string of the tuning.
pub fn match_string(
    note: &NoteInfo,
    tuning: &Tuning,
    string_index: usize,
    a4_reference: f32,
) -> Option<StringMatch> {
    let string = tuning.strings.get(string_index)?;
    let target = string.frequency(a4_reference);
    Some(StringMatch {
        string_index,
        string_name: string.label(),
        cents_from_target: clamp_cents(calculate_cents_deviation(note.frequency_hz, target)),
        target_frequency_hz: target,
    })
}

/// Finds the tuning string closest to the detected note.
///
/// When a previous target exists and the nominally closer string is no more
/// than `switch_hysteresis_cents` closer than it, the previous string is kept.
/// This stops the target from flapping when a note sits near the midpoint
/// between two strings.
///
/// # Returns
/// * `Some(match)` - Chosen string and deviation from it
/// * `None` - The tuning has no strings
pub fn find_nearest_string_with_hysteresis(
    note: &NoteInfo,
    tuning: &Tuning,
    previous_string_index: Option<usize>,
    switch_hysteresis_cents: f32,
    a4_reference: f32,
) -> Option<StringMatch> {
    let distances: Vec<f32> = tuning
        .strings
        .iter()
        .map(|s| calculate_cents_deviation(note.frequency_hz, s.frequency(a4_reference)).abs())
        .collect();

    let best = distances
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)?;

    let chosen = match previous_string_index {
        Some(prev) if prev != best && prev < distances.len() => {
            if distances[prev] - distances[best] <= switch_hysteresis_cents {
                prev
            } else {
                best
            }
        }
        _ => best,
    };

    match_string(note, tuning, chosen, a4_reference)
}

/// Classifies a clamped cents deviation.
///
/// # Arguments
/// * `cents` - Deviation from the target, or `None` when there is no reading
/// * `in_tune_threshold` - Active in-tune window (6¢ standard, 2¢ precision)
pub fn tuning_status(cents: Option<f32>, in_tune_threshold: f32) -> TuningStatus {
    match cents {
        None => TuningStatus::Silent,
        Some(c) if c.abs() <= in_tune_threshold => TuningStatus::InTune,
        Some(c) if c.abs() <= CLOSE_CENTS => TuningStatus::Close,
        Some(c) if c < 0.0 => TuningStatus::Flat,
        Some(_) => TuningStatus::Sharp,
    }
}
