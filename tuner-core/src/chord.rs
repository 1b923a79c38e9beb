//! Chord recognition from a set of pitch classes.
//!
//! Every pitch class of the input is tried as a root; the intervals above it
//! are compared against an ordered formula catalog. The result is a sum type
//! so callers can tell "nothing was played" from "nothing matched".

use std::fmt::Display;

use crate::tuning::NOTE_NAMES;

/// Chord qualities known to the catalog.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChordQuality {
    /// Major triad (C-E-G)
    Major,
    /// Minor triad (C-Eb-G)
    Minor,
    /// Diminished triad (C-Eb-Gb)
    Diminished,
    /// Augmented triad (C-E-G#)
    Augmented,
    /// Suspended second (C-D-G)
    SuspendedSecond,
    /// Suspended fourth (C-F-G)
    SuspendedFourth,
    /// Major sixth (C-E-G-A)
    Sixth,
    /// Minor sixth (C-Eb-G-A)
    MinorSixth,
    /// Dominant seventh (C-E-G-Bb)
    DominantSeventh,
    /// Major seventh (C-E-G-B)
    MajorSeventh,
    /// Minor seventh (C-Eb-G-Bb)
    MinorSeventh,
    /// Minor-major seventh (C-Eb-G-B)
    MinorMajorSeventh,
    /// Half diminished (C-Eb-Gb-Bb)
    HalfDiminished,
    /// Diminished seventh (C-Eb-Gb-A)
    DiminishedSeventh,
    /// Seventh suspended fourth (C-F-G-Bb)
    SeventhSuspendedFourth,
    /// Augmented seventh (C-E-G#-Bb)
    AugmentedSeventh,
    /// Added ninth (C-D-E-G)
    AddNine,
    /// Minor added ninth (C-D-Eb-G)
    MinorAddNine,
    /// Dominant ninth (C-D-E-G-Bb)
    Ninth,
    /// Major ninth (C-D-E-G-B)
    MajorNinth,
    /// Minor ninth (C-D-Eb-G-Bb)
    MinorNinth,
}

impl Display for ChordQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One catalog entry: a quality, its chord-symbol suffix and its intervals.
#[derive(Debug, Clone, Copy)]
pub struct ChordFormula {
    /// Quality named by this formula.
    pub quality: ChordQuality,
    /// Suffix appended to the root name, e.g. `"m7"`.
    pub suffix: &'static str,
    /// Semitone intervals above the root, root included.
    pub intervals: &'static [u8],
}

impl ChordFormula {
    const fn new(quality: ChordQuality, suffix: &'static str, intervals: &'static [u8]) -> Self {
        Self {
            quality,
            suffix,
            intervals,
        }
    }

    fn mask(&self) -> u16 {
        self.intervals.iter().fold(0u16, |m, &i| m | 1 << i)
    }
}

/// Formula catalog. Order is priority: triads, then sixths and sevenths,
/// then extended chords.
pub const CHORD_FORMULAS: &[ChordFormula] = &[
    ChordFormula::new(ChordQuality::Major, "", &[0, 4, 7]),
    ChordFormula::new(ChordQuality::Minor, "m", &[0, 3, 7]),
    ChordFormula::new(ChordQuality::Diminished, "dim", &[0, 3, 6]),
    ChordFormula::new(ChordQuality::Augmented, "aug", &[0, 4, 8]),
    ChordFormula::new(ChordQuality::SuspendedSecond, "sus2", &[0, 2, 7]),
    ChordFormula::new(ChordQuality::SuspendedFourth, "sus4", &[0, 5, 7]),
    ChordFormula::new(ChordQuality::Sixth, "6", &[0, 4, 7, 9]),
    ChordFormula::new(ChordQuality::MinorSixth, "m6", &[0, 3, 7, 9]),
    ChordFormula::new(ChordQuality::DominantSeventh, "7", &[0, 4, 7, 10]),
    ChordFormula::new(ChordQuality::MajorSeventh, "maj7", &[0, 4, 7, 11]),
    ChordFormula::new(ChordQuality::MinorSeventh, "m7", &[0, 3, 7, 10]),
    ChordFormula::new(ChordQuality::MinorMajorSeventh, "mMaj7", &[0, 3, 7, 11]),
    ChordFormula::new(ChordQuality::HalfDiminished, "m7b5", &[0, 3, 6, 10]),
    ChordFormula::new(ChordQuality::DiminishedSeventh, "dim7", &[0, 3, 6, 9]),
    ChordFormula::new(ChordQuality::SeventhSuspendedFourth, "7sus4", &[0, 5, 7, 10]),
    ChordFormula::new(ChordQuality::AugmentedSeventh, "aug7", &[0, 4, 8, 10]),
    ChordFormula::new(ChordQuality::AddNine, "add9", &[0, 2, 4, 7]),
    ChordFormula::new(ChordQuality::MinorAddNine, "madd9", &[0, 2, 3, 7]),
    ChordFormula::new(ChordQuality::Ninth, "9", &[0, 2, 4, 7, 10]),
    ChordFormula::new(ChordQuality::MajorNinth, "maj9", &[0, 2, 4, 7, 11]),
    ChordFormula::new(ChordQuality::MinorNinth, "m9", &[0, 2, 3, 7, 10]),
];

/// A recognized chord.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordResult {
    /// Chord symbol, e.g. `"Am7"`.
    pub name: String,
    /// Note names in formula order, root first.
    pub notes: Vec<&'static str>,
    /// Root pitch class.
    pub root: u8,
    /// Chord quality.
    pub quality: ChordQuality,
}

impl ChordResult {
    /// Pitch classes of the chord tones.
    pub fn pitch_classes(&self) -> Vec<u8> {
        self.notes
            .iter()
            .filter_map(|n| NOTE_NAMES.iter().position(|x| x == n))
            .map(|pc| pc as u8)
            .collect()
    }
}

/// Outcome of a chord lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionResult {
    /// No pitch classes were supplied.
    NoSelection,
    /// Pitch classes were supplied but no formula matches them.
    NotFound,
    /// A formula matched.
    ChordFound(ChordResult),
}

impl DetectionResult {
    /// The chord, if one was found.
    pub fn chord(&self) -> Option<&ChordResult> {
        match self {
            DetectionResult::ChordFound(chord) => Some(chord),
            DetectionResult::NoSelection | DetectionResult::NotFound => None,
        }
    }
}

/// Stateless interval-matching chord recognizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChordDetector;

impl ChordDetector {
    /// Identifies the chord formed by a set of pitch classes.
    ///
    /// Duplicates are ignored and values are taken modulo 12. When several
    /// roots produce a match, `preferred_root` wins if it is one of them;
    /// otherwise the earliest catalog formula wins, then the lowest root.
    pub fn detect(pitch_classes: &[u8], preferred_root: Option<u8>) -> DetectionResult {
        let set = pitch_classes.iter().fold(0u16, |m, &pc| m | 1 << (pc % 12));
        if set == 0 {
            return DetectionResult::NoSelection;
        }

        // (formula index, root) for every root that matches some formula.
        let matches: Vec<(usize, u8)> = (0..12u8)
            .filter(|root| set & (1 << root) != 0)
            .filter_map(|root| {
                let relative = rotate_down(set, root);
                CHORD_FORMULAS
                    .iter()
                    .position(|f| f.mask() == relative)
                    .map(|idx| (idx, root))
            })
            .collect();

        let preferred = preferred_root
            .map(|r| r % 12)
            .and_then(|r| matches.iter().find(|(_, root)| *root == r));

        match preferred.or_else(|| matches.iter().min()) {
            Some(&(idx, root)) => {
                DetectionResult::ChordFound(build_result(&CHORD_FORMULAS[idx], root))
            }
            None => DetectionResult::NotFound,
        }
    }
}

/// Re-expresses a pitch-class mask relative to `root`.
fn rotate_down(set: u16, root: u8) -> u16 {
    let root = root as u32;
    ((set >> root) | (set << (12 - root))) & 0x0FFF
}

fn build_result(formula: &ChordFormula, root: u8) -> ChordResult {
    ChordResult {
        name: format!("{}{}", NOTE_NAMES[root as usize], formula.suffix),
        notes: formula
            .intervals
            .iter()
            .map(|&i| NOTE_NAMES[((root + i) % 12) as usize])
            .collect(),
        root,
        quality: formula.quality,
    }
}
