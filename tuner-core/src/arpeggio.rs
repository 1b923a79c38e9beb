//! Chord recognition from notes plucked one after another.
//!
//! Every valid monophonic reading contributes its pitch class with a
//! timestamp. Entries older than the window are pruned, and the distinct
//! pitch classes left over are handed to [`ChordDetector`].

use std::collections::VecDeque;

use crate::chord::{ChordDetector, DetectionResult};

/// How long a plucked note stays part of an arpeggio.
pub const ARPEGGIO_WINDOW_MS: u64 = 3000;

/// Distinct pitch classes needed before a lookup is attempted.
pub const ARPEGGIO_MIN_PITCH_CLASSES: usize = 3;

/// Rolling window of plucked pitch classes.
#[derive(Debug, Clone)]
pub struct ArpeggioDetector {
    window_ms: u64,
    entries: VecDeque<(u64, u8)>,
}

impl Default for ArpeggioDetector {
    fn default() -> Self {
        Self::new(ARPEGGIO_WINDOW_MS)
    }
}

impl ArpeggioDetector {
    /// Creates a detector with the given window.
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            entries: VecDeque::new(),
        }
    }

    /// Records a pitch class heard at `timestamp_ms`.
    ///
    /// Consecutive readings of the same pitch class only refresh the latest
    /// entry's timestamp, so a sustained note does not flood the window.
    pub fn add(&mut self, pitch_class: u8, timestamp_ms: u64) {
        let pitch_class = pitch_class % 12;
        match self.entries.back_mut() {
            Some((at, pc)) if *pc == pitch_class => *at = timestamp_ms,
            _ => self.entries.push_back((timestamp_ms, pitch_class)),
        }
        self.prune(timestamp_ms);
    }

    /// Drops entries older than the window as of `now_ms`.
    pub fn prune(&mut self, now_ms: u64) {
        while let Some(&(at, _)) = self.entries.front() {
            if now_ms.saturating_sub(at) > self.window_ms {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Distinct pitch classes in the window, most recent first.
    pub fn pitch_classes(&self) -> Vec<u8> {
        let mut seen = 0u16;
        self.entries
            .iter()
            .rev()
            .filter_map(|&(_, pc)| {
                let bit = 1u16 << pc;
                if seen & bit != 0 {
                    return None;
                }
                seen |= bit;
                Some(pc)
            })
            .collect()
    }

    /// Looks up the chord outlined by the window as of `now_ms`.
    pub fn detect(&mut self, now_ms: u64, preferred_root: Option<u8>) -> DetectionResult {
        self.prune(now_ms);
        let pitch_classes = self.pitch_classes();
        match pitch_classes.len() {
            0 => DetectionResult::NoSelection,
            n if n < ARPEGGIO_MIN_PITCH_CLASSES => DetectionResult::NotFound,
            _ => ChordDetector::detect(&pitch_classes, preferred_root),
        }
    }

    /// Number of entries in the window.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the window is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clears the window.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}
