//! Throttling for spoken feedback.
//!
//! The pipeline proposes an announcement on frames where something worth
//! saying happened; the policy decides whether it is actually spoken.
//! Rendering (text-to-speech, haptics) belongs to the front end.

use crate::tuning::TuningStatus;

/// Minimum gap between two "string tuned" announcements.
pub const STRING_TUNED_MIN_GAP_MS: u64 = 1000;

/// Minimum gap between two note announcements.
pub const NOTE_MIN_INTERVAL_MS: u64 = 2500;

/// Width of the cents bucket used to suppress repeated note announcements.
pub const NOTE_CENTS_BUCKET: f32 = 5.0;

/// Something the front end may speak.
#[derive(Debug, Clone, PartialEq)]
pub enum Announcement {
    /// A string just reached its in-tune hold.
    StringTuned {
        /// Index into the tuning.
        string_index: usize,
        /// Label of the string, e.g. `"A4"`.
        string_name: String,
    },
    /// Current note and how far off it is.
    Note {
        /// Note label, e.g. `"C4"`.
        note: String,
        /// Tuning status at the time.
        status: TuningStatus,
        /// Deviation in cents.
        cents: f32,
    },
}

impl Announcement {
    /// Plain-text rendering.
    pub fn text(&self) -> String {
        match self {
            Announcement::StringTuned { string_name, .. } => format!("{string_name} tuned"),
            Announcement::Note { note, status, cents } => match status {
                TuningStatus::InTune => format!("{note}, in tune"),
                TuningStatus::Silent => note.clone(),
                TuningStatus::Flat | TuningStatus::Sharp | TuningStatus::Close => {
                    format!("{note}, {} {:.0} cents", status.as_str(), cents.abs())
                }
            },
        }
    }
}

/// Rate limiting and de-duplication of announcements.
#[derive(Debug, Clone, Default)]
pub struct AnnouncementPolicy {
    last_tuned_ms: Option<u64>,
    last_note_ms: Option<u64>,
    last_note_key: Option<(String, TuningStatus, i32)>,
}

impl AnnouncementPolicy {
    /// A policy that has announced nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the candidate if it should be spoken at `now_ms`.
    pub fn offer(&mut self, candidate: Announcement, now_ms: u64) -> Option<Announcement> {
        match &candidate {
            Announcement::StringTuned { .. } => {
                if elapsed(self.last_tuned_ms, now_ms) < STRING_TUNED_MIN_GAP_MS {
                    return None;
                }
                self.last_tuned_ms = Some(now_ms);
            }
            Announcement::Note { note, status, cents } => {
                if *status == TuningStatus::Silent {
                    return None;
                }
                if elapsed(self.last_note_ms, now_ms) < NOTE_MIN_INTERVAL_MS {
                    return None;
                }
                let key = (note.clone(), *status, (cents / NOTE_CENTS_BUCKET).round() as i32);
                if self.last_note_key.as_ref() == Some(&key) {
                    return None;
                }
                self.last_note_ms = Some(now_ms);
                self.last_note_key = Some(key);
            }
        }
        Some(candidate)
    }

    /// Forgets all history.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn elapsed(since: Option<u64>, now_ms: u64) -> u64 {
    since.map_or(u64::MAX, |t| now_ms.saturating_sub(t))
}
