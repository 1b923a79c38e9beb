//! YIN versus secondary-estimator arbitration.
//!
//! YIN's dominant failure is octave ambiguity; the secondary estimator can be
//! wrong on transients. The secondary reading therefore only replaces YIN for
//! two recognizable patterns, each gated on both confidences, and only after
//! it has been stable for a few consecutive readings.
//!
//! The thresholds below were tuned empirically on phone microphones and are
//! not derived; other capture chains may need re-calibration.

use std::collections::VecDeque;

use tracing::debug;

use crate::neural::{NeuralPitchResult, NeuralReading};
use crate::pitch::PitchResult;

/// Gaps up to this many semitones are treated as agreement.
pub const SMALL_GAP_SEMITONES: f32 = 1.5;

/// Consecutive secondary readings required before it is trusted.
pub const NEURAL_CONSISTENCY_FRAMES: usize = 2;

/// Maximum spread between those consecutive readings.
pub const NEURAL_CONSISTENCY_SEMITONES: f32 = 0.5;

/// Distance from 12 or 24 semitones still counted as an octave error.
pub const OCTAVE_TOLERANCE_SEMITONES: f32 = 1.0;

/// Secondary confidence needed for an octave correction.
pub const OCTAVE_NEURAL_MIN_CONFIDENCE: f32 = 0.85;

/// YIN confidence needed for an octave correction.
pub const OCTAVE_YIN_MIN_CONFIDENCE: f32 = 0.12;

/// Minimum gap for a strong-disagreement override.
pub const STRONG_GAP_SEMITONES: f32 = 2.5;

/// Secondary confidence needed for a strong-disagreement override.
pub const STRONG_NEURAL_MIN_CONFIDENCE: f32 = 0.93;

/// YIN confidence needed for a strong-disagreement override.
pub const STRONG_YIN_MIN_CONFIDENCE: f32 = 0.16;

/// Why arbitration chose what it chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationReason {
    /// No secondary reading this frame.
    NoNeural,
    /// Both estimators agree closely enough.
    SmallGap,
    /// The secondary reading has not been stable long enough.
    NeuralUnconfirmed,
    /// YIN was an octave (or two) off and got corrected.
    OctaveCorrection,
    /// A large, confident disagreement was resolved in favour of the
    /// secondary estimator.
    StrongDisagreement,
    /// Disagreement without enough confidence to override.
    KeepYin,
}

impl ArbitrationReason {
    /// Stable identifier for logs and diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArbitrationReason::NoNeural => "no_neural",
            ArbitrationReason::SmallGap => "small_gap",
            ArbitrationReason::NeuralUnconfirmed => "neural_unconfirmed",
            ArbitrationReason::OctaveCorrection => "octave_correction",
            ArbitrationReason::StrongDisagreement => "strong_disagreement",
            ArbitrationReason::KeepYin => "keep_yin",
        }
    }
}

/// Outcome of one arbitration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArbitrationDecision {
    /// The pitch passed downstream.
    pub result: PitchResult,
    /// True when the secondary frequency replaced YIN's.
    pub override_applied: bool,
    /// Which rule decided.
    pub reason: ArbitrationReason,
}

/// Absolute distance in semitones between two frequencies.
pub fn semitone_gap(a: f32, b: f32) -> f32 {
    (12.0 * (a / b).log2()).abs()
}

/// Resolves a YIN estimate against an optional secondary estimate.
///
/// `neural_consistent` reports whether the secondary estimator has produced
/// [`NEURAL_CONSISTENCY_FRAMES`] readings within
/// [`NEURAL_CONSISTENCY_SEMITONES`] of each other.
pub fn arbitrate(
    yin: PitchResult,
    neural: Option<&NeuralPitchResult>,
    neural_consistent: bool,
) -> ArbitrationDecision {
    let keep = |reason| ArbitrationDecision {
        result: yin,
        override_applied: false,
        reason,
    };

    let Some(neural) = neural else {
        return keep(ArbitrationReason::NoNeural);
    };
    let gap = semitone_gap(yin.frequency_hz, neural.frequency_hz);
    if !gap.is_finite() || gap <= SMALL_GAP_SEMITONES {
        return keep(ArbitrationReason::SmallGap);
    }
    if !neural_consistent {
        return keep(ArbitrationReason::NeuralUnconfirmed);
    }

    let octave_gap = (gap - 12.0).abs() <= OCTAVE_TOLERANCE_SEMITONES
        || (gap - 24.0).abs() <= OCTAVE_TOLERANCE_SEMITONES;

    let reason = if octave_gap
        && neural.confidence >= OCTAVE_NEURAL_MIN_CONFIDENCE
        && yin.confidence >= OCTAVE_YIN_MIN_CONFIDENCE
    {
        ArbitrationReason::OctaveCorrection
    } else if gap >= STRONG_GAP_SEMITONES
        && neural.confidence >= STRONG_NEURAL_MIN_CONFIDENCE
        && yin.confidence >= STRONG_YIN_MIN_CONFIDENCE
    {
        ArbitrationReason::StrongDisagreement
    } else {
        return keep(ArbitrationReason::KeepYin);
    };

    debug!(
        yin_hz = yin.frequency_hz,
        neural_hz = neural.frequency_hz,
        gap,
        reason = reason.as_str(),
        "secondary estimate overrides YIN"
    );
    ArbitrationDecision {
        result: PitchResult {
            frequency_hz: neural.frequency_hz,
            confidence: neural.confidence,
        },
        override_applied: true,
        reason,
    }
}

/// Stateful wrapper that tracks secondary readings for the consistency gate.
#[derive(Debug, Clone, Default)]
pub struct Arbiter {
    recent: VecDeque<f32>,
}

impl Arbiter {
    /// Creates an arbiter with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fresh secondary reading. Cached readings are not counted twice.
    pub fn observe(&mut self, reading: &NeuralReading) {
        if !reading.fresh {
            return;
        }
        self.recent.push_back(reading.result.frequency_hz);
        while self.recent.len() > NEURAL_CONSISTENCY_FRAMES {
            self.recent.pop_front();
        }
    }

    /// True when the last readings agree with each other.
    pub fn is_consistent(&self) -> bool {
        self.recent.len() >= NEURAL_CONSISTENCY_FRAMES
            && self
                .recent
                .iter()
                .zip(self.recent.iter().skip(1))
                .all(|(&a, &b)| semitone_gap(a, b) <= NEURAL_CONSISTENCY_SEMITONES)
    }

    /// Observes the reading (if any) and arbitrates.
    pub fn decide(&mut self, yin: PitchResult, neural: Option<NeuralReading>) -> ArbitrationDecision {
        if let Some(reading) = &neural {
            self.observe(reading);
        }
        arbitrate(yin, neural.as_ref().map(|r| &r.result), self.is_consistent())
    }

    /// Forgets all history.
    pub fn reset(&mut self) {
        self.recent.clear();
    }
}
