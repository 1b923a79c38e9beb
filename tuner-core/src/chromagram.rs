//! # Chromagram Module
//!
//! Polyphonic chord detection from one capture buffer: the magnitude spectrum
//! is reduced to its peaks, each peak is folded onto the nearest pitch class,
//! and the strongest pitch classes are handed to [`ChordDetector`].
//!
//! ## Features
//! - Peak picking with log-parabolic frequency refinement
//! - 12-bin chromagram normalized to `[0, 1]`
//! - Active pitch-class selection and chord confidence

use crate::chord::{ChordDetector, DetectionResult};
use crate::error::Result;
use crate::fft::{bin_frequency, SpectrumAnalyzer};

/// Number of chromagram bins.
pub const SEMITONES: usize = 12;

/// Lowest spectral peak folded into the chromagram.
pub const CHROMA_MIN_HZ: f32 = 60.0;

/// Highest spectral peak folded into the chromagram.
pub const CHROMA_MAX_HZ: f32 = 2000.0;

/// Normalized bin energy needed for a pitch class to count as sounding.
pub const ACTIVE_BIN_THRESHOLD: f32 = 0.4;

/// At most this many pitch classes are passed to the chord recognizer.
pub const MAX_ACTIVE_PITCH_CLASSES: usize = 4;

/// Fewer sounding pitch classes than this cannot form a chord.
pub const MIN_ACTIVE_PITCH_CLASSES: usize = 3;

/// Peaks quieter than this fraction of the loudest peak are ignored.
const PEAK_FLOOR_RATIO: f32 = 0.05;

/// Pitch-class energy profile, C first.
pub type Chroma = [f32; SEMITONES];

/// Result of one simultaneous-chord analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChordDetection {
    /// Chord lookup outcome.
    pub detection: DetectionResult,
    /// Share of chroma energy carried by the chord's tones (0 when no chord).
    pub confidence: f32,
    /// The chromagram the decision was based on.
    pub chromagram: Chroma,
}

/// Spectrum → chromagram → chord pipeline for one buffer at a time.
#[derive(Debug)]
pub struct AudioChordDetector {
    analyzer: SpectrumAnalyzer,
    sample_rate: u32,
    a4_reference: f32,
}

impl AudioChordDetector {
    /// Creates a detector for buffers captured at `sample_rate`.
    pub fn new(sample_rate: u32, a4_reference: f32) -> Self {
        Self {
            analyzer: SpectrumAnalyzer::new(),
            sample_rate,
            a4_reference,
        }
    }

    /// Updates the A4 reference used when folding frequencies.
    pub fn set_reference(&mut self, a4_reference: f32) {
        self.a4_reference = a4_reference;
    }

    /// Detects the chord sounding in a buffer.
    ///
    /// # Arguments
    /// * `samples` - Power-of-two capture buffer
    /// * `preferred_root` - Pitch class of the current monophonic estimate,
    ///   used to break ties between equally valid roots
    ///
    /// # Errors
    /// * `TunerError::InvalidBuffer` - malformed buffer
    pub fn detect(
        &mut self,
        samples: &[f32],
        preferred_root: Option<u8>,
    ) -> Result<AudioChordDetection> {
        let chromagram = self.chromagram(samples)?;
        let active = active_pitch_classes(&chromagram);

        let detection = match active.len() {
            0 => DetectionResult::NoSelection,
            n if n < MIN_ACTIVE_PITCH_CLASSES => DetectionResult::NotFound,
            _ => ChordDetector::detect(&active, preferred_root),
        };

        let confidence = match &detection {
            DetectionResult::ChordFound(chord) => {
                let total: f32 = chromagram.iter().sum();
                let on_chord: f32 = chord
                    .pitch_classes()
                    .iter()
                    .map(|&pc| chromagram[pc as usize])
                    .sum();
                if total > 0.0 { on_chord / total } else { 0.0 }
            }
            DetectionResult::NoSelection | DetectionResult::NotFound => 0.0,
        };

        Ok(AudioChordDetection {
            detection,
            confidence,
            chromagram,
        })
    }

    /// Computes the normalized chromagram of a buffer.
    pub fn chromagram(&mut self, samples: &[f32]) -> Result<Chroma> {
        let magnitudes = self.analyzer.magnitudes(samples)?;
        let fft_len = samples.len();
        let mut chroma = [0.0; SEMITONES];

        let lo = ((CHROMA_MIN_HZ * fft_len as f32 / self.sample_rate as f32) as usize).max(1);
        let hi = ((CHROMA_MAX_HZ * fft_len as f32 / self.sample_rate as f32) as usize)
            .min(magnitudes.len().saturating_sub(2));
        if lo >= hi {
            return Ok(chroma);
        }

        let loudest = magnitudes[lo..=hi].iter().cloned().fold(0.0_f32, f32::max);
        if loudest <= f32::EPSILON {
            return Ok(chroma);
        }
        let floor = loudest * PEAK_FLOOR_RATIO;

        for bin in lo..=hi {
            let m = magnitudes[bin];
            if m < floor || m < magnitudes[bin - 1] || m <= magnitudes[bin + 1] {
                continue;
            }
            let freq = refine_peak(&magnitudes, bin, fft_len, self.sample_rate);
            let midi = 69.0 + 12.0 * (freq / self.a4_reference).log2();
            let pitch_class = (midi.round() as i32).rem_euclid(12) as usize;
            chroma[pitch_class] += m * m;
        }

        normalize(&mut chroma);
        Ok(chroma)
    }
}

/// Pitch classes whose energy clears the activity threshold, strongest first,
/// capped at [`MAX_ACTIVE_PITCH_CLASSES`].
pub fn active_pitch_classes(chroma: &Chroma) -> Vec<u8> {
    let mut active: Vec<(u8, f32)> = chroma
        .iter()
        .enumerate()
        .filter(|(_, e)| **e >= ACTIVE_BIN_THRESHOLD)
        .map(|(pc, &e)| (pc as u8, e))
        .collect();
    active.sort_by(|a, b| b.1.total_cmp(&a.1));
    active.truncate(MAX_ACTIVE_PITCH_CLASSES);
    active.into_iter().map(|(pc, _)| pc).collect()
}

/// Scales bins so the strongest is 1.0. An all-zero profile stays zero.
fn normalize(chroma: &mut Chroma) {
    let max = chroma.iter().cloned().fold(0.0_f32, f32::max);
    if max > 0.0 {
        for value in chroma.iter_mut() {
            *value = (*value / max).clamp(0.0, 1.0);
        }
    }
}

/// Refines a peak bin to a frequency with parabolic interpolation over the
/// log magnitudes of its neighbours.
fn refine_peak(magnitudes: &[f32], bin: usize, fft_len: usize, sample_rate: u32) -> f32 {
    let nominal = bin_frequency(bin, fft_len, sample_rate);
    let y1 = magnitudes[bin - 1].ln();
    let y2 = magnitudes[bin].ln();
    let y3 = magnitudes[bin + 1].ln();
    if !y1.is_finite() || !y2.is_finite() || !y3.is_finite() {
        return nominal;
    }
    let denominator = 2.0 * y2 - y1 - y3;
    if denominator.abs() < 1e-6 {
        return nominal;
    }
    let shift = ((y3 - y1) / (2.0 * denominator)).clamp(-0.5, 0.5);
    bin_frequency(bin, fft_len, sample_rate) + shift * sample_rate as f32 / fft_len as f32
}
