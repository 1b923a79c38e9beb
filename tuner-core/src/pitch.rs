//! # Pitch Detection Module
//!
//! This module implements the YIN fundamental frequency estimator used as the
//! primary pitch source of the tuner, together with the energy helpers the
//! gating stages rely on.
//!
//! ## Features
//! - YIN cumulative mean normalized difference with absolute threshold
//! - Global-minimum fallback for weakly periodic signals
//! - Continuity window around the previous estimate to avoid octave jumps
//! - Parabolic interpolation for sub-sample lag precision
//! - RMS energy and buffer validation

use crate::error::{Result, TunerError};

/// Absolute CMND threshold for the first-dip search.
pub const YIN_THRESHOLD: f32 = 0.15;

/// Largest CMND value accepted by the global-minimum fallback.
pub const YIN_FALLBACK_MAX: f32 = 0.45;

/// Lowest frequency the detector searches for.
pub const MIN_FREQUENCY_HZ: f32 = 25.0;

/// Highest frequency the detector searches for.
pub const MAX_FREQUENCY_HZ: f32 = 2200.0;

/// Half-width of the lag window searched around a previous estimate.
pub const CONTINUITY_WINDOW_SEMITONES: f32 = 3.0;

/// How much worse a shorter-lag dip may be and still replace the dip found
/// in the continuity window.
pub const SHORTER_PERIOD_MARGIN: f32 = 0.02;

/// A single pitch estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchResult {
    /// Estimated fundamental in Hz.
    pub frequency_hz: f32,
    /// Periodicity strength, 0.0 to 1.0. For YIN this is `1 - cmnd(tau)`.
    pub confidence: f32,
}

/// Root mean square energy of a buffer. Zero for an empty buffer.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Checks that a buffer is non-empty and a power of two long.
///
/// The chord path runs an FFT over the same buffer, so partial buffers seen at
/// capture start/stop boundaries are rejected here.
pub fn validate_buffer(samples: &[f32]) -> Result<()> {
    if samples.is_empty() || !samples.len().is_power_of_two() {
        return Err(TunerError::InvalidBuffer { len: samples.len() });
    }
    Ok(())
}

/// YIN pitch detector with reusable scratch buffers.
#[derive(Debug, Clone)]
pub struct PitchDetector {
    threshold: f32,
    min_frequency: f32,
    max_frequency: f32,
    difference: Vec<f32>,
    cmnd: Vec<f32>,
}

impl Default for PitchDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PitchDetector {
    /// Creates a detector with the default threshold and frequency range.
    pub fn new() -> Self {
        Self::with_range(MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ)
    }

    /// Creates a detector searching only `min_hz..=max_hz`.
    pub fn with_range(min_hz: f32, max_hz: f32) -> Self {
        Self {
            threshold: YIN_THRESHOLD,
            min_frequency: min_hz,
            max_frequency: max_hz,
            difference: Vec::new(),
            cmnd: Vec::new(),
        }
    }

    /// Estimates the fundamental frequency of one buffer.
    ///
    /// # Arguments
    /// * `samples` - Audio buffer
    /// * `sample_rate` - Sample rate in Hz
    /// * `previous_frequency` - Prior estimate; when present the dip search
    ///   first looks within ±3 semitones of its lag
    ///
    /// # Returns
    /// * `Some(result)` - Detected pitch with confidence
    /// * `None` - No periodic signal (silence, noise, out of range)
    pub fn detect(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        previous_frequency: Option<f32>,
    ) -> Option<PitchResult> {
        let half = samples.len() / 2;
        if half < 4 || sample_rate == 0 {
            return None;
        }
        let sr = sample_rate as f32;
        let tau_min = ((sr / self.max_frequency).floor() as usize).max(2);
        let tau_max = ((sr / self.min_frequency).ceil() as usize).min(half - 2);
        if tau_min >= tau_max {
            return None;
        }

        self.compute_cmnd(samples, half, tau_max + 1);

        let constrained = previous_frequency
            .filter(|f| f.is_finite() && *f > 0.0)
            .and_then(|prev| {
                let center = sr / prev;
                let spread = 2.0_f32.powf(CONTINUITY_WINDOW_SEMITONES / 12.0);
                let lo = ((center / spread).floor() as usize).max(tau_min);
                let hi = ((center * spread).ceil() as usize).min(tau_max);
                (lo < hi).then(|| self.first_dip(lo, hi)).flatten()
            });

        let full = self.first_dip(tau_min, tau_max);
        let tau = match (constrained, full) {
            // A shorter period that is just as periodic is a real move up,
            // not a harmonic; the longer lag is only its multiple.
            (Some(held), Some(shorter))
                if shorter < held
                    && self.cmnd[shorter] <= self.cmnd[held] + SHORTER_PERIOD_MARGIN =>
            {
                shorter
            }
            (Some(held), _) => held,
            (None, full) => full.or_else(|| self.global_minimum(tau_min, tau_max))?,
        };

        let period = tau as f32 + self.parabolic_shift(tau);
        let frequency = sr / period;
        if !frequency.is_finite()
            || frequency < self.min_frequency * 0.95
            || frequency > self.max_frequency * 1.05
        {
            return None;
        }

        Some(PitchResult {
            frequency_hz: frequency,
            confidence: (1.0 - self.cmnd[tau]).clamp(0.0, 1.0),
        })
    }

    /// Steps 1-3: difference function and its cumulative mean normalization.
    fn compute_cmnd(&mut self, signal: &[f32], window: usize, max_lag: usize) {
        self.difference.clear();
        self.difference.resize(max_lag + 1, 0.0);
        self.cmnd.clear();
        self.cmnd.resize(max_lag + 1, 1.0);

        for tau in 1..=max_lag {
            let mut diff = 0.0;
            for i in 0..window {
                let delta = signal[i] - signal[i + tau];
                diff += delta * delta;
            }
            self.difference[tau] = diff;
        }

        let mut running_sum = 0.0;
        for tau in 1..=max_lag {
            running_sum += self.difference[tau];
            self.cmnd[tau] = if running_sum > 0.0 {
                self.difference[tau] * tau as f32 / running_sum
            } else {
                1.0
            };
        }
    }

    /// First lag under the threshold, walked down to its local minimum.
    fn first_dip(&self, lo: usize, hi: usize) -> Option<usize> {
        let mut tau = lo;
        while tau <= hi {
            if self.cmnd[tau] < self.threshold {
                while tau < hi && self.cmnd[tau + 1] < self.cmnd[tau] {
                    tau += 1;
                }
                return Some(tau);
            }
            tau += 1;
        }
        None
    }

    fn global_minimum(&self, lo: usize, hi: usize) -> Option<usize> {
        (lo..=hi)
            .min_by(|&a, &b| self.cmnd[a].total_cmp(&self.cmnd[b]))
            .filter(|&tau| self.cmnd[tau] < YIN_FALLBACK_MAX)
    }

    /// Sub-sample offset of the minimum of the raw difference around `tau`.
    fn parabolic_shift(&self, tau: usize) -> f32 {
        let y1 = self.difference[tau - 1];
        let y2 = self.difference[tau];
        let y3 = self.difference[tau + 1];
        let denominator = y1 - 2.0 * y2 + y3;
        if denominator.abs() < f32::EPSILON {
            return 0.0;
        }
        ((y1 - y3) / (2.0 * denominator)).clamp(-1.0, 1.0)
    }
}
