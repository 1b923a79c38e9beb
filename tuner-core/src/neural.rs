//! # Secondary Pitch Supervisor
//!
//! A second, heavier pitch estimator run at a reduced frame cadence. Its
//! readings are used by [`crate::arbitration`] to catch the octave errors YIN
//! is prone to. The estimator is a strategy object: it is either present at
//! construction or absent, and "absent" is a fully supported mode.
//!
//! A harmonic-product-spectrum estimator ships as the built-in strategy.
//! Model-backed estimators plug in through [`PitchEstimator`].

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::fft::{bin_frequency, SpectrumAnalyzer};

/// The supervisor runs on every Nth frame.
pub const NEURAL_SUPERVISOR_INTERVAL: u64 = 5;

/// A reading older than this many frames is discarded.
pub const NEURAL_RESULT_TTL_FRAMES: u64 = 10;

/// Consecutive failures after which the supervisor reports `Fallback`.
pub const NEURAL_FALLBACK_FAILURES: u32 = 3;

/// A pitch estimate from the secondary estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeuralPitchResult {
    /// Estimated fundamental in Hz.
    pub frequency_hz: f32,
    /// Estimator confidence, 0.0 to 1.0.
    pub confidence: f32,
}

/// A secondary pitch estimation strategy.
pub trait PitchEstimator: Send {
    /// Short name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Estimates the fundamental of one buffer.
    ///
    /// `Ok(None)` means the estimator ran but found no pitch. `Err` is a
    /// failure of the estimator itself and counts towards fallback.
    fn estimate(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Option<NeuralPitchResult>>;
}

/// Runtime status of the supervisor, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeuralStatus {
    /// No estimator was configured.
    Unavailable,
    /// Estimator loaded, but no fresh reading.
    Available,
    /// A reading within the TTL exists.
    Active,
    /// The estimator failed several times in a row.
    Fallback,
}

/// A reading handed to arbitration on one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeuralReading {
    /// The most recent estimate still within its TTL.
    pub result: NeuralPitchResult,
    /// True when the estimate was produced on this frame.
    pub fresh: bool,
}

/// Cadence, TTL and failure bookkeeping around an optional estimator.
pub struct NeuralPitchSupervisor {
    estimator: Option<Box<dyn PitchEstimator>>,
    interval: u64,
    ttl_frames: u64,
    latest: Option<(NeuralPitchResult, u64)>,
    consecutive_failures: u32,
}

impl std::fmt::Debug for NeuralPitchSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeuralPitchSupervisor")
            .field("estimator", &self.estimator.as_ref().map(|e| e.name().to_string()))
            .field("latest", &self.latest)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish()
    }
}

impl NeuralPitchSupervisor {
    /// Wraps an estimator; `None` yields a supervisor that never reports.
    pub fn new(estimator: Option<Box<dyn PitchEstimator>>) -> Self {
        match &estimator {
            Some(e) => info!(estimator = e.name(), "secondary pitch estimator available"),
            None => info!("secondary pitch estimator disabled, YIN only"),
        }
        Self {
            estimator,
            interval: NEURAL_SUPERVISOR_INTERVAL,
            ttl_frames: NEURAL_RESULT_TTL_FRAMES,
            latest: None,
            consecutive_failures: 0,
        }
    }

    /// A supervisor with no estimator.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// A supervisor around the built-in harmonic-product-spectrum estimator.
    pub fn harmonic_product() -> Self {
        Self::new(Some(Box::new(HarmonicProductEstimator::new())))
    }

    /// Overrides cadence and TTL.
    pub fn with_timing(mut self, interval: u64, ttl_frames: u64) -> Self {
        self.interval = interval.max(1);
        self.ttl_frames = ttl_frames;
        self
    }

    /// True when an estimator is configured.
    pub fn is_available(&self) -> bool {
        self.estimator.is_some()
    }

    /// Status as of `frame_index`.
    pub fn status(&self, frame_index: u64) -> NeuralStatus {
        if self.estimator.is_none() {
            NeuralStatus::Unavailable
        } else if self.consecutive_failures >= NEURAL_FALLBACK_FAILURES {
            NeuralStatus::Fallback
        } else if self.current(frame_index).is_some() {
            NeuralStatus::Active
        } else {
            NeuralStatus::Available
        }
    }

    /// Runs the estimator once, catching and counting failures.
    pub fn estimate(&mut self, samples: &[f32], sample_rate: u32) -> Option<NeuralPitchResult> {
        let estimator = self.estimator.as_mut()?;
        match estimator.estimate(samples, sample_rate) {
            Ok(result) => {
                if self.consecutive_failures >= NEURAL_FALLBACK_FAILURES {
                    info!(estimator = estimator.name(), "secondary estimator recovered");
                }
                self.consecutive_failures = 0;
                result.filter(|r| r.frequency_hz.is_finite() && r.frequency_hz > 0.0)
            }
            Err(err) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures == NEURAL_FALLBACK_FAILURES {
                    warn!(
                        estimator = estimator.name(),
                        error = %err,
                        "secondary estimator failing, falling back to YIN only"
                    );
                } else {
                    debug!(estimator = estimator.name(), error = %err, "estimator call failed");
                }
                None
            }
        }
    }

    /// Per-frame entry point: runs the estimator on cadence frames and
    /// returns the freshest reading still within its TTL.
    pub fn poll(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        frame_index: u64,
    ) -> Option<NeuralReading> {
        self.estimator.as_ref()?;
        let mut fresh = false;
        if frame_index % self.interval == 0 {
            if let Some(result) = self.estimate(samples, sample_rate) {
                self.latest = Some((result, frame_index));
                fresh = true;
            }
        }
        self.current(frame_index)
            .map(|result| NeuralReading { result, fresh })
    }

    /// Drops any cached reading.
    pub fn reset(&mut self) {
        self.latest = None;
    }

    fn current(&self, frame_index: u64) -> Option<NeuralPitchResult> {
        self.latest
            .filter(|(_, at)| frame_index.saturating_sub(*at) <= self.ttl_frames)
            .map(|(result, _)| result)
    }
}

/// Harmonic product spectrum estimator.
///
/// The magnitude spectrum is decimated by 1..=`harmonics` and multiplied, so
/// the fundamental stands out where the harmonic series lines up. The peak is
/// then refined on the plain spectrum. Confidence is the share of in-band
/// energy that sits on the detected harmonic series.
#[derive(Debug)]
pub struct HarmonicProductEstimator {
    analyzer: SpectrumAnalyzer,
    harmonics: usize,
    pad_factor: usize,
    min_hz: f32,
    max_hz: f32,
}

impl Default for HarmonicProductEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl HarmonicProductEstimator {
    /// Four harmonics, 4× zero padding, 50-1200 Hz search band.
    pub fn new() -> Self {
        Self {
            analyzer: SpectrumAnalyzer::new(),
            harmonics: 4,
            pad_factor: 4,
            min_hz: 50.0,
            max_hz: 1200.0,
        }
    }
}

impl PitchEstimator for HarmonicProductEstimator {
    fn name(&self) -> &str {
        "harmonic-product"
    }

    fn estimate(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Option<NeuralPitchResult>> {
        let mags = self.analyzer.magnitudes_padded(samples, self.pad_factor)?;
        let fft_len = mags.len() * 2;
        let hz_per_bin = sample_rate as f32 / fft_len as f32;
        let lo = ((self.min_hz / hz_per_bin) as usize).max(1);
        let hi = ((self.max_hz / hz_per_bin) as usize).min(mags.len() - 2);
        if lo >= hi {
            return Ok(None);
        }

        let loudest = mags[lo..=hi].iter().cloned().fold(0.0_f32, f32::max);
        if loudest <= 1e-6 {
            return Ok(None);
        }

        let hps_peak = (lo..=hi)
            .map(|bin| {
                let score: f32 = (1..=self.harmonics)
                    .map(|h| mags.get(bin * h).copied().unwrap_or(0.0) + 1e-9)
                    .map(f32::ln)
                    .sum();
                (bin, score)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(bin, _)| bin);

        // A missing fundamental means the product picked noise; use the
        // strongest partial instead.
        let candidate = match hps_peak {
            Some(bin) if mags[bin] >= loudest * 0.1 => bin,
            _ => (lo..=hi)
                .max_by(|&a, &b| mags[a].total_cmp(&mags[b]))
                .unwrap_or(lo),
        };

        let peak = climb_to_local_max(&mags, candidate, lo, hi);
        let frequency = refine_log_parabolic(&mags, peak, fft_len, sample_rate);
        let confidence = harmonic_energy_ratio(&mags, frequency / hz_per_bin, self.pad_factor * 2);

        if !frequency.is_finite() || frequency < self.min_hz * 0.9 || confidence < 0.2 {
            return Ok(None);
        }
        Ok(Some(NeuralPitchResult {
            frequency_hz: frequency,
            confidence,
        }))
    }
}

fn climb_to_local_max(mags: &[f32], mut bin: usize, lo: usize, hi: usize) -> usize {
    loop {
        let left = bin > lo && mags[bin - 1] > mags[bin];
        let right = bin < hi && mags[bin + 1] > mags[bin];
        match (left, right) {
            (_, true) if !left || mags[bin + 1] >= mags[bin - 1] => bin += 1,
            (true, _) => bin -= 1,
            _ => return bin,
        }
    }
}

fn refine_log_parabolic(mags: &[f32], bin: usize, fft_len: usize, sample_rate: u32) -> f32 {
    let nominal = bin_frequency(bin, fft_len, sample_rate);
    if bin == 0 || bin + 1 >= mags.len() {
        return nominal;
    }
    let (y1, y2, y3) = (mags[bin - 1].ln(), mags[bin].ln(), mags[bin + 1].ln());
    let denominator = 2.0 * y2 - y1 - y3;
    if !(y1.is_finite() && y2.is_finite() && y3.is_finite()) || denominator.abs() < 1e-6 {
        return nominal;
    }
    let shift = ((y3 - y1) / (2.0 * denominator)).clamp(-0.5, 0.5);
    nominal + shift * sample_rate as f32 / fft_len as f32
}

/// Energy within `half_width` bins of the first six harmonics of
/// `fundamental_bin`, relative to all energy up to the sixth harmonic.
fn harmonic_energy_ratio(mags: &[f32], fundamental_bin: f32, half_width: usize) -> f32 {
    let top = ((fundamental_bin * 6.5) as usize).min(mags.len() - 1);
    let start = (fundamental_bin * 0.5) as usize;
    if start >= top {
        return 0.0;
    }
    let total: f32 = mags[start..=top].iter().map(|m| m * m).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mut on_series = 0.0;
    let mut last_end = 0usize;
    for h in 1..=6 {
        let center = (fundamental_bin * h as f32).round() as usize;
        let from = center.saturating_sub(half_width).max(last_end).max(start);
        let to = (center + half_width).min(top);
        if from > to {
            continue;
        }
        on_series += mags[from..=to].iter().map(|m| m * m).sum::<f32>();
        last_end = to + 1;
    }
    (on_series / total).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunerError;
    use std::f32::consts::PI;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SR: u32 = 44_100;
    const N: usize = 4096;

    fn plucked(freq: f32) -> Vec<f32> {
        (0..N)
            .map(|i| {
                let t = i as f32 / SR as f32;
                (1..=5)
                    .map(|h| 0.5 / h as f32 * (2.0 * PI * freq * h as f32 * t).sin())
                    .sum()
            })
            .collect()
    }

    struct Scripted {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl PitchEstimator for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn estimate(&mut self, _: &[f32], _: u32) -> Result<Option<NeuralPitchResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(TunerError::Estimator("model not loaded".into()))
            } else {
                Ok(Some(NeuralPitchResult {
                    frequency_hz: 220.0,
                    confidence: 0.95,
                }))
            }
        }
    }

    fn scripted(fail: bool) -> (NeuralPitchSupervisor, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let estimator = Scripted {
            calls: Arc::clone(&calls),
            fail,
        };
        (NeuralPitchSupervisor::new(Some(Box::new(estimator))), calls)
    }

    #[test]
    fn harmonic_product_finds_plucked_fundamentals() {
        let mut estimator = HarmonicProductEstimator::new();
        for &freq in &[110.0, 196.0, 261.63, 440.0] {
            let result = estimator.estimate(&plucked(freq), SR).unwrap().unwrap();
            let semitones = 12.0 * (result.frequency_hz / freq).log2();
            assert!(semitones.abs() < 0.25, "{freq} Hz estimated {}", result.frequency_hz);
            assert!(result.confidence > 0.8, "confidence {}", result.confidence);
        }
    }

    #[test]
    fn harmonic_product_handles_pure_sine() {
        let sine: Vec<f32> = (0..N)
            .map(|i| 0.5 * (2.0 * PI * 330.0 * i as f32 / SR as f32).sin())
            .collect();
        let mut estimator = HarmonicProductEstimator::new();
        let result = estimator.estimate(&sine, SR).unwrap().unwrap();
        assert!((result.frequency_hz - 330.0).abs() < 3.0);
    }

    #[test]
    fn harmonic_product_ignores_silence() {
        let mut estimator = HarmonicProductEstimator::new();
        assert!(estimator.estimate(&vec![0.0; N], SR).unwrap().is_none());
    }

    #[test]
    fn disabled_supervisor_is_unavailable() {
        let mut supervisor = NeuralPitchSupervisor::disabled();
        assert!(!supervisor.is_available());
        assert!(supervisor.poll(&plucked(220.0), SR, 0).is_none());
        assert_eq!(supervisor.status(0), NeuralStatus::Unavailable);
    }

    #[test]
    fn runs_on_cadence_and_caches_within_ttl() {
        let (mut supervisor, calls) = scripted(false);
        let buffer = vec![0.0; N];
        let mut fresh_frames = vec![];
        for frame in 0..12 {
            let reading = supervisor.poll(&buffer, SR, frame).unwrap();
            if reading.fresh {
                fresh_frames.push(frame);
            }
        }
        assert_eq!(fresh_frames, vec![0, 5, 10]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.status(11), NeuralStatus::Active);
    }

    #[test]
    fn readings_age_out() {
        let (supervisor, _) = scripted(false);
        let mut supervisor = supervisor.with_timing(100, 3);
        let buffer = vec![0.0; N];
        assert!(supervisor.poll(&buffer, SR, 0).is_some());
        assert!(supervisor.poll(&buffer, SR, 3).is_some());
        assert!(supervisor.poll(&buffer, SR, 4).is_none());
        assert_eq!(supervisor.status(4), NeuralStatus::Available);
    }

    #[test]
    fn repeated_failures_report_fallback() {
        let (mut supervisor, calls) = scripted(true);
        let buffer = vec![0.0; N];
        for frame in 0..15 {
            assert!(supervisor.poll(&buffer, SR, frame).is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.status(15), NeuralStatus::Fallback);
    }
}
