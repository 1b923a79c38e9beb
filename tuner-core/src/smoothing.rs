//! # Temporal Smoothing Module
//!
//! Per-session state machines that sit between raw per-frame estimates and
//! what the player sees. Nothing here touches audio; every type is a small,
//! single-owner state machine driven once per frame by the pipeline.
//!
//! ## Features
//! - Onset (pluck transient) blanking and noise gating
//! - Rolling median over raw frequencies
//! - Exponential display smoothing with a deadband
//! - In-tune hold counter with per-string tuned flags and auto-advance
//! - Chord hold / miss-tolerance stabilizer
//! - Lost-signal hold

use std::collections::VecDeque;

use crate::chord::ChordResult;
use crate::tuning::TuningStatus;

/// RMS growth ratio that marks a pluck attack.
pub const ONSET_RATIO_THRESHOLD: f32 = 3.0;

/// Frames suppressed per onset, the onset frame included.
pub const BLANKING_FRAMES: usize = 2;

/// RMS below which a frame is treated as silence, before sensitivity scaling.
pub const NOISE_GATE_RMS: f32 = 0.01;

/// Window of the raw frequency median filter.
pub const MEDIAN_WINDOW: usize = 5;

/// Weight of a new value in the display smoother.
pub const DISPLAY_SMOOTHING_ALPHA: f32 = 0.25;

/// Display changes smaller than this are ignored.
pub const DISPLAY_DEADBAND_CENTS: f32 = 0.5;

/// Consecutive identical detections before a chord is shown.
pub const CHORD_HOLD_FRAMES: usize = 4;

/// Misses tolerated before a shown chord is cleared.
pub const CHORD_MISS_TOLERANCE: usize = 3;

/// Number of whole frames needed to cover `duration_ms`.
pub fn frames_for_duration(duration_ms: u64, frame_ms: f32) -> usize {
    if frame_ms <= 0.0 {
        return 1;
    }
    ((duration_ms as f32 / frame_ms).ceil() as usize).max(1)
}

/// What the gate decided for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Below the noise floor.
    Silent,
    /// First frame of a pluck transient; suppressed.
    Onset,
    /// Later frame inside the blanking period; suppressed.
    Blanked,
    /// Run detection.
    Process,
}

/// Onset blanking plus noise gate.
#[derive(Debug, Clone)]
pub struct OnsetGate {
    ratio_threshold: f32,
    blanking_frames: usize,
    noise_floor: f32,
    previous_rms: Option<f32>,
    blanking_remaining: usize,
}

impl Default for OnsetGate {
    fn default() -> Self {
        Self::new(NOISE_GATE_RMS)
    }
}

impl OnsetGate {
    /// A gate with the default onset ratio and blanking length.
    pub fn new(noise_floor: f32) -> Self {
        Self {
            ratio_threshold: ONSET_RATIO_THRESHOLD,
            blanking_frames: BLANKING_FRAMES,
            noise_floor,
            previous_rms: None,
            blanking_remaining: 0,
        }
    }

    /// Changes the noise floor.
    pub fn set_noise_floor(&mut self, noise_floor: f32) {
        self.noise_floor = noise_floor;
    }

    /// Classifies a frame by its RMS.
    pub fn update(&mut self, rms: f32) -> GateDecision {
        let onset = self
            .previous_rms
            .is_some_and(|prev| rms > prev * self.ratio_threshold);
        self.previous_rms = Some(rms);

        if rms < self.noise_floor {
            self.blanking_remaining = 0;
            return GateDecision::Silent;
        }
        if onset && self.blanking_frames > 0 {
            self.blanking_remaining = self.blanking_frames - 1;
            return GateDecision::Onset;
        }
        if self.blanking_remaining > 0 {
            self.blanking_remaining -= 1;
            return GateDecision::Blanked;
        }
        GateDecision::Process
    }

    /// Forgets the previous frame.
    pub fn reset(&mut self) {
        self.previous_rms = None;
        self.blanking_remaining = 0;
    }
}

/// Rolling median over the last `window` values.
#[derive(Debug, Clone)]
pub struct MedianFilter {
    window: usize,
    values: VecDeque<f32>,
    scratch: Vec<f32>,
}

impl Default for MedianFilter {
    fn default() -> Self {
        Self::new(MEDIAN_WINDOW)
    }
}

impl MedianFilter {
    /// A filter over the last `window` values (at least one).
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            values: VecDeque::with_capacity(window),
            scratch: Vec::with_capacity(window),
        }
    }

    /// Adds a value and returns the median of the current window.
    pub fn push(&mut self, value: f32) -> f32 {
        if self.values.len() == self.window {
            self.values.pop_front();
        }
        self.values.push_back(value);

        self.scratch.clear();
        self.scratch.extend(self.values.iter().copied());
        self.scratch.sort_by(f32::total_cmp);
        let mid = self.scratch.len() / 2;
        if self.scratch.len() % 2 == 0 {
            (self.scratch[mid - 1] + self.scratch[mid]) / 2.0
        } else {
            self.scratch[mid]
        }
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drops all buffered values.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Exponential smoother with a deadband, for the on-screen needle only.
#[derive(Debug, Clone)]
pub struct DisplaySmoother {
    alpha: f32,
    deadband: f32,
    value: Option<f32>,
}

impl Default for DisplaySmoother {
    fn default() -> Self {
        Self::new(DISPLAY_SMOOTHING_ALPHA, DISPLAY_DEADBAND_CENTS)
    }
}

impl DisplaySmoother {
    /// Creates a smoother.
    pub fn new(alpha: f32, deadband: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            deadband,
            value: None,
        }
    }

    /// Moves towards `target` and returns the displayed value.
    pub fn update(&mut self, target: f32) -> f32 {
        let next = match self.value {
            None => target,
            Some(current) if (target - current).abs() < self.deadband => current,
            Some(current) => current + self.alpha * (target - current),
        };
        self.value = Some(next);
        next
    }

    /// Current displayed value.
    pub fn value(&self) -> Option<f32> {
        self.value
    }

    /// Forgets the displayed value; the next update snaps to its target.
    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// In-tune hold counter and per-string tuned flags.
#[derive(Debug, Clone)]
pub struct InTuneTracker {
    hold_frames: usize,
    tuned: Vec<bool>,
    counter: usize,
    last: Option<(usize, TuningStatus)>,
}

impl InTuneTracker {
    /// Tracker for `string_count` strings needing `hold_frames` frames.
    pub fn new(string_count: usize, hold_frames: usize) -> Self {
        Self {
            hold_frames: hold_frames.max(1),
            tuned: vec![false; string_count],
            counter: 0,
            last: None,
        }
    }

    /// Feeds one frame. Returns the index of a string that became tuned on
    /// this frame; each string is reported at most once.
    pub fn update(&mut self, status: TuningStatus, string_index: Option<usize>) -> Option<usize> {
        let Some(index) = string_index.filter(|&i| i < self.tuned.len()) else {
            self.counter = 0;
            self.last = None;
            return None;
        };

        let continuing = self.last == Some((index, TuningStatus::InTune));
        self.counter = match (status, continuing) {
            (TuningStatus::InTune, true) => self.counter + 1,
            (TuningStatus::InTune, false) => 1,
            _ => 0,
        };
        self.last = Some((index, status));

        if self.counter >= self.hold_frames && !self.tuned[index] {
            self.tuned[index] = true;
            return Some(index);
        }
        None
    }

    /// Current hold count.
    pub fn counter(&self) -> usize {
        self.counter
    }

    /// Tuned flag per string.
    pub fn tuned(&self) -> &[bool] {
        &self.tuned
    }

    /// True when every string is tuned.
    pub fn all_tuned(&self) -> bool {
        !self.tuned.is_empty() && self.tuned.iter().all(|&t| t)
    }

    /// The next untuned string after `from`, wrapping around.
    pub fn next_untuned(&self, from: usize) -> Option<usize> {
        let n = self.tuned.len();
        (1..=n)
            .map(|offset| (from + offset) % n)
            .find(|&i| !self.tuned[i])
    }

    /// Clears flags and counters, resizing for a new tuning.
    pub fn reset(&mut self, string_count: usize) {
        self.tuned = vec![false; string_count];
        self.counter = 0;
        self.last = None;
    }
}

/// Hold-frames / miss-tolerance stabilizer for chord names.
#[derive(Debug, Clone)]
pub struct ChordStabilizer {
    hold_frames: usize,
    miss_tolerance: usize,
    candidate: Option<ChordResult>,
    count: usize,
    shown: Option<ChordResult>,
    misses: usize,
}

impl Default for ChordStabilizer {
    fn default() -> Self {
        Self::new(CHORD_HOLD_FRAMES, CHORD_MISS_TOLERANCE)
    }
}

impl ChordStabilizer {
    /// Creates a stabilizer.
    pub fn new(hold_frames: usize, miss_tolerance: usize) -> Self {
        Self {
            hold_frames: hold_frames.max(1),
            miss_tolerance,
            candidate: None,
            count: 0,
            shown: None,
            misses: 0,
        }
    }

    /// Feeds one detection. Returns true when a new chord became shown.
    pub fn update(&mut self, detected: Option<ChordResult>) -> bool {
        match detected {
            Some(chord) => {
                self.misses = 0;
                let same = self.candidate.as_ref().is_some_and(|c| c.name == chord.name);
                self.count = if same { self.count + 1 } else { 1 };
                self.candidate = Some(chord);

                let already_shown = match (&self.shown, &self.candidate) {
                    (Some(shown), Some(candidate)) => shown.name == candidate.name,
                    _ => false,
                };
                if self.count >= self.hold_frames && !already_shown {
                    self.shown = self.candidate.clone();
                    return true;
                }
                false
            }
            None => {
                self.count = 0;
                self.candidate = None;
                if self.shown.is_some() {
                    self.misses += 1;
                    if self.misses > self.miss_tolerance {
                        self.shown = None;
                        self.misses = 0;
                    }
                }
                false
            }
        }
    }

    /// The chord currently shown.
    pub fn shown(&self) -> Option<&ChordResult> {
        self.shown.as_ref()
    }

    /// Clears everything.
    pub fn reset(&mut self) {
        self.candidate = None;
        self.count = 0;
        self.shown = None;
        self.misses = 0;
    }
}

/// Keeps the last reading on screen through short dropouts.
#[derive(Debug, Clone)]
pub struct LostSignalHold {
    hold_ms: u64,
    last_reading_ms: Option<u64>,
}

impl LostSignalHold {
    /// Creates a hold of `hold_ms` milliseconds.
    pub fn new(hold_ms: u64) -> Self {
        Self {
            hold_ms,
            last_reading_ms: None,
        }
    }

    /// Records a frame that produced a reading.
    pub fn mark(&mut self, now_ms: u64) {
        self.last_reading_ms = Some(now_ms);
    }

    /// True while the last reading is recent enough to keep showing.
    pub fn holding(&self, now_ms: u64) -> bool {
        self.last_reading_ms
            .is_some_and(|t| now_ms.saturating_sub(t) <= self.hold_ms)
    }

    /// Forgets the last reading.
    pub fn reset(&mut self) {
        self.last_reading_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::{ChordDetector, DetectionResult};

    fn chord(pcs: &[u8]) -> ChordResult {
        match ChordDetector::detect(pcs, None) {
            DetectionResult::ChordFound(c) => c,
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn onset_blanks_exactly_the_blanking_frames() {
        let mut gate = OnsetGate::new(0.01);
        assert_eq!(gate.update(0.05), GateDecision::Process);
        assert_eq!(gate.update(0.05), GateDecision::Process);

        assert_eq!(gate.update(0.2), GateDecision::Onset);
        let mut suppressed = 1;
        let mut decisions = vec![];
        for _ in 0..4 {
            let d = gate.update(0.19);
            if d != GateDecision::Process {
                suppressed += 1;
            }
            decisions.push(d);
        }
        assert_eq!(suppressed, BLANKING_FRAMES);
        assert_eq!(*decisions.last().unwrap(), GateDecision::Process);
    }

    #[test]
    fn gradual_swell_is_not_an_onset() {
        let mut gate = OnsetGate::new(0.01);
        for rms in [0.02, 0.05, 0.12, 0.3] {
            assert_eq!(gate.update(rms), GateDecision::Process);
        }
    }

    #[test]
    fn pluck_out_of_silence_is_an_onset() {
        let mut gate = OnsetGate::new(0.01);
        assert_eq!(gate.update(0.001), GateDecision::Silent);
        assert_eq!(gate.update(0.1), GateDecision::Onset);
    }

    #[test]
    fn noise_gate_cancels_blanking() {
        let mut gate = OnsetGate::new(0.01);
        gate.update(0.02);
        assert_eq!(gate.update(0.2), GateDecision::Onset);
        assert_eq!(gate.update(0.001), GateDecision::Silent);
        assert_eq!(gate.update(0.002), GateDecision::Silent);
    }

    #[test]
    fn median_rejects_outliers() {
        let mut filter = MedianFilter::new(5);
        for f in [220.0, 221.0, 219.5] {
            filter.push(f);
        }
        let m = filter.push(440.0);
        assert!((m - 220.5).abs() < 1e-3);
        let m = filter.push(220.2);
        assert_eq!(m, 220.2);
        assert_eq!(filter.len(), 5);
        filter.clear();
        assert!(filter.is_empty());
    }

    #[test]
    fn display_smoother_snaps_then_eases() {
        let mut smoother = DisplaySmoother::new(0.25, 0.5);
        assert_eq!(smoother.update(10.0), 10.0);
        assert_eq!(smoother.update(10.3), 10.0);
        assert_eq!(smoother.update(14.0), 11.0);
        smoother.reset();
        assert_eq!(smoother.update(-3.0), -3.0);
    }

    #[test]
    fn in_tune_hold_flips_once() {
        let mut tracker = InTuneTracker::new(4, 5);
        let mut flips = vec![];
        for _ in 0..12 {
            if let Some(i) = tracker.update(TuningStatus::InTune, Some(2)) {
                flips.push(i);
            }
        }
        assert_eq!(flips, vec![2]);
        assert_eq!(tracker.tuned(), &[false, false, true, false]);
    }

    #[test]
    fn interruption_resets_the_hold() {
        let mut tracker = InTuneTracker::new(4, 5);
        for _ in 0..4 {
            assert!(tracker.update(TuningStatus::InTune, Some(1)).is_none());
        }
        assert_eq!(tracker.counter(), 4);
        tracker.update(TuningStatus::Close, Some(1));
        assert_eq!(tracker.counter(), 0);
        for _ in 0..4 {
            assert!(tracker.update(TuningStatus::InTune, Some(1)).is_none());
        }
        assert_eq!(tracker.update(TuningStatus::InTune, Some(1)), Some(1));
    }

    #[test]
    fn switching_strings_resets_the_hold() {
        let mut tracker = InTuneTracker::new(4, 3);
        tracker.update(TuningStatus::InTune, Some(0));
        tracker.update(TuningStatus::InTune, Some(0));
        tracker.update(TuningStatus::InTune, Some(1));
        assert_eq!(tracker.counter(), 1);
    }

    #[test]
    fn next_untuned_wraps_around() {
        let mut tracker = InTuneTracker::new(4, 1);
        tracker.update(TuningStatus::InTune, Some(3));
        tracker.update(TuningStatus::InTune, Some(0));
        assert_eq!(tracker.next_untuned(3), Some(1));
        assert_eq!(tracker.next_untuned(1), Some(2));
        tracker.update(TuningStatus::InTune, Some(1));
        tracker.update(TuningStatus::InTune, Some(2));
        assert!(tracker.all_tuned());
        assert_eq!(tracker.next_untuned(0), None);
    }

    #[test]
    fn chord_needs_hold_frames() {
        let mut stabilizer = ChordStabilizer::new(4, 3);
        let c = chord(&[0, 4, 7]);
        for _ in 0..3 {
            assert!(!stabilizer.update(Some(c.clone())));
        }
        assert!(stabilizer.shown().is_none());
        assert!(stabilizer.update(Some(c.clone())));
        assert_eq!(stabilizer.shown().unwrap().name, "C");
        assert!(!stabilizer.update(Some(c)));
    }

    #[test]
    fn chord_survives_a_few_misses() {
        let mut stabilizer = ChordStabilizer::new(2, 3);
        let c = chord(&[9, 0, 4]);
        stabilizer.update(Some(c.clone()));
        stabilizer.update(Some(c));
        for _ in 0..3 {
            stabilizer.update(None);
            assert_eq!(stabilizer.shown().map(|c| c.name.as_str()), Some("Am"));
        }
        stabilizer.update(None);
        assert!(stabilizer.shown().is_none());
    }

    #[test]
    fn flicker_between_chords_does_not_confirm() {
        let mut stabilizer = ChordStabilizer::new(3, 3);
        let c = chord(&[0, 4, 7]);
        let f = chord(&[5, 9, 0]);
        for _ in 0..5 {
            stabilizer.update(Some(c.clone()));
            stabilizer.update(Some(f.clone()));
        }
        assert!(stabilizer.shown().is_none());
    }

    #[test]
    fn lost_signal_hold_expires() {
        let mut hold = LostSignalHold::new(400);
        assert!(!hold.holding(0));
        hold.mark(1000);
        assert!(hold.holding(1399));
        assert!(hold.holding(1400));
        assert!(!hold.holding(1401));
    }

    #[test]
    fn duration_to_frames() {
        assert_eq!(frames_for_duration(800, 23.22), 35);
        assert_eq!(frames_for_duration(0, 23.22), 1);
    }
}
