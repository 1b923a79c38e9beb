//! # Tuner Pipeline
//!
//! One buffer in, one [`TunerFrame`] out. The pipeline owns every piece of
//! per-session state (gates, filters, hold counters, stabilizers) and is meant
//! to be driven from a single thread, usually a
//! [`ListeningSession`](crate::session::ListeningSession).
//!
//! Per frame:
//!
//! 1. validate the buffer and measure its RMS
//! 2. onset / noise gate
//! 3. YIN, plus the secondary estimator on its cadence
//! 4. arbitration, median filter, note and string mapping
//! 5. status, in-tune hold, display smoothing
//! 6. simultaneous chord path (every Nth frame) and arpeggio path, merged by
//!    latest confirmation
//! 7. spoken-feedback throttling

use tracing::{debug, info};

use crate::arbitration::{semitone_gap, ArbitrationReason, Arbiter, SMALL_GAP_SEMITONES};
use crate::arpeggio::ArpeggioDetector;
use crate::chord::ChordResult;
use crate::chromagram::{AudioChordDetector, Chroma, SEMITONES};
use crate::config::{PipelineConstants, TunerConfig};
use crate::error::{Result, TunerError};
use crate::neural::{NeuralPitchSupervisor, NeuralStatus};
use crate::pitch::{rms, validate_buffer, PitchDetector};
use crate::smoothing::{
    ChordStabilizer, DisplaySmoother, GateDecision, InTuneTracker, LostSignalHold, MedianFilter,
    OnsetGate,
};
use crate::speech::{Announcement, AnnouncementPolicy};
use crate::tuning::{
    find_nearest_string_with_hysteresis, map_frequency, match_string, tuning_status, NoteInfo,
    StringMatch, TuningStatus, STRING_SWITCH_HYSTERESIS_CENTS,
};

/// Which chord path produced the shown chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordSource {
    /// Strummed: all tones in one buffer.
    Simultaneous,
    /// Plucked one after another.
    Arpeggio,
}

/// A stabilized chord and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ChordReading {
    /// Root, quality and chord tones.
    pub chord: ChordResult,
    /// Detection confidence, 0.0 to 1.0.
    pub confidence: f32,
    /// Path that confirmed the chord.
    pub source: ChordSource,
    /// Timestamp of the frame on which this chord was confirmed.
    pub confirmed_at_ms: u64,
}

/// Published state after one buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct TunerFrame {
    /// Index of the buffer since the session started.
    pub frame_index: u64,
    /// Capture time relative to the session start.
    pub timestamp_ms: u64,
    /// RMS level of the buffer.
    pub level: f32,
    /// What the onset and noise gate made of the buffer.
    pub gate: GateDecision,
    /// Nearest note of the median-filtered frequency.
    pub note: Option<NoteInfo>,
    /// Median-filtered frequency in Hz.
    pub frequency_hz: Option<f32>,
    /// Deviation from the target string, or from the nearest note when the
    /// tuning has no match. Clamped to ±50.
    pub cents: Option<f32>,
    /// Smoothed cents for the needle; never used for decisions.
    pub display_cents: Option<f32>,
    /// Confidence of the arbitrated pitch, 0.0 to 1.0.
    pub confidence: f32,
    /// Tuning status derived from `cents`.
    pub status: TuningStatus,
    /// Target string and the deviation from it.
    pub string_match: Option<StringMatch>,
    /// Manually selected target string.
    pub selected_string: Option<usize>,
    /// Tuned flag per string of the current tuning.
    pub tuned_strings: Vec<bool>,
    /// Last computed 12-bin chromagram, zeroed by silence.
    pub chromagram: Chroma,
    /// Stabilized chord from either path.
    pub chord: Option<ChordReading>,
    /// State of the secondary pitch estimator.
    pub neural_status: NeuralStatus,
    /// Why arbitration chose the reported pitch, when a pitch was read.
    pub arbitration: Option<ArbitrationReason>,
    /// True when the reading is the last one kept through a dropout.
    pub held: bool,
    /// Spoken feedback to render for this frame, if any.
    pub announcement: Option<Announcement>,
}

impl TunerFrame {
    /// Note label such as `"A4"`, or `"--"` when silent.
    pub fn note_label(&self) -> String {
        self.note
            .as_ref()
            .map_or_else(|| "--".to_string(), NoteInfo::label)
    }
}

/// Per-session processing state.
pub struct TunerPipeline {
    config: TunerConfig,
    constants: PipelineConstants,

    detector: PitchDetector,
    supervisor: NeuralPitchSupervisor,
    arbiter: Arbiter,
    gate: OnsetGate,
    median: MedianFilter,
    display: DisplaySmoother,
    in_tune: InTuneTracker,
    lost_signal: LostSignalHold,

    chord_detector: AudioChordDetector,
    chord_stabilizer: ChordStabilizer,
    arpeggio: ArpeggioDetector,
    arpeggio_stabilizer: ChordStabilizer,
    simultaneous: Option<ChordReading>,
    arpeggiated: Option<ChordReading>,
    chromagram: Chroma,

    announcer: AnnouncementPolicy,

    previous_frequency: Option<f32>,
    /// Raw YIN estimate of the previous frame, before arbitration.
    previous_yin: Option<f32>,
    previous_string: Option<usize>,
    selected_string: Option<usize>,
    last_frame: Option<TunerFrame>,
    frame_index: u64,
}

impl TunerPipeline {
    /// Creates a pipeline with default constants.
    pub fn new(config: TunerConfig) -> Result<Self> {
        Self::with_constants(config, PipelineConstants::default())
    }

    /// Creates a pipeline with explicit constants and the built-in
    /// harmonic-product secondary estimator.
    pub fn with_constants(config: TunerConfig, constants: PipelineConstants) -> Result<Self> {
        config.validate()?;
        if !constants.buffer_size.is_power_of_two() || constants.hop_size == 0 {
            return Err(TunerError::Config(format!(
                "buffer size {} / hop {} not usable",
                constants.buffer_size, constants.hop_size
            )));
        }
        let supervisor = NeuralPitchSupervisor::harmonic_product()
            .with_timing(constants.neural_interval, constants.neural_ttl_frames);

        Ok(Self {
            detector: PitchDetector::new(),
            supervisor,
            arbiter: Arbiter::new(),
            gate: OnsetGate::new(config.noise_floor()),
            median: MedianFilter::new(constants.median_window),
            display: DisplaySmoother::default(),
            in_tune: InTuneTracker::new(
                config.tuning.strings.len(),
                constants.in_tune_hold_frames(),
            ),
            lost_signal: LostSignalHold::new(constants.lost_signal_hold_ms),
            chord_detector: AudioChordDetector::new(constants.sample_rate, config.a4_reference),
            chord_stabilizer: ChordStabilizer::new(
                constants.chord_hold_frames,
                constants.chord_miss_tolerance,
            ),
            arpeggio: ArpeggioDetector::new(constants.arpeggio_window_ms),
            arpeggio_stabilizer: ChordStabilizer::new(
                constants.chord_hold_frames,
                constants.chord_miss_tolerance,
            ),
            simultaneous: None,
            arpeggiated: None,
            chromagram: [0.0; SEMITONES],
            announcer: AnnouncementPolicy::new(),
            previous_frequency: None,
            previous_yin: None,
            previous_string: None,
            selected_string: config.selected_string,
            last_frame: None,
            frame_index: 0,
            config,
            constants,
        })
    }

    /// Replaces the secondary pitch supervisor.
    pub fn with_supervisor(mut self, supervisor: NeuralPitchSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn constants(&self) -> &PipelineConstants {
        &self.constants
    }

    /// Index of the next frame to be processed.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// The most recently produced frame.
    pub fn last_frame(&self) -> Option<&TunerFrame> {
        self.last_frame.as_ref()
    }

    /// Applies new settings without dropping unrelated state.
    ///
    /// Changing the tuning clears the tuned flags; switching an estimator or
    /// path off clears its state.
    pub fn update_config(&mut self, config: TunerConfig) -> Result<()> {
        config.validate()?;
        let tuning_changed = config.tuning != self.config.tuning;

        self.gate.set_noise_floor(config.noise_floor());
        self.chord_detector.set_reference(config.a4_reference);
        if tuning_changed {
            self.in_tune.reset(config.tuning.strings.len());
            self.previous_string = None;
        }
        if tuning_changed || config.selected_string != self.config.selected_string {
            self.selected_string = config.selected_string;
        }
        if !config.secondary_estimator {
            self.supervisor.reset();
            self.arbiter.reset();
        }
        if !config.chord_detection {
            self.reset_chords();
        }

        info!(
            tuning = %config.tuning.id,
            a4 = config.a4_reference,
            precision = config.precision_mode,
            "tuner config updated"
        );
        self.config = config;
        Ok(())
    }

    /// Targets one string, or `None` for nearest-string matching.
    pub fn select_string(&mut self, index: Option<usize>) -> Result<()> {
        if let Some(i) = index {
            if i >= self.config.tuning.strings.len() {
                return Err(TunerError::Config(format!(
                    "string {i} out of range for '{}'",
                    self.config.tuning.id
                )));
            }
        }
        self.selected_string = index;
        self.previous_string = index;
        Ok(())
    }

    /// Clears all session state. Settings are kept.
    pub fn reset(&mut self) {
        self.supervisor.reset();
        self.arbiter.reset();
        self.gate.reset();
        self.median.clear();
        self.display.reset();
        self.in_tune.reset(self.config.tuning.strings.len());
        self.lost_signal.reset();
        self.reset_chords();
        self.announcer.reset();
        self.previous_frequency = None;
        self.previous_yin = None;
        self.previous_string = None;
        self.selected_string = self.config.selected_string;
        self.last_frame = None;
        self.frame_index = 0;
        debug!("pipeline reset");
    }

    /// Processes a buffer, timestamping it from the frame index.
    pub fn process(&mut self, samples: &[f32]) -> Option<TunerFrame> {
        let timestamp_ms = self.constants.frame_timestamp_ms(self.frame_index);
        self.process_buffer(samples, timestamp_ms)
    }

    /// Processes one buffer captured at `timestamp_ms`.
    ///
    /// Returns `None` only for a malformed buffer, which is dropped without
    /// touching any state.
    pub fn process_buffer(&mut self, samples: &[f32], timestamp_ms: u64) -> Option<TunerFrame> {
        if let Err(err) = validate_buffer(samples) {
            debug!(error = %err, "dropping malformed buffer");
            return None;
        }
        let frame_index = self.frame_index;
        self.frame_index += 1;

        let level = rms(samples);
        let gate = self.gate.update(level);
        let frame = match gate {
            GateDecision::Onset | GateDecision::Blanked => {
                if gate == GateDecision::Onset {
                    debug!(frame_index, level, "onset");
                    self.forget_note();
                }
                self.carry_forward(frame_index, timestamp_ms, level, gate)
            }
            GateDecision::Silent => {
                self.forget_note();
                self.chromagram = [0.0; SEMITONES];
                let chord = self.update_chords(None, frame_index, timestamp_ms, None);
                self.no_reading(frame_index, timestamp_ms, level, gate, chord)
            }
            GateDecision::Process => self.analyze(samples, frame_index, timestamp_ms, level),
        };

        self.last_frame = Some(frame.clone());
        Some(frame)
    }

    fn analyze(
        &mut self,
        samples: &[f32],
        frame_index: u64,
        timestamp_ms: u64,
        level: f32,
    ) -> TunerFrame {
        let sample_rate = self.constants.sample_rate;
        let a4 = self.config.a4_reference;

        let yin = self
            .detector
            .detect(samples, sample_rate, self.previous_frequency);
        if let (Some(current), Some(previous)) = (yin, self.previous_yin) {
            if semitone_gap(current.frequency_hz, previous) > SMALL_GAP_SEMITONES {
                debug!(
                    frame_index,
                    from_hz = previous,
                    to_hz = current.frequency_hz,
                    "note change"
                );
                self.supervisor.reset();
                self.arbiter.reset();
            }
        }
        if let Some(current) = yin {
            self.previous_yin = Some(current.frequency_hz);
        }
        let neural = if self.config.secondary_estimator {
            self.supervisor.poll(samples, sample_rate, frame_index)
        } else {
            None
        };

        let Some(yin) = yin else {
            let chord = self.update_chords(Some(samples), frame_index, timestamp_ms, None);
            return self.no_reading(frame_index, timestamp_ms, level, GateDecision::Process, chord);
        };

        let decision = self.arbiter.decide(yin, neural);
        self.previous_frequency = Some(decision.result.frequency_hz);
        let frequency = self.median.push(decision.result.frequency_hz);

        let Some(note) = map_frequency(frequency, a4) else {
            let chord = self.update_chords(Some(samples), frame_index, timestamp_ms, None);
            return self.no_reading(frame_index, timestamp_ms, level, GateDecision::Process, chord);
        };

        let string_match = match self.selected_string {
            Some(index) => match_string(&note, &self.config.tuning, index, a4),
            None => find_nearest_string_with_hysteresis(
                &note,
                &self.config.tuning,
                self.previous_string,
                STRING_SWITCH_HYSTERESIS_CENTS,
                a4,
            ),
        };
        self.previous_string = string_match.as_ref().map(|m| m.string_index);

        let cents = string_match
            .as_ref()
            .map_or(note.cents, |m| m.cents_from_target);
        let status = tuning_status(Some(cents), self.config.in_tune_threshold());
        let display_cents = self.display.update(cents);

        let newly_tuned = self.in_tune.update(status, self.previous_string);
        if let Some(index) = newly_tuned {
            info!(string = index, note = %note.label(), "string tuned");
            if self.config.auto_advance && self.selected_string.is_some() {
                self.selected_string = self.in_tune.next_untuned(index).or(self.selected_string);
            }
        }

        self.arpeggio.add(note.pitch_class, timestamp_ms);
        self.lost_signal.mark(timestamp_ms);
        let chord = self.update_chords(
            Some(samples),
            frame_index,
            timestamp_ms,
            Some(note.pitch_class),
        );

        let announcement = self.announce(
            newly_tuned.zip(string_match.as_ref()),
            &note,
            status,
            cents,
            timestamp_ms,
        );

        TunerFrame {
            frame_index,
            timestamp_ms,
            level,
            gate: GateDecision::Process,
            frequency_hz: Some(frequency),
            cents: Some(cents),
            display_cents: Some(display_cents),
            confidence: decision.result.confidence,
            status,
            string_match,
            selected_string: self.selected_string,
            tuned_strings: self.in_tune.tuned().to_vec(),
            chromagram: self.chromagram,
            chord,
            neural_status: self.neural_status(frame_index),
            arbitration: Some(decision.reason),
            held: false,
            announcement,
            note: Some(note),
        }
    }

    /// Drops everything tied to the note that was sounding: continuity,
    /// median history and secondary readings.
    fn forget_note(&mut self) {
        self.previous_frequency = None;
        self.previous_yin = None;
        self.median.clear();
        self.supervisor.reset();
        self.arbiter.reset();
    }

    /// Frame for a buffer that produced no reading: either the last reading
    /// kept through a short dropout, or silence.
    fn no_reading(
        &mut self,
        frame_index: u64,
        timestamp_ms: u64,
        level: f32,
        gate: GateDecision,
        chord: Option<ChordReading>,
    ) -> TunerFrame {
        if self.lost_signal.holding(timestamp_ms) {
            if let Some(last) = self.last_frame.as_ref().filter(|f| f.note.is_some()) {
                return TunerFrame {
                    frame_index,
                    timestamp_ms,
                    level,
                    gate,
                    chromagram: self.chromagram,
                    chord,
                    neural_status: self.neural_status(frame_index),
                    arbitration: None,
                    held: true,
                    announcement: None,
                    ..last.clone()
                };
            }
        }

        self.in_tune.update(TuningStatus::Silent, None);
        self.display.reset();
        TunerFrame {
            chord,
            ..self.silent_frame(frame_index, timestamp_ms, level, gate)
        }
    }

    /// Frame for a blanked buffer: nothing is updated.
    fn carry_forward(
        &self,
        frame_index: u64,
        timestamp_ms: u64,
        level: f32,
        gate: GateDecision,
    ) -> TunerFrame {
        match &self.last_frame {
            Some(last) => TunerFrame {
                frame_index,
                timestamp_ms,
                level,
                gate,
                announcement: None,
                ..last.clone()
            },
            None => self.silent_frame(frame_index, timestamp_ms, level, gate),
        }
    }

    fn silent_frame(
        &self,
        frame_index: u64,
        timestamp_ms: u64,
        level: f32,
        gate: GateDecision,
    ) -> TunerFrame {
        TunerFrame {
            frame_index,
            timestamp_ms,
            level,
            gate,
            note: None,
            frequency_hz: None,
            cents: None,
            display_cents: None,
            confidence: 0.0,
            status: TuningStatus::Silent,
            string_match: None,
            selected_string: self.selected_string,
            tuned_strings: self.in_tune.tuned().to_vec(),
            chromagram: self.chromagram,
            chord: self.merged_chord(),
            neural_status: self.neural_status(frame_index),
            arbitration: None,
            held: false,
            announcement: None,
        }
    }

    /// Runs both chord paths and returns the merged chord.
    fn update_chords(
        &mut self,
        samples: Option<&[f32]>,
        frame_index: u64,
        timestamp_ms: u64,
        preferred_root: Option<u8>,
    ) -> Option<ChordReading> {
        if !self.config.chord_detection {
            return None;
        }

        if frame_index % self.constants.chord_interval.max(1) == 0 {
            let detected = samples.and_then(|samples| {
                match self.chord_detector.detect(samples, preferred_root) {
                    Ok(result) => {
                        self.chromagram = result.chromagram;
                        result
                            .detection
                            .chord()
                            .cloned()
                            .map(|chord| (chord, result.confidence))
                    }
                    Err(err) => {
                        debug!(error = %err, "chord analysis skipped");
                        None
                    }
                }
            });
            let confidence = detected.as_ref().map_or(0.0, |(_, c)| *c);
            let name = detected.as_ref().map(|(chord, _)| chord.name.clone());

            if self.chord_stabilizer.update(detected.map(|(chord, _)| chord)) {
                self.simultaneous = self.chord_stabilizer.shown().map(|chord| ChordReading {
                    chord: chord.clone(),
                    confidence,
                    source: ChordSource::Simultaneous,
                    confirmed_at_ms: timestamp_ms,
                });
            }
            match self.chord_stabilizer.shown() {
                None => self.simultaneous = None,
                Some(shown) if name.as_deref() == Some(shown.name.as_str()) => {
                    if let Some(reading) = self.simultaneous.as_mut() {
                        reading.confidence = confidence;
                    }
                }
                Some(_) => {}
            }
        }

        let detection = self.arpeggio.detect(timestamp_ms, preferred_root);
        let window = self.arpeggio.pitch_classes().len().max(1);
        if self.arpeggio_stabilizer.update(detection.chord().cloned()) {
            self.arpeggiated = self.arpeggio_stabilizer.shown().map(|chord| ChordReading {
                confidence: chord.pitch_classes().len() as f32 / window as f32,
                chord: chord.clone(),
                source: ChordSource::Arpeggio,
                confirmed_at_ms: timestamp_ms,
            });
        }
        if self.arpeggio_stabilizer.shown().is_none() {
            self.arpeggiated = None;
        }

        self.merged_chord()
    }

    /// The most recently confirmed of the two chord paths.
    fn merged_chord(&self) -> Option<ChordReading> {
        match (&self.simultaneous, &self.arpeggiated) {
            (Some(s), Some(a)) if a.confirmed_at_ms > s.confirmed_at_ms => Some(a.clone()),
            (Some(s), _) => Some(s.clone()),
            (None, a) => a.clone(),
        }
    }

    fn reset_chords(&mut self) {
        self.chord_stabilizer.reset();
        self.arpeggio.reset();
        self.arpeggio_stabilizer.reset();
        self.simultaneous = None;
        self.arpeggiated = None;
        self.chromagram = [0.0; SEMITONES];
    }

    fn neural_status(&self, frame_index: u64) -> NeuralStatus {
        if self.config.secondary_estimator {
            self.supervisor.status(frame_index)
        } else {
            NeuralStatus::Unavailable
        }
    }

    fn announce(
        &mut self,
        tuned: Option<(usize, &StringMatch)>,
        note: &NoteInfo,
        status: TuningStatus,
        cents: f32,
        timestamp_ms: u64,
    ) -> Option<Announcement> {
        if !self.config.announcements {
            return None;
        }
        let candidate = match tuned {
            Some((string_index, string)) => Announcement::StringTuned {
                string_index,
                string_name: string.string_name.clone(),
            },
            None => Announcement::Note {
                note: note.label(),
                status,
                cents,
            },
        };
        self.announcer.offer(candidate, timestamp_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::{NeuralPitchResult, PitchEstimator};
    use crate::smoothing::{BLANKING_FRAMES, MEDIAN_WINDOW};
    use crate::tuning::{midi_to_frequency, preset};
    use std::f32::consts::PI;

    const SR: u32 = 44_100;
    const N: usize = 4096;
    const HOP: usize = 1024;

    fn tone(freqs: &[f32], amplitude: f32, frame: usize) -> Vec<f32> {
        (0..N)
            .map(|i| {
                let t = (frame * HOP + i) as f32 / SR as f32;
                freqs
                    .iter()
                    .map(|f| amplitude * (2.0 * PI * f * t).sin())
                    .sum()
            })
            .collect()
    }

    fn silence() -> Vec<f32> {
        vec![0.0; N]
    }

    fn pipeline(config: TunerConfig) -> TunerPipeline {
        TunerPipeline::new(config).unwrap()
    }

    fn yin_only() -> TunerConfig {
        TunerConfig {
            secondary_estimator: false,
            ..TunerConfig::default()
        }
    }

    struct Fixed(f32, f32);

    impl PitchEstimator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn estimate(&mut self, _: &[f32], _: u32) -> Result<Option<NeuralPitchResult>> {
            Ok(Some(NeuralPitchResult {
                frequency_hz: self.0,
                confidence: self.1,
            }))
        }
    }

    #[test]
    fn malformed_buffer_is_dropped_without_state_change() {
        let mut p = pipeline(yin_only());
        assert!(p.process(&vec![0.1; 1000]).is_none());
        assert_eq!(p.frame_index(), 0);
        assert!(p.last_frame().is_none());
    }

    #[test]
    fn silence_is_silent() {
        let mut p = pipeline(yin_only());
        let frame = p.process(&silence()).unwrap();
        assert_eq!(frame.status, TuningStatus::Silent);
        assert_eq!(frame.gate, GateDecision::Silent);
        assert!(frame.note.is_none());
        assert_eq!(frame.note_label(), "--");
        assert_eq!(frame.tuned_strings, vec![false; 4]);
    }

    #[test]
    fn sine_reads_as_its_note() {
        let mut p = pipeline(yin_only());
        let a4 = midi_to_frequency(69, 440.0);
        let frame = p.process(&tone(&[a4], 0.5, 0)).unwrap();
        assert_eq!(frame.gate, GateDecision::Process);
        assert_eq!(frame.note_label(), "A4");
        assert_eq!(frame.string_match.as_ref().unwrap().string_index, 3);
        assert_eq!(frame.status, TuningStatus::InTune);
        assert!(frame.cents.unwrap().abs() < 2.0);
    }

    #[test]
    fn onset_blanks_the_configured_number_of_frames() {
        let mut p = pipeline(yin_only());
        let e4 = midi_to_frequency(64, 440.0);
        p.process(&tone(&[e4], 0.02, 0)).unwrap();
        let before = p.process(&tone(&[e4], 0.02, 1)).unwrap();
        assert_eq!(before.gate, GateDecision::Process);

        let mut blanked = 0;
        for frame in 2..8 {
            let out = p.process(&tone(&[e4], 0.4, frame)).unwrap();
            if out.gate != GateDecision::Process {
                blanked += 1;
                assert_eq!(out.note, before.note);
            }
        }
        assert_eq!(blanked, BLANKING_FRAMES);
    }

    #[test]
    fn string_tuned_once_after_hold() {
        let mut p = pipeline(yin_only());
        let c4 = midi_to_frequency(60, 440.0);
        let hold = p.constants().in_tune_hold_frames();
        let mut flips = 0;
        let mut was_tuned = false;
        for frame in 0..hold + 10 {
            let out = p.process(&tone(&[c4], 0.5, frame)).unwrap();
            if out.tuned_strings[1] && !was_tuned {
                flips += 1;
                assert!(frame + 1 >= hold);
            }
            was_tuned = out.tuned_strings[1];
        }
        assert_eq!(flips, 1);
    }

    #[test]
    fn auto_advance_moves_the_selected_string() {
        let mut config = yin_only();
        config.selected_string = Some(1);
        let mut p = pipeline(config);
        let c4 = midi_to_frequency(60, 440.0);
        let hold = p.constants().in_tune_hold_frames();
        let mut last = None;
        for frame in 0..hold + 2 {
            last = p.process(&tone(&[c4], 0.5, frame));
        }
        let last = last.unwrap();
        assert!(last.tuned_strings[1]);
        assert_eq!(last.selected_string, Some(2));
        // Now measured against E4.
        assert_eq!(last.status, TuningStatus::Flat);
    }

    #[test]
    fn lost_signal_holds_then_goes_silent() {
        let mut p = pipeline(yin_only());
        let g4 = midi_to_frequency(67, 440.0);
        for frame in 0..5 {
            p.process(&tone(&[g4], 0.5, frame));
        }
        let held = p.process(&silence()).unwrap();
        assert!(held.held);
        assert_eq!(held.note_label(), "G4");

        let mut last = held;
        for _ in 0..30 {
            last = p.process(&silence()).unwrap();
        }
        assert!(!last.held);
        assert_eq!(last.status, TuningStatus::Silent);
    }

    #[test]
    fn strummed_chord_is_confirmed() {
        let mut p = pipeline(yin_only());
        let freqs: Vec<f32> = [60, 64, 67]
            .iter()
            .map(|&m| midi_to_frequency(m, 440.0))
            .collect();
        let mut last = None;
        for frame in 0..12 {
            last = p.process(&tone(&freqs, 0.2, frame));
        }
        let chord = last.unwrap().chord.expect("chord confirmed");
        assert_eq!(chord.chord.name, "C");
        let strummed = p.simultaneous.as_ref().expect("simultaneous path confirmed");
        assert_eq!(strummed.source, ChordSource::Simultaneous);
        assert_eq!(strummed.chord.name, "C");
        assert!(strummed.confidence > 0.5);
    }

    #[test]
    fn plucked_chord_comes_from_the_arpeggio_path() {
        let mut p = pipeline(yin_only());
        let mut frame = 0;
        let mut last = None;
        for midi in [67, 60, 64] {
            let f = midi_to_frequency(midi, 440.0);
            for _ in 0..3 {
                p.process(&silence());
                frame += 1;
            }
            for _ in 0..10 {
                last = p.process(&tone(&[f], 0.4, frame));
                frame += 1;
            }
        }
        let chord = last.unwrap().chord.expect("arpeggio chord");
        assert_eq!(chord.chord.name, "C");
        assert_eq!(chord.source, ChordSource::Arpeggio);
    }

    #[test]
    fn chord_detection_can_be_disabled() {
        let mut config = yin_only();
        config.chord_detection = false;
        let mut p = pipeline(config);
        let freqs: Vec<f32> = [60, 64, 67]
            .iter()
            .map(|&m| midi_to_frequency(m, 440.0))
            .collect();
        for frame in 0..12 {
            let out = p.process(&tone(&freqs, 0.2, frame)).unwrap();
            assert!(out.chord.is_none());
            assert_eq!(out.chromagram, [0.0; SEMITONES]);
        }
    }

    #[test]
    fn confident_secondary_estimate_corrects_octave() {
        let mut config = TunerConfig {
            tuning: preset("guitar-standard").unwrap(),
            ..TunerConfig::default()
        };
        config.chord_detection = false;
        let supervisor =
            NeuralPitchSupervisor::new(Some(Box::new(Fixed(220.0, 0.95)))).with_timing(5, 10);
        let mut p = pipeline(config).with_supervisor(supervisor);

        let mut last = None;
        for frame in 0..20 {
            last = p.process(&tone(&[110.0], 0.5, frame));
        }
        let last = last.unwrap();
        assert_eq!(last.arbitration, Some(ArbitrationReason::OctaveCorrection));
        assert_eq!(last.note_label(), "A3");
        assert_eq!(last.neural_status, NeuralStatus::Active);
    }

    #[test]
    fn new_note_is_not_overridden_by_the_previous_one() {
        let mut p = pipeline(TunerConfig::default());
        let g3 = midi_to_frequency(55, 440.0);
        let c4 = midi_to_frequency(60, 440.0);
        let switch = 21;
        for frame in 0..switch {
            p.process(&tone(&[g3], 0.5, frame));
        }
        assert_eq!(p.last_frame().unwrap().note_label(), "G3");

        let after: Vec<TunerFrame> = (switch..switch + 15)
            .map(|frame| p.process(&tone(&[c4], 0.5, frame)).unwrap())
            .collect();
        for frame in &after {
            assert!(
                !matches!(
                    frame.arbitration,
                    Some(ArbitrationReason::StrongDisagreement | ArbitrationReason::OctaveCorrection)
                ),
                "frame {} overridden: {:?}",
                frame.frame_index,
                frame.arbitration
            );
        }
        // Only the median window delays the change.
        for frame in &after[MEDIAN_WINDOW / 2..] {
            assert_eq!(frame.note_label(), "C4", "frame {}", frame.frame_index);
        }
    }

    #[test]
    fn sustained_octave_jump_is_followed() {
        let mut p = pipeline(yin_only());
        for frame in 0..10 {
            p.process(&tone(&[110.0], 0.5, frame));
        }
        assert_eq!(p.last_frame().unwrap().note_label(), "A2");

        let after: Vec<TunerFrame> = (10..30)
            .map(|frame| p.process(&tone(&[220.0], 0.5, frame)).unwrap())
            .collect();
        for frame in &after[MEDIAN_WINDOW / 2..] {
            assert_eq!(frame.note_label(), "A3", "frame {}", frame.frame_index);
        }
    }

    #[test]
    fn reset_clears_session_state() {
        let mut p = pipeline(yin_only());
        let c4 = midi_to_frequency(60, 440.0);
        for frame in 0..p.constants().in_tune_hold_frames() + 2 {
            p.process(&tone(&[c4], 0.5, frame));
        }
        assert!(p.last_frame().unwrap().tuned_strings[1]);
        p.reset();
        assert_eq!(p.frame_index(), 0);
        let frame = p.process(&silence()).unwrap();
        assert_eq!(frame.tuned_strings, vec![false; 4]);
        assert!(!frame.held);
    }

    #[test]
    fn config_updates_apply() {
        let mut p = pipeline(yin_only());
        let mut config = p.config().clone();
        config.tuning = preset("guitar-standard").unwrap();
        config.precision_mode = true;
        p.update_config(config).unwrap();
        let frame = p.process(&silence()).unwrap();
        assert_eq!(frame.tuned_strings.len(), 6);

        let mut bad = p.config().clone();
        bad.a4_reference = 1000.0;
        assert!(p.update_config(bad).is_err());
        assert_eq!(p.config().a4_reference, 440.0);

        assert!(p.select_string(Some(9)).is_err());
        p.select_string(Some(5)).unwrap();
    }

    #[test]
    fn announcements_follow_the_policy() {
        let mut config = yin_only();
        config.announcements = true;
        let mut p = pipeline(config);
        let a4 = midi_to_frequency(69, 440.0);
        let spoken: Vec<Announcement> = (0..20)
            .filter_map(|frame| p.process(&tone(&[a4], 0.5, frame)))
            .filter_map(|f| f.announcement)
            .collect();
        assert_eq!(spoken.len(), 1);
        assert!(matches!(&spoken[0], Announcement::Note { note, .. } if note == "A4"));
    }
}
