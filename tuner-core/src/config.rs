//! # Configuration Module
//!
//! User-facing settings ([`TunerConfig`]) and the fixed processing constants
//! of the pipeline ([`PipelineConstants`]).
//!
//! Settings are plain serde structs stored as JSON. Missing fields take their
//! defaults, so config files written by older versions keep loading.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::arpeggio::ARPEGGIO_WINDOW_MS;
use crate::error::{Result, TunerError};
use crate::neural::{NEURAL_RESULT_TTL_FRAMES, NEURAL_SUPERVISOR_INTERVAL};
use crate::smoothing::{
    frames_for_duration, CHORD_HOLD_FRAMES, CHORD_MISS_TOLERANCE, MEDIAN_WINDOW, NOISE_GATE_RMS,
};
use crate::tuning::{Tuning, PRECISION_IN_TUNE_CENTS, STANDARD_IN_TUNE_CENTS};

/// Capture sample rate in Hz.
pub const SAMPLE_RATE: u32 = 44_100;

/// Samples per analysis buffer.
pub const BUFFER_SIZE: usize = 4096;

/// Samples between the starts of consecutive buffers (75 % overlap).
pub const HOP_SIZE: usize = 1024;

/// How long a string must stay in tune before it is marked tuned.
pub const IN_TUNE_HOLD_MS: u64 = 800;

/// How long the last reading is kept on screen after the signal drops.
pub const LOST_SIGNAL_HOLD_MS: u64 = 400;

/// The simultaneous chord path runs on every Nth frame.
pub const CHORD_DETECTION_INTERVAL: u64 = 2;

/// Accepted range for the A4 reference.
pub const A4_RANGE_HZ: std::ops::RangeInclusive<f32> = 400.0..=480.0;

/// Accepted range for the noise-gate sensitivity multiplier.
pub const SENSITIVITY_RANGE: std::ops::RangeInclusive<f32> = 0.1..=10.0;

/// User settings for a tuner session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Active instrument tuning.
    pub tuning: Tuning,
    /// Frequency of A4 in Hz.
    pub a4_reference: f32,
    /// Use the narrow 2¢ in-tune window instead of 6¢.
    pub precision_mode: bool,
    /// Move to the next untuned string once the current one is tuned.
    pub auto_advance: bool,
    /// Noise gate sensitivity; higher values admit quieter input.
    pub sensitivity: f32,
    /// Run the chord paths.
    pub chord_detection: bool,
    /// Use the secondary pitch estimator for octave correction.
    pub secondary_estimator: bool,
    /// Produce spoken-feedback announcements.
    pub announcements: bool,
    /// Manually selected target string. `None` matches the nearest string.
    pub selected_string: Option<usize>,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            tuning: Tuning::default(),
            a4_reference: 440.0,
            precision_mode: false,
            auto_advance: true,
            sensitivity: 1.0,
            chord_detection: true,
            secondary_estimator: true,
            announcements: false,
            selected_string: None,
        }
    }
}

impl TunerConfig {
    /// Loads settings from a JSON file.
    ///
    /// A missing, unreadable or invalid file is not fatal: a warning is
    /// logged and the defaults are returned.
    pub fn load_from_file(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(config) => {
                info!(path = %path.display(), tuning = %config.tuning.id, "loaded tuner config");
                config
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "using default tuner config");
                Self::default()
            }
        }
    }

    /// Loads and validates settings, reporting any failure.
    pub fn try_load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TunerError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TunerError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes settings as pretty JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TunerError::Config(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| TunerError::Config(format!("{}: {e}", path.display())))
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if !A4_RANGE_HZ.contains(&self.a4_reference) {
            return Err(TunerError::Config(format!(
                "A4 reference {} Hz outside {}..={} Hz",
                self.a4_reference,
                A4_RANGE_HZ.start(),
                A4_RANGE_HZ.end()
            )));
        }
        if !SENSITIVITY_RANGE.contains(&self.sensitivity) {
            return Err(TunerError::Config(format!(
                "sensitivity {} outside {}..={}",
                self.sensitivity,
                SENSITIVITY_RANGE.start(),
                SENSITIVITY_RANGE.end()
            )));
        }
        if self.tuning.strings.is_empty() {
            return Err(TunerError::Config(format!(
                "tuning '{}' has no strings",
                self.tuning.id
            )));
        }
        if let Some(index) = self.selected_string {
            if index >= self.tuning.strings.len() {
                return Err(TunerError::Config(format!(
                    "selected string {index} out of range for '{}'",
                    self.tuning.id
                )));
            }
        }
        Ok(())
    }

    /// Active in-tune window in cents.
    pub fn in_tune_threshold(&self) -> f32 {
        if self.precision_mode {
            PRECISION_IN_TUNE_CENTS
        } else {
            STANDARD_IN_TUNE_CENTS
        }
    }

    /// RMS noise floor after sensitivity scaling.
    pub fn noise_floor(&self) -> f32 {
        NOISE_GATE_RMS / self.sensitivity.max(f32::EPSILON)
    }
}

/// Processing constants. Defaults match live capture; tests shorten them.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConstants {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per analysis buffer; must be a power of two.
    pub buffer_size: usize,
    /// Samples between the starts of consecutive buffers.
    pub hop_size: usize,
    /// How long a string must stay in tune before it is marked tuned.
    pub in_tune_hold_ms: u64,
    /// How long the last reading is kept through a dropout.
    pub lost_signal_hold_ms: u64,
    /// Age limit of plucked notes in the arpeggio window.
    pub arpeggio_window_ms: u64,
    /// Run the strummed chord path every this many frames.
    pub chord_interval: u64,
    /// Run the secondary pitch estimator every this many frames.
    pub neural_interval: u64,
    /// Frames a secondary reading stays usable.
    pub neural_ttl_frames: u64,
    /// Frequencies in the median filter.
    pub median_window: usize,
    /// Consecutive detections needed to confirm a chord.
    pub chord_hold_frames: usize,
    /// Missed detections tolerated before a shown chord is cleared.
    pub chord_miss_tolerance: usize,
}

impl Default for PipelineConstants {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            buffer_size: BUFFER_SIZE,
            hop_size: HOP_SIZE,
            in_tune_hold_ms: IN_TUNE_HOLD_MS,
            lost_signal_hold_ms: LOST_SIGNAL_HOLD_MS,
            arpeggio_window_ms: ARPEGGIO_WINDOW_MS,
            chord_interval: CHORD_DETECTION_INTERVAL,
            neural_interval: NEURAL_SUPERVISOR_INTERVAL,
            neural_ttl_frames: NEURAL_RESULT_TTL_FRAMES,
            median_window: MEDIAN_WINDOW,
            chord_hold_frames: CHORD_HOLD_FRAMES,
            chord_miss_tolerance: CHORD_MISS_TOLERANCE,
        }
    }
}

impl PipelineConstants {
    /// Time between consecutive frames in milliseconds.
    pub fn frame_ms(&self) -> f32 {
        self.hop_size as f32 * 1000.0 / self.sample_rate as f32
    }

    /// Frames a string must stay in tune.
    pub fn in_tune_hold_frames(&self) -> usize {
        frames_for_duration(self.in_tune_hold_ms, self.frame_ms())
    }

    /// Timestamp of a frame relative to the session start.
    pub fn frame_timestamp_ms(&self, frame_index: u64) -> u64 {
        frame_index * self.hop_size as u64 * 1000 / self.sample_rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::preset;

    #[test]
    fn defaults_are_valid() {
        let config = TunerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tuning.id, "ukulele-standard");
        assert_eq!(config.in_tune_threshold(), 6.0);
    }

    #[test]
    fn precision_narrows_the_window() {
        let config = TunerConfig {
            precision_mode: true,
            ..TunerConfig::default()
        };
        assert_eq!(config.in_tune_threshold(), 2.0);
    }

    #[test]
    fn sensitivity_lowers_the_noise_floor() {
        let mut config = TunerConfig::default();
        assert!((config.noise_floor() - 0.01).abs() < 1e-6);
        config.sensitivity = 2.0;
        assert!((config.noise_floor() - 0.005).abs() < 1e-6);
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut config = TunerConfig::default();
        config.a4_reference = 390.0;
        assert!(matches!(config.validate(), Err(TunerError::Config(_))));

        let mut config = TunerConfig::default();
        config.sensitivity = 0.0;
        assert!(config.validate().is_err());

        let mut config = TunerConfig::default();
        config.tuning.strings.clear();
        assert!(config.validate().is_err());

        let mut config = TunerConfig::default();
        config.selected_string = Some(4);
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config: TunerConfig =
            serde_json::from_str(r#"{ "a4_reference": 442.0, "precision_mode": true }"#).unwrap();
        assert_eq!(config.a4_reference, 442.0);
        assert!(config.precision_mode);
        assert!(config.chord_detection);
        assert_eq!(config.tuning, Tuning::default());
    }

    #[test]
    fn file_round_trip_and_fallback() {
        let dir = std::env::temp_dir().join(format!("uketuner-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tuner.json");

        let config = TunerConfig {
            tuning: preset("baritone").unwrap(),
            a4_reference: 432.0,
            ..TunerConfig::default()
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(TunerConfig::load_from_file(&path), config);

        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(TunerConfig::load_from_file(&path), TunerConfig::default());
        assert!(TunerConfig::try_load(&path).is_err());

        let missing = dir.join("missing.json");
        assert_eq!(TunerConfig::load_from_file(&missing), TunerConfig::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn frame_timing() {
        let constants = PipelineConstants::default();
        assert!((constants.frame_ms() - 23.22).abs() < 0.01);
        assert_eq!(constants.in_tune_hold_frames(), 35);
        assert_eq!(constants.frame_timestamp_ms(0), 0);
        assert_eq!(constants.frame_timestamp_ms(44), 1021);
    }
}
