//! The core of the ukulele tuner.
//!
//! This crate turns microphone buffers into stabilized tuner state: detected
//! note and cents deviation, tuning status per string, and the chord being
//! strummed or plucked. It is headless; front ends read [`TunerFrame`]
//! snapshots and drive settings through [`TunerConfig`].
//!
//! The usual wiring is [`Microphone`] → [`frame_channel`] →
//! [`ListeningSession`] (which owns a [`TunerPipeline`]). Offline callers can
//! feed a pipeline directly.

pub mod arbitration;
pub mod arpeggio;
pub mod audio;
pub mod chord;
pub mod chromagram;
pub mod config;
pub mod error;
pub mod fft;
pub mod neural;
pub mod pipeline;
pub mod pitch;
pub mod session;
pub mod smoothing;
pub mod speech;
pub mod tuning;

pub use audio::{frame_channel, CaptureHandle, FrameSender, Framer, Microphone};
pub use chord::{ChordDetector, ChordResult, DetectionResult};
pub use config::{PipelineConstants, TunerConfig};
pub use error::{Result, TunerError};
pub use neural::{NeuralPitchSupervisor, NeuralStatus, PitchEstimator};
pub use pipeline::{ChordReading, ChordSource, TunerFrame, TunerPipeline};
pub use pitch::{PitchDetector, PitchResult};
pub use session::{ListeningSession, SessionCommand};
pub use tuning::{NoteInfo, StringMatch, Tuning, TuningStatus};
