//! # Error Module
//!
//! Errors surfaced by the tuner core. Detection itself never fails: silence,
//! noise and unmatched chords are modelled as values. The variants here cover
//! the capture resource, malformed input, configuration and the optional
//! secondary estimator.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TunerError>;

/// Errors returned by the tuner core.
#[derive(Debug, Error)]
pub enum TunerError {
    /// A capture handle is already live for this microphone.
    #[error("microphone is already capturing; stop the active session first")]
    AlreadyCapturing,

    /// The audio host reported no input device.
    #[error("no audio input device available")]
    NoInputDevice,

    /// The input device offers no usable sample format.
    #[error("unsupported input format: {0}")]
    UnsupportedFormat(String),

    /// Building or running the input stream failed.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// A buffer was empty or not a power of two in length.
    #[error("invalid buffer of length {len}: expected a non-empty power of two")]
    InvalidBuffer {
        /// Length of the rejected buffer.
        len: usize,
    },

    /// A configuration value is out of range.
    #[error("configuration error: {0}")]
    Config(String),

    /// The secondary pitch estimator failed for one call.
    #[error("pitch estimator error: {0}")]
    Estimator(String),

    /// The processing thread is gone.
    #[error("listening session is closed")]
    SessionClosed,
}

impl From<anyhow::Error> for TunerError {
    fn from(err: anyhow::Error) -> Self {
        TunerError::Stream(format!("{err:#}"))
    }
}
