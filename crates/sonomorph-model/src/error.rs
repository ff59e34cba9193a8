//! Error types for sonomorph-model.

use thiserror::Error;

/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing or validating model data.
///
/// These surface on the control plane only; the audio path treats bad data
/// as "no signal" and never returns errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Loop boundaries are inverted or out of range.
    #[error("invalid loop range: start={start}, end={end} (frames={frames})")]
    InvalidLoopRange {
        start: usize,
        end: usize,
        frames: usize,
    },

    /// A rate parameter (mix freq, frame step) is zero, negative or NaN.
    #[error("invalid rate: {name} = {value}")]
    InvalidRate { name: &'static str, value: f32 },

    /// A frame's partials are not sorted by frequency.
    #[error("frame {frame} violates the sorted-frequency invariant")]
    UnsortedPartials { frame: usize },

    /// A frame carries a noise envelope of the wrong band count.
    #[error("frame {frame} has {got} noise bands, expected {expected}")]
    BadNoiseEnvelope {
        frame: usize,
        got: usize,
        expected: usize,
    },

    /// A wave set has no entries.
    #[error("wave set is empty")]
    EmptyWavSet,

    /// A velocity range is inverted.
    #[error("invalid velocity range: {min}..={max}")]
    InvalidVelocityRange { min: u8, max: u8 },
}
