//! Error types for sonomorph-engine.

use thiserror::Error;

use crate::morph::ops::OpId;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on the control plane.
///
/// Everything here is rejected before a configuration reaches the audio
/// thread; the audio path itself never returns errors (missing data
/// renders as silence).
#[derive(Debug, Error)]
pub enum Error {
    /// Model-level validation failed.
    #[error(transparent)]
    Model(#[from] sonomorph_model::Error),

    /// The plan has no output operator.
    #[error("plan has no output operator")]
    MissingOutput,

    /// An operator references an id that is not in the plan.
    #[error("operator {referrer:?} references unknown operator {target:?}")]
    DanglingReference { referrer: OpId, target: OpId },

    /// An operator reference has the wrong output type, e.g. an LFO wired
    /// where an audio source is needed.
    #[error("operator {referrer:?} expects {expected} input from {target:?}")]
    TypeMismatch {
        referrer: OpId,
        target: OpId,
        expected: &'static str,
    },

    /// The audio graph contains a cycle.
    #[error("plan contains a dependency cycle through {0:?}")]
    DependencyCycle(OpId),

    /// A named instrument is not present in the index.
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    /// Grid dimensions and node list disagree.
    #[error("grid is {width}x{height} but has {nodes} nodes")]
    BadGridShape {
        width: usize,
        height: usize,
        nodes: usize,
    },

    /// Parameter outside its valid range.
    #[error("invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}
