//! Error types for the session model and controller protocol

use thiserror::Error;

use crate::types::Timecode;

/// Errors decoding or validating a shot reference
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShotError {
    /// Body is not a well-formed shot reference
    #[error("Malformed shot reference: {0}")]
    Malformed(String),

    /// Shot names a source the registry does not have
    #[error("Unknown source {index} (have {count})")]
    UnknownSource { index: usize, count: usize },

    /// Negative start timecode
    #[error("Invalid start timecode {0}")]
    InvalidStart(Timecode),

    /// Negative length
    #[error("Invalid shot length {0}")]
    InvalidLength(i64),
}

impl From<serde_json::Error> for ShotError {
    fn from(e: serde_json::Error) -> Self {
        ShotError::Malformed(e.to_string())
    }
}

/// Errors reported by a video/audio source while materialising media
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Requested position is outside the retained buffer
    #[error("Timecode {requested} outside retained window {oldest}..={live}")]
    OutOfRange {
        requested: Timecode,
        oldest: Timecode,
        live: Timecode,
    },

    /// Source has not produced any frames yet
    #[error("Source has no frames")]
    Empty,

    /// No source at this index
    #[error("Unknown source {0}")]
    UnknownSource(usize),

    /// Underlying storage or hardware failed
    #[error("Source I/O failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e.to_string())
    }
}

/// Errors applying a controller input to the session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// Shuttle value outside the fixed lookup table
    #[error("Shuttle value {0} outside -6..=6")]
    ShuttleOutOfRange(i32),

    /// Speed fraction with a zero denominator
    #[error("Invalid speed {0}/{1}")]
    InvalidSpeed(u32, u32),
}

/// Errors produced by a controller input device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    /// Device could not be opened or read
    #[error("Controller I/O failed: {0}")]
    Io(String),

    /// A record or line could not be decoded
    #[error("Malformed controller input: {0}")]
    Malformed(String),
}

impl From<std::io::Error> for InputError {
    fn from(e: std::io::Error) -> Self {
        InputError::Io(e.to_string())
    }
}
