//! # Engine Errors
//!
//! The error taxonomy surfaced by the control entry points of the session.
//! Low-confidence or quiet frames are never errors; they are the normal
//! silence path through the stabilizer.

/// Errors returned by the session controller and the sequence export.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The audio input could not be acquired (permission denied, no device,
    /// device busy). The session state is unchanged.
    #[error("audio capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// A configuration value was rejected. The previous value is retained.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Export or playback was requested with no recorded notes.
    #[error("the sequence is empty")]
    EmptySequence,

    /// Playback was requested while a capture session holds the input.
    #[error("cannot play back while a capture session is active")]
    CaptureActive,

    /// A note would overlap its predecessor or carries invalid timing.
    #[error("invalid sequence: {0}")]
    InvalidSequence(String),

    /// MIDI encoding or decoding failed.
    #[error("MIDI export error: {0}")]
    Export(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
