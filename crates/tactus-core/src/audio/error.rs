//! Click playback error types

use thiserror::Error;

/// Errors raised while bringing up or controlling the click output
///
/// None of these stall the metronome: the orchestrator records the error
/// and keeps running haptic/visual beats without clicks.
#[derive(Error, Debug)]
pub enum AudioError {
    /// The host has no output device to play clicks on
    #[error("no output device available for click playback")]
    NoDevices,

    /// The device rejected or failed the configuration query
    #[error("click output device configuration failed: {0}")]
    ConfigError(String),

    /// The click stream could not be built on the chosen device
    #[error("could not build the click stream: {0}")]
    StreamBuildError(String),

    /// The click stream refused to start, pause or resume
    #[error("could not control the click stream: {0}")]
    StreamPlayError(String),

    /// The device offers no f32 output configuration
    #[error("unsupported click output format: {0}")]
    UnsupportedFormat(String),
}

/// Result type for click playback operations
pub type AudioResult<T> = Result<T, AudioError>;
