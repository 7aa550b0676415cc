//! Tactus Core - real-time metronome and chromatic tuner engine
//!
//! Drift-free beat scheduling against a monotonic clock, pre-rendered click
//! playback with lookahead priming, YIN pitch detection with note/cents
//! classification, haptic transient patterns, and latest-writer-wins state
//! replication with a paired peer.

pub mod audio;
pub mod clock;
pub mod config;
pub mod engine;
pub mod haptic;
pub mod sync;
pub mod timing;
pub mod tuner;
pub mod types;

pub use engine::{EngineEvent, EngineResult, Metronome};
pub use types::*;
