//! Observer events
//!
//! Hosts observe the engine through a bounded channel of plain-data events
//! rather than registered callbacks: the scheduler thread can publish
//! without allocation or locks, and a slow observer drops events instead of
//! stalling the beat pipeline.

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::clock::ClockInstant;
use crate::tuner::{NoteHypothesis, PitchReading, TuningAccuracy};
use crate::types::MetronomeConfig;

/// Capacity of the observer channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One observable engine event
#[derive(Debug, Clone, Copy)]
pub enum EngineEvent {
    /// An on-beat tick was dispatched
    Beat {
        bar: u64,
        beat_in_bar: u32,
        accent: bool,
        /// Scheduled monotonic time of the beat
        time: ClockInstant,
        /// Device-clock time the click was scheduled at (NaN without audio)
        audio_time: f64,
    },
    /// A subdivision tick was dispatched
    SubdivisionTick {
        bar: u64,
        beat_in_bar: u32,
        /// 1-based position within the beat (index 0 is the beat itself)
        index: u32,
    },
    /// Configuration or transport state changed
    StateChanged {
        config: MetronomeConfig,
        playing: bool,
        revision: u64,
    },
    /// The tuner classified a valid pitch reading
    Pitch {
        reading: PitchReading,
        note: NoteHypothesis,
        cents: f64,
        accuracy: TuningAccuracy,
    },
}

/// Create the engine → observers channel
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    bounded(EVENT_CHANNEL_CAPACITY)
}
