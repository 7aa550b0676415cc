//! Chromatic tuner: capture, pitch detection, note classification

mod capture;
mod note;
mod yin;

pub use capture::{
    analyze_block, BlockAccumulator, CaptureBlock, CaptureError, Tuner, TunerUpdate,
    CAPTURE_BLOCK_SIZE, PREFERRED_CAPTURE_RATE,
};
pub use note::{
    Classification, NoteClassifier, NoteHypothesis, TuningAccuracy, A4_MIDI, NOTE_NAMES,
};
pub use yin::{
    PitchDetector, PitchReading, MAX_FREQUENCY_HZ, MIN_FREQUENCY_HZ, RMS_GATE, VALID_CONFIDENCE,
};
