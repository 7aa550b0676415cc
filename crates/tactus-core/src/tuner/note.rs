//! Note classification
//!
//! Maps a detected frequency onto the equal-tempered scale relative to a
//! configurable reference pitch: nearest MIDI note, note name and octave,
//! and the cent offset from that note's exact frequency.

use serde::{Deserialize, Serialize};

/// Chromatic note names, C-based (index = midi % 12)
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// MIDI note number of A4
pub const A4_MIDI: i32 = 69;

/// The nearest equal-tempered note to a detected frequency
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteHypothesis {
    /// MIDI note number (0..=127)
    pub midi: u8,
    /// Note name without octave ("A", "C#", ...)
    pub name: &'static str,
    /// Scientific pitch octave (A4 = octave 4)
    pub octave: i32,
    /// Reference pitch the hypothesis was derived against
    pub reference_pitch_hz: f64,
}

/// How close the detected frequency is to the hypothesized note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningAccuracy {
    InTune,
    Close,
    Far,
}

/// A classified pitch: note, cent offset and accuracy bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub note: NoteHypothesis,
    /// Signed offset from the note's exact frequency (positive = sharp)
    pub cents: f64,
    pub accuracy: TuningAccuracy,
}

/// Frequency → note/cents classifier
#[derive(Debug, Clone, Copy)]
pub struct NoteClassifier {
    reference_pitch_hz: f64,
    in_tune_cents: f64,
    close_cents: f64,
}

impl NoteClassifier {
    pub fn new(reference_pitch_hz: f64) -> Self {
        Self {
            reference_pitch_hz: crate::types::clamp_reference_pitch(reference_pitch_hz),
            in_tune_cents: 5.0,
            close_cents: 20.0,
        }
    }

    /// Override the accuracy bucket thresholds (cents)
    pub fn with_thresholds(mut self, in_tune_cents: f64, close_cents: f64) -> Self {
        self.in_tune_cents = in_tune_cents;
        self.close_cents = close_cents.max(in_tune_cents);
        self
    }

    pub fn reference_pitch_hz(&self) -> f64 {
        self.reference_pitch_hz
    }

    /// Exact frequency of a MIDI note under the current reference pitch
    pub fn frequency_of_midi(&self, midi: u8) -> f64 {
        self.reference_pitch_hz * 2f64.powf((midi as f64 - A4_MIDI as f64) / 12.0)
    }

    /// Classify a frequency; `None` when it falls outside the MIDI range
    pub fn classify(&self, frequency_hz: f64) -> Option<Classification> {
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            return None;
        }

        let exact = A4_MIDI as f64 + 12.0 * (frequency_hz / self.reference_pitch_hz).log2();
        let midi = exact.round();
        if !(0.0..=127.0).contains(&midi) {
            return None;
        }
        let midi = midi as u8;

        let expected = self.frequency_of_midi(midi);
        let cents = 1200.0 * (frequency_hz / expected).log2();
        let accuracy = if cents.abs() < self.in_tune_cents {
            TuningAccuracy::InTune
        } else if cents.abs() < self.close_cents {
            TuningAccuracy::Close
        } else {
            TuningAccuracy::Far
        };

        Some(Classification {
            note: NoteHypothesis {
                midi,
                name: NOTE_NAMES[midi as usize % 12],
                octave: midi as i32 / 12 - 1,
                reference_pitch_hz: self.reference_pitch_hz,
            },
            cents,
            accuracy,
        })
    }
}

impl Default for NoteClassifier {
    fn default() -> Self {
        Self::new(crate::types::DEFAULT_REFERENCE_PITCH_HZ)
    }
}
