//! Common types for Tactus
//!
//! This module contains the fundamental value types shared by the metronome
//! engine, the click scheduler, and the peer sync layer: time signatures,
//! subdivisions, accent patterns, and the authoritative metronome
//! configuration.

use serde::{Deserialize, Serialize};

/// Tempo range accepted by the engine (values outside are clamped)
pub const MIN_BPM: u16 = 20;
pub const MAX_BPM: u16 = 300;
pub const DEFAULT_BPM: u16 = 120;

/// Maximum beats per bar supported by the fixed-capacity accent pattern
pub const MAX_BEATS_PER_BAR: usize = 32;

/// Concert pitch range for the tuner reference (A4)
pub const MIN_REFERENCE_PITCH_HZ: f64 = 415.0;
pub const MAX_REFERENCE_PITCH_HZ: f64 = 466.0;
pub const DEFAULT_REFERENCE_PITCH_HZ: f64 = 440.0;

/// Audio sample type used on the click bus (mono f32)
pub type Sample = f32;

/// Clamp a tempo to the supported range
#[inline]
pub fn clamp_bpm(bpm: u16) -> u16 {
    bpm.clamp(MIN_BPM, MAX_BPM)
}

/// Clamp a tuner reference pitch to the supported range
#[inline]
pub fn clamp_reference_pitch(hz: f64) -> f64 {
    hz.clamp(MIN_REFERENCE_PITCH_HZ, MAX_REFERENCE_PITCH_HZ)
}

/// The note value that receives one beat
///
/// Serialized as its numeric denominator (2, 4, 8 or 16), which is also the
/// representation used on the peer wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum BeatUnit {
    Half,
    #[default]
    Quarter,
    Eighth,
    Sixteenth,
}

impl BeatUnit {
    /// Denominator of the time signature (2, 4, 8 or 16)
    pub fn denominator(self) -> u8 {
        match self {
            BeatUnit::Half => 2,
            BeatUnit::Quarter => 4,
            BeatUnit::Eighth => 8,
            BeatUnit::Sixteenth => 16,
        }
    }

    /// Parse a denominator; anything other than 2/4/8/16 is rejected
    pub fn from_denominator(value: u8) -> Option<Self> {
        match value {
            2 => Some(BeatUnit::Half),
            4 => Some(BeatUnit::Quarter),
            8 => Some(BeatUnit::Eighth),
            16 => Some(BeatUnit::Sixteenth),
            _ => None,
        }
    }
}

impl From<BeatUnit> for u8 {
    fn from(unit: BeatUnit) -> u8 {
        unit.denominator()
    }
}

impl TryFrom<u8> for BeatUnit {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        BeatUnit::from_denominator(value)
            .ok_or_else(|| format!("invalid beat unit: {} (expected 2, 4, 8 or 16)", value))
    }
}

/// A time signature (beats per bar over a beat unit)
///
/// Immutable value type. Replacing the signature resets the bar/beat counters
/// and resizes the accent pattern to the new length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    beats_per_bar: u8,
    beat_unit: BeatUnit,
}

impl TimeSignature {
    /// Create a time signature, clamping beats per bar to 1..=32
    pub fn new(beats_per_bar: u8, beat_unit: BeatUnit) -> Self {
        Self {
            beats_per_bar: beats_per_bar.clamp(1, MAX_BEATS_PER_BAR as u8),
            beat_unit,
        }
    }

    pub fn beats_per_bar(&self) -> u8 {
        self.beats_per_bar
    }

    pub fn beat_unit(&self) -> BeatUnit {
        self.beat_unit
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, BeatUnit::Quarter)
    }
}

impl std::fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.beats_per_bar, self.beat_unit.denominator())
    }
}

/// Even division of a beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Subdivision {
    /// Beats only
    #[default]
    None,
    /// Two ticks per beat
    Eighth,
    /// Three ticks per beat
    Triplet,
    /// Four ticks per beat
    Sixteenth,
}

impl Subdivision {
    /// Ticks per beat (1 when subdivision is off)
    pub fn divisor(self) -> u32 {
        match self {
            Subdivision::None => 1,
            Subdivision::Eighth => 2,
            Subdivision::Triplet => 3,
            Subdivision::Sixteenth => 4,
        }
    }

    pub fn is_enabled(self) -> bool {
        self.divisor() > 1
    }

    /// Parse a wire-format divisor (2, 3 or 4)
    pub fn from_divisor(value: u32) -> Option<Self> {
        match value {
            1 => Some(Subdivision::None),
            2 => Some(Subdivision::Eighth),
            3 => Some(Subdivision::Triplet),
            4 => Some(Subdivision::Sixteenth),
            _ => None,
        }
    }
}

/// Which of the three click sounds to play for a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Accent,
    Normal,
    Subdivision,
}

/// Per-beat accent flags for one bar
///
/// Fixed capacity (no allocation, safe to copy into the scheduler thread's
/// config snapshot). Invariant: at least one beat is accented; any mutation
/// that would clear the last accent re-asserts beat 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<bool>", from = "Vec<bool>")]
pub struct AccentPattern {
    bits: [bool; MAX_BEATS_PER_BAR],
    len: u8,
}

impl AccentPattern {
    /// Pattern with the first beat accented and the rest plain
    pub fn standard(len: u8) -> Self {
        let len = len.clamp(1, MAX_BEATS_PER_BAR as u8);
        let mut bits = [false; MAX_BEATS_PER_BAR];
        bits[0] = true;
        Self { bits, len }
    }

    /// Build from explicit flags, enforcing the at-least-one-accent invariant
    ///
    /// An empty slice yields the shortest valid pattern (a single accented
    /// beat); overlong input is truncated.
    pub fn from_flags(flags: &[bool]) -> Self {
        if flags.is_empty() {
            return Self::standard(1);
        }
        let len = flags.len().min(MAX_BEATS_PER_BAR);
        let mut bits = [false; MAX_BEATS_PER_BAR];
        bits[..len].copy_from_slice(&flags[..len]);
        let mut pattern = Self {
            bits,
            len: len as u8,
        };
        pattern.assert_invariant();
        pattern
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the given beat is accented (out of range reads as false)
    #[inline]
    pub fn is_accent(&self, beat: u32) -> bool {
        (beat as usize) < self.len() && self.bits[beat as usize]
    }

    /// Set one beat's accent flag; ignored when out of range
    pub fn set(&mut self, beat: usize, accented: bool) {
        if beat < self.len() {
            self.bits[beat] = accented;
            self.assert_invariant();
        }
    }

    /// Flip one beat's accent flag; ignored when out of range
    pub fn toggle(&mut self, beat: usize) {
        if beat < self.len() {
            self.bits[beat] = !self.bits[beat];
            self.assert_invariant();
        }
    }

    /// Resize to a new bar length, truncating or padding with plain beats
    pub fn resize(&mut self, len: u8) {
        let len = len.clamp(1, MAX_BEATS_PER_BAR as u8);
        for i in len as usize..self.len() {
            self.bits[i] = false;
        }
        self.len = len;
        self.assert_invariant();
    }

    /// Iterate over the per-beat flags
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits[..self.len()].iter().copied()
    }

    fn assert_invariant(&mut self) {
        if !self.bits[..self.len()].iter().any(|&b| b) {
            self.bits[0] = true;
        }
    }
}

impl Default for AccentPattern {
    fn default() -> Self {
        Self::standard(4)
    }
}

impl From<AccentPattern> for Vec<bool> {
    fn from(pattern: AccentPattern) -> Vec<bool> {
        pattern.iter().collect()
    }
}

impl From<Vec<bool>> for AccentPattern {
    fn from(flags: Vec<bool>) -> AccentPattern {
        AccentPattern::from_flags(&flags)
    }
}

/// Built-in accent presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccentPreset {
    /// Downbeat only
    Standard,
    /// Beats 2 and 4 (and so on for longer bars)
    Backbeat,
    /// Every beat accented
    AllAccent,
    /// Syncopated groupings for common djent meters
    Djent,
}

impl AccentPreset {
    /// Resolve the preset against a bar length
    pub fn pattern(self, beats_per_bar: u8) -> AccentPattern {
        let b = beats_per_bar.clamp(1, MAX_BEATS_PER_BAR as u8) as usize;
        match self {
            AccentPreset::Standard => AccentPattern::standard(beats_per_bar),
            AccentPreset::Backbeat => {
                let flags: Vec<bool> = (0..b).map(|i| (i + 1) % 2 == 0).collect();
                AccentPattern::from_flags(&flags)
            }
            AccentPreset::AllAccent => AccentPattern::from_flags(&vec![true; b]),
            AccentPreset::Djent => {
                let mut flags = vec![false; b];
                match b {
                    4 => {
                        flags[0] = true;
                        flags[3] = true;
                    }
                    7 => {
                        flags[0] = true;
                        flags[3] = true;
                        flags[5] = true;
                    }
                    8 => {
                        flags[0] = true;
                        flags[3] = true;
                        flags[6] = true;
                    }
                    _ => {
                        flags[0] = true;
                        if b > 3 {
                            flags[b / 2] = true;
                        }
                    }
                }
                AccentPattern::from_flags(&flags)
            }
        }
    }
}

/// Authoritative metronome configuration
///
/// Owned by the orchestrator; the scheduler thread only ever sees derived
/// snapshots. Every mutation goes through clamping setters, so an
/// out-of-range value can never be observed. Persistence and replication
/// use their own explicit schemas rather than this type directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetronomeConfig {
    bpm: u16,
    pub time_signature: TimeSignature,
    pub accent_pattern: AccentPattern,
    pub subdivision: Subdivision,
}

impl MetronomeConfig {
    pub fn new(
        bpm: u16,
        time_signature: TimeSignature,
        accent_pattern: AccentPattern,
        subdivision: Subdivision,
    ) -> Self {
        let mut accent_pattern = accent_pattern;
        accent_pattern.resize(time_signature.beats_per_bar());
        Self {
            bpm: clamp_bpm(bpm),
            time_signature,
            accent_pattern,
            subdivision,
        }
    }

    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    /// Set the tempo, clamping to the supported range
    pub fn set_bpm(&mut self, bpm: u16) {
        self.bpm = clamp_bpm(bpm);
    }

    /// Replace the time signature and resize the accent pattern to match
    pub fn set_time_signature(&mut self, time_signature: TimeSignature) {
        self.time_signature = time_signature;
        self.accent_pattern.resize(time_signature.beats_per_bar());
    }

    /// Nanoseconds between consecutive beats
    pub fn beat_interval_nanos(&self) -> u64 {
        60_000_000_000 / self.bpm as u64
    }

    /// Nanoseconds between consecutive ticks (beat / subdivision divisor)
    pub fn tick_interval_nanos(&self) -> u64 {
        self.beat_interval_nanos() / self.subdivision.divisor() as u64
    }
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            time_signature: TimeSignature::default(),
            accent_pattern: AccentPattern::default(),
            subdivision: Subdivision::None,
        }
    }
}
