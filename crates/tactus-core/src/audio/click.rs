//! Click waveform synthesis
//!
//! The three click sounds are rendered once per audio session at the
//! device's sample rate and kept immutable for the session's lifetime, so
//! the audio callback only ever copies from preallocated buffers.
//!
//! Each click is a short percussive transient: a harmonic stack under a fast
//! exponential envelope, with a faster-decaying noise burst supplying the
//! attack energy. The fast decay reads as a "click" rather than a beep.

use crate::types::{ClickKind, Sample};

/// Rendering parameters for one click kind
#[derive(Debug, Clone, Copy)]
pub struct ClickSpec {
    /// Fundamental frequency in Hz
    pub frequency: f32,
    /// Duration in seconds
    pub duration: f32,
    /// Peak amplitude after normalization
    pub peak_gain: f32,
}

impl ClickSpec {
    /// Fixed voicing table for the three click kinds
    pub fn for_kind(kind: ClickKind) -> Self {
        match kind {
            ClickKind::Accent => Self {
                frequency: 1200.0,
                duration: 0.030,
                peak_gain: 0.40,
            },
            ClickKind::Normal => Self {
                frequency: 900.0,
                duration: 0.025,
                peak_gain: 0.25,
            },
            ClickKind::Subdivision => Self {
                frequency: 800.0,
                duration: 0.015,
                peak_gain: 0.10,
            },
        }
    }
}

/// Amplitude envelope decay rate (per second)
const ENVELOPE_DECAY: f32 = 80.0;
/// Noise burst decay rate (per second)
const NOISE_DECAY: f32 = 200.0;
/// Noise mix relative to the harmonic stack
const NOISE_MIX: f32 = 0.3;

/// The three immutable PCM buffers for one audio session
#[derive(Debug)]
pub struct ClickBufferSet {
    accent: Vec<Sample>,
    normal: Vec<Sample>,
    subdivision: Vec<Sample>,
    sample_rate: u32,
}

impl ClickBufferSet {
    /// Render all three click kinds at the given sample rate
    pub fn render(sample_rate: u32) -> Self {
        Self {
            accent: render_click(sample_rate, ClickSpec::for_kind(ClickKind::Accent)),
            normal: render_click(sample_rate, ClickSpec::for_kind(ClickKind::Normal)),
            subdivision: render_click(sample_rate, ClickSpec::for_kind(ClickKind::Subdivision)),
            sample_rate,
        }
    }

    #[inline]
    pub fn buffer(&self, kind: ClickKind) -> &[Sample] {
        match kind {
            ClickKind::Accent => &self.accent,
            ClickKind::Normal => &self.normal,
            ClickKind::Subdivision => &self.subdivision,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Render one click waveform
///
/// `envelope(t) · (sin f₀ + 0.5·sin 2f₀ + 0.25·sin 3f₀ + noise_mix·noise·exp(-200t))`
/// with `envelope(t) = exp(-80t)`, normalized so the loudest sample equals
/// the spec's peak gain.
pub fn render_click(sample_rate: u32, spec: ClickSpec) -> Vec<Sample> {
    let n_samples = (sample_rate as f32 * spec.duration) as usize;
    let mut noise = XorShift32::new(0x5EED_C11C);
    let mut samples = Vec::with_capacity(n_samples);

    for i in 0..n_samples {
        let t = i as f32 / sample_rate as f32;
        let envelope = (-ENVELOPE_DECAY * t).exp();
        let phase = std::f32::consts::TAU * spec.frequency * t;
        let tone = phase.sin() + 0.5 * (2.0 * phase).sin() + 0.25 * (3.0 * phase).sin();
        let burst = NOISE_MIX * noise.next_bipolar() * (-NOISE_DECAY * t).exp();
        samples.push(envelope * (tone + burst));
    }

    // Normalize to the requested peak
    let peak = samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
    if peak > 0.0 {
        let scale = spec.peak_gain / peak;
        for s in &mut samples {
            *s *= scale;
        }
    }
    samples
}

/// Tiny deterministic noise source for the attack burst
///
/// Seeded xorshift keeps renders identical across sessions and avoids
/// pulling a random-number dependency into the audio path.
struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    fn new(seed: u32) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Uniform value in [-1, 1)
    fn next_bipolar(&mut self) -> f32 {
        (self.next_u32() as f32 / u32::MAX as f32) * 2.0 - 1.0
    }
}
