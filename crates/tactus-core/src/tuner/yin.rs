//! YIN fundamental-frequency estimation
//!
//! Time-domain pitch detection via the cumulative mean-normalized difference
//! function, with parabolic interpolation for sub-sample accuracy and a
//! median filter over the last five accepted readings to suppress spurious
//! jumps. Runs on the analysis worker, never on the capture callback.

use crate::clock::ClockInstant;

/// Detection range: A0 through C8
pub const MIN_FREQUENCY_HZ: f32 = 27.5;
pub const MAX_FREQUENCY_HZ: f32 = 4186.0;

/// First CMND dip below this value marks the period candidate
const ABSOLUTE_THRESHOLD: f32 = 0.15;

/// Blocks quieter than this RMS are treated as silence
pub const RMS_GATE: f32 = 0.01;

/// Confidence above this (and RMS above the gate) marks a reading valid
pub const VALID_CONFIDENCE: f32 = 0.85;

/// Median filter length over accepted frequencies
const MEDIAN_WINDOW: usize = 5;

/// One pitch estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchReading {
    /// Median-smoothed fundamental in Hz
    pub frequency_hz: f32,
    /// `1 − d'(τ)` at the detected dip, clipped to [0, 1]
    pub confidence: f32,
    /// RMS of the analyzed block
    pub amplitude_rms: f32,
    /// When the block was analyzed
    pub timestamp: ClockInstant,
}

impl PitchReading {
    /// Whether the reading is trustworthy enough to display
    pub fn is_valid(&self) -> bool {
        self.confidence > VALID_CONFIDENCE && self.amplitude_rms > RMS_GATE
    }
}

/// YIN estimator with reusable scratch space and smoothing history
pub struct PitchDetector {
    diff: Vec<f32>,
    history: [f32; MEDIAN_WINDOW],
    history_len: usize,
    history_pos: usize,
}

impl PitchDetector {
    pub fn new() -> Self {
        Self {
            diff: Vec::new(),
            history: [0.0; MEDIAN_WINDOW],
            history_len: 0,
            history_pos: 0,
        }
    }

    /// Analyze one block of mono samples
    ///
    /// The block must cover at least one full period of the lowest
    /// detectable frequency (`⌈sample_rate / 27.5⌉` samples, 4096 at 44.1
    /// kHz); shorter blocks, silence, and unpitched input all yield `None`.
    /// Never panics.
    pub fn process(
        &mut self,
        block: &[f32],
        sample_rate: u32,
        timestamp: ClockInstant,
    ) -> Option<PitchReading> {
        let n = block.len();
        if n == 0 || sample_rate == 0 {
            return None;
        }

        // Silence gate
        let rms = (block.iter().map(|&s| s * s).sum::<f32>() / n as f32).sqrt();
        if rms <= RMS_GATE || !rms.is_finite() {
            return None;
        }

        let tau_min = (sample_rate as f32 / MAX_FREQUENCY_HZ).ceil() as usize;
        let tau_max = (sample_rate as f32 / MIN_FREQUENCY_HZ).floor() as usize;
        if tau_max + 1 >= n || tau_min < 1 {
            return None;
        }
        let window = n - tau_max;

        // Difference function d(τ) over a fixed window so every lag sums the
        // same number of terms
        self.diff.resize(tau_max, 0.0);
        for tau in 1..tau_max {
            let mut acc = 0.0f32;
            for j in 0..window {
                let delta = block[j] - block[j + tau];
                acc += delta * delta;
            }
            self.diff[tau] = acc;
        }

        // Cumulative mean-normalized difference d'(τ)
        let mut running_sum = 0.0f32;
        self.diff[0] = 1.0;
        for tau in 1..tau_max {
            running_sum += self.diff[tau];
            if running_sum > 0.0 {
                self.diff[tau] *= tau as f32 / running_sum;
            } else {
                self.diff[tau] = 1.0;
            }
        }

        // First dip under the threshold, then walk down into its local
        // minimum
        let mut tau = tau_min;
        let mut found = None;
        while tau < tau_max {
            if self.diff[tau] < ABSOLUTE_THRESHOLD {
                while tau + 1 < tau_max && self.diff[tau + 1] < self.diff[tau] {
                    tau += 1;
                }
                found = Some(tau);
                break;
            }
            tau += 1;
        }
        let tau = found?;
        let confidence = (1.0 - self.diff[tau]).clamp(0.0, 1.0);

        // Parabolic interpolation around the minimum
        let tau_refined = if tau >= 1 && tau + 1 < tau_max {
            let y1 = self.diff[tau - 1];
            let y2 = self.diff[tau];
            let y3 = self.diff[tau + 1];
            let denom = 2.0 * (2.0 * y2 - y1 - y3);
            if denom.abs() > f32::EPSILON {
                tau as f32 + (y3 - y1) / denom
            } else {
                tau as f32
            }
        } else {
            tau as f32
        };

        let frequency = sample_rate as f32 / tau_refined;
        if !frequency.is_finite() || !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&frequency) {
            return None;
        }

        Some(PitchReading {
            frequency_hz: self.smooth(frequency),
            confidence,
            amplitude_rms: rms,
            timestamp,
        })
    }

    /// Clear the smoothing history (e.g. when capture restarts)
    pub fn reset(&mut self) {
        self.history_len = 0;
        self.history_pos = 0;
    }

    /// Median of the last five accepted frequencies (mean of the middle two
    /// while the window is still even-sized)
    fn smooth(&mut self, frequency: f32) -> f32 {
        self.history[self.history_pos] = frequency;
        self.history_pos = (self.history_pos + 1) % MEDIAN_WINDOW;
        self.history_len = (self.history_len + 1).min(MEDIAN_WINDOW);

        let mut sorted = [0.0f32; MEDIAN_WINDOW];
        sorted[..self.history_len].copy_from_slice(&self.history[..self.history_len]);
        let slice = &mut sorted[..self.history_len];
        slice.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mid = self.history_len / 2;
        if self.history_len % 2 == 1 {
            slice[mid]
        } else {
            (slice[mid - 1] + slice[mid]) / 2.0
        }
    }
}

impl Default for PitchDetector {
    fn default() -> Self {
        Self::new()
    }
}
