//! Tap tempo estimation
//!
//! Averages the intervals between recent taps into a tempo. Taps older than
//! the 2-second window are discarded, so a stale history never skews a new
//! tapping burst.

use crate::clock::ClockInstant;
use crate::types::{clamp_bpm, MAX_BPM, MIN_BPM};

/// Taps older than this are dropped before estimating
pub const TAP_WINDOW_NANOS: u64 = 2_000_000_000;

/// Number of taps kept for averaging
pub const MAX_TAPS: usize = 4;

/// Fixed-capacity tap history and tempo estimator
#[derive(Debug, Default)]
pub struct TapTempo {
    taps: [ClockInstant; MAX_TAPS],
    len: usize,
}

impl TapTempo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tap; returns the estimated tempo once two fresh taps exist
    ///
    /// The estimate is `round(60000 / mean_interval_ms)` clamped to the
    /// supported tempo range. A single (or fully expired) history yields no
    /// update.
    pub fn tap(&mut self, now: ClockInstant) -> Option<u16> {
        // Expire old taps, keeping order
        let mut kept = 0;
        for i in 0..self.len {
            if now.saturating_nanos_since(self.taps[i]) <= TAP_WINDOW_NANOS {
                self.taps[kept] = self.taps[i];
                kept += 1;
            }
        }
        self.len = kept;

        // Append, shifting out the oldest when full
        if self.len == MAX_TAPS {
            self.taps.copy_within(1.., 0);
            self.len -= 1;
        }
        self.taps[self.len] = now;
        self.len += 1;

        if self.len < 2 {
            return None;
        }

        let total_nanos: u64 = (1..self.len)
            .map(|i| self.taps[i].saturating_nanos_since(self.taps[i - 1]))
            .sum();
        let mean_ms = total_nanos as f64 / (self.len - 1) as f64 / 1e6;
        if mean_ms <= 0.0 {
            return Some(MAX_BPM);
        }
        let bpm = (60_000.0 / mean_ms).round();
        Some(clamp_bpm(bpm.clamp(MIN_BPM as f64, MAX_BPM as f64) as u16))
    }

    /// Forget all recorded taps
    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> ClockInstant {
        ClockInstant::from_millis(v)
    }

    #[test]
    fn test_single_tap_gives_no_estimate() {
        let mut tap = TapTempo::new();
        assert_eq!(tap.tap(ms(0)), None);
    }

    #[test]
    fn test_steady_taps_match_interval() {
        // Taps at 0, 600, 1200 ms: 100 BPM after the second tap, unchanged
        // by the third.
        let mut tap = TapTempo::new();
        assert_eq!(tap.tap(ms(0)), None);
        assert_eq!(tap.tap(ms(600)), Some(100));
        assert_eq!(tap.tap(ms(1200)), Some(100));
    }

    #[test]
    fn test_exact_interval_bound_across_range() {
        for interval_ms in [200u64, 250, 333, 500, 750, 1000, 1500, 2000] {
            let mut tap = TapTempo::new();
            tap.tap(ms(0));
            let bpm = tap.tap(ms(interval_ms)).unwrap();
            let expected = clamp_bpm((60_000.0 / interval_ms as f64).round() as u16);
            assert_eq!(bpm, expected, "interval {} ms", interval_ms);
        }
    }

    #[test]
    fn test_mean_of_uneven_intervals() {
        // 400ms and 600ms intervals average to 500ms -> 120 BPM
        let mut tap = TapTempo::new();
        tap.tap(ms(0));
        tap.tap(ms(400));
        assert_eq!(tap.tap(ms(1000)), Some(120));
    }

    #[test]
    fn test_stale_taps_expire() {
        // A tap 3 seconds later starts a fresh burst
        let mut tap = TapTempo::new();
        tap.tap(ms(0));
        tap.tap(ms(500));
        assert_eq!(tap.tap(ms(3500)), None);
        assert_eq!(tap.len(), 1);
    }

    #[test]
    fn test_history_caps_at_four() {
        let mut tap = TapTempo::new();
        for i in 0..6 {
            tap.tap(ms(i * 400));
        }
        assert_eq!(tap.len(), MAX_TAPS);
    }

    #[test]
    fn test_clamps_extreme_tempi() {
        // 100ms interval -> 600 BPM raw, clamped to the maximum
        let mut tap = TapTempo::new();
        tap.tap(ms(0));
        assert_eq!(tap.tap(ms(100)), Some(MAX_BPM));
    }
}
