//! Haptic transient patterns
//!
//! Maps beat and tuner events onto fixed transient specs and forwards them
//! to a platform [`HapticDriver`]. When no hardware is available every call
//! is a no-op; haptics never fail loudly.
//!
//! Rate control: the in-tune confirmation is gated to at least 500 ms
//! between triggers so a held note doesn't buzz continuously. Beat-driven
//! kinds are not gated; the scheduler never exceeds the tick rate.

use crate::clock::ClockInstant;

/// Fixed length of the driver-side transient pattern, in milliseconds
///
/// Independent of the audible click durations.
pub const TRANSIENT_DURATION_MS: u64 = 50;

/// Delay before the accent's trailing reinforcement transient
pub const ACCENT_REINFORCE_DELAY_NANOS: u64 = 25_000_000;

/// Minimum spacing between in-tune confirmations
pub const IN_TUNE_MIN_SPACING_NANOS: u64 = 500_000_000;

/// Haptic event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HapticKind {
    Accent,
    Normal,
    Subdivision,
    Ghost,
    InTune,
}

/// Intensity/sharpness pair handed to the driver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransientSpec {
    /// Perceived strength, 0..=1
    pub intensity: f32,
    /// Attack character, 0..=1 (higher is crisper)
    pub sharpness: f32,
}

impl HapticKind {
    /// Fixed transient table
    pub fn spec(self) -> TransientSpec {
        match self {
            HapticKind::Accent => TransientSpec {
                intensity: 1.0,
                sharpness: 0.9,
            },
            HapticKind::Normal => TransientSpec {
                intensity: 0.7,
                sharpness: 0.6,
            },
            HapticKind::Subdivision => TransientSpec {
                intensity: 0.4,
                sharpness: 0.5,
            },
            HapticKind::Ghost => TransientSpec {
                intensity: 0.25,
                sharpness: 0.3,
            },
            HapticKind::InTune => TransientSpec {
                intensity: 0.8,
                sharpness: 1.0,
            },
        }
    }
}

/// Reinforcement transient following an accent
const ACCENT_REINFORCE_SPEC: TransientSpec = TransientSpec {
    intensity: 0.6,
    sharpness: 0.9,
};

/// Platform transient hardware seam
///
/// `prepare` reports whether hardware is actually available; on `false` the
/// engine silently no-ops every trigger.
pub trait HapticDriver: Send {
    fn prepare(&mut self) -> bool;
    fn play_transient(&mut self, spec: TransientSpec);
    fn release(&mut self);
}

/// Driver used when the platform has no transient hardware
pub struct NullHapticDriver;

impl HapticDriver for NullHapticDriver {
    fn prepare(&mut self) -> bool {
        false
    }

    fn play_transient(&mut self, _spec: TransientSpec) {}

    fn release(&mut self) {}
}

/// Transient pattern player with rate control
pub struct HapticEngine {
    driver: Box<dyn HapticDriver>,
    available: bool,
    last_in_tune: Option<ClockInstant>,
    pending_reinforce: Option<ClockInstant>,
}

impl HapticEngine {
    pub fn new(driver: Box<dyn HapticDriver>) -> Self {
        Self {
            driver,
            available: false,
            last_in_tune: None,
            pending_reinforce: None,
        }
    }

    /// Bring up the hardware; a refusal degrades all triggers to no-ops
    pub fn prepare(&mut self) {
        self.available = self.driver.prepare();
        if !self.available {
            log::warn!("Haptic hardware unavailable; transients disabled");
        }
    }

    /// Release the hardware and clear pending state
    pub fn release(&mut self) {
        if self.available {
            self.driver.release();
        }
        self.available = false;
        self.last_in_tune = None;
        self.pending_reinforce = None;
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Fire the transient for a kind
    ///
    /// Accents queue a trailing reinforcement 25 ms out (delivered by
    /// [`HapticEngine::service`]); in-tune confirmations closer than 500 ms
    /// to the previous one are dropped.
    pub fn play(&mut self, kind: HapticKind, now: ClockInstant) {
        if !self.available {
            return;
        }
        if kind == HapticKind::InTune {
            if let Some(last) = self.last_in_tune {
                if now.saturating_nanos_since(last) < IN_TUNE_MIN_SPACING_NANOS {
                    return;
                }
            }
            self.last_in_tune = Some(now);
        }
        self.driver.play_transient(kind.spec());
        if kind == HapticKind::Accent {
            self.pending_reinforce = Some(now.add_nanos(ACCENT_REINFORCE_DELAY_NANOS));
        }
    }

    /// Deliver any due reinforcement transient; call once per scheduler tick
    pub fn service(&mut self, now: ClockInstant) {
        if !self.available {
            return;
        }
        if let Some(due) = self.pending_reinforce {
            if now >= due {
                self.driver.play_transient(ACCENT_REINFORCE_SPEC);
                self.pending_reinforce = None;
            }
        }
    }

    /// Hand the driver back (used when the owning thread winds down)
    pub fn into_driver(self) -> Box<dyn HapticDriver> {
        self.driver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Test driver recording every transient it receives
    struct RecordingDriver {
        fired: Arc<Mutex<Vec<TransientSpec>>>,
    }

    impl HapticDriver for RecordingDriver {
        fn prepare(&mut self) -> bool {
            true
        }

        fn play_transient(&mut self, spec: TransientSpec) {
            self.fired.lock().unwrap().push(spec);
        }

        fn release(&mut self) {}
    }

    fn recording_engine() -> (Arc<Mutex<Vec<TransientSpec>>>, HapticEngine) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let mut engine = HapticEngine::new(Box::new(RecordingDriver {
            fired: fired.clone(),
        }));
        engine.prepare();
        (fired, engine)
    }

    fn ms(v: u64) -> ClockInstant {
        ClockInstant::from_millis(v)
    }

    #[test]
    fn test_unavailable_driver_noops() {
        let mut engine = HapticEngine::new(Box::new(NullHapticDriver));
        engine.prepare();
        assert!(!engine.is_available());
        // Must not panic or do anything
        engine.play(HapticKind::Accent, ms(0));
        engine.service(ms(100));
    }

    #[test]
    fn test_kinds_map_to_fixed_specs() {
        let (fired, mut engine) = recording_engine();
        engine.play(HapticKind::Normal, ms(0));
        engine.play(HapticKind::Subdivision, ms(10));
        let fired = fired.lock().unwrap();
        assert_eq!(fired[0], HapticKind::Normal.spec());
        assert_eq!(fired[1], HapticKind::Subdivision.spec());
    }

    #[test]
    fn test_accent_reinforcement_fires_after_delay() {
        let (fired, mut engine) = recording_engine();
        engine.play(HapticKind::Accent, ms(0));
        assert_eq!(fired.lock().unwrap().len(), 1);

        // Not yet due
        engine.service(ms(10));
        assert_eq!(fired.lock().unwrap().len(), 1);

        engine.service(ms(25));
        assert_eq!(fired.lock().unwrap().len(), 2);
        assert_eq!(fired.lock().unwrap()[1], ACCENT_REINFORCE_SPEC);

        // One reinforcement per accent
        engine.service(ms(60));
        assert_eq!(fired.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_in_tune_rate_limited() {
        let (fired, mut engine) = recording_engine();
        engine.play(HapticKind::InTune, ms(0));
        engine.play(HapticKind::InTune, ms(200));
        engine.play(HapticKind::InTune, ms(499));
        assert_eq!(fired.lock().unwrap().len(), 1);

        engine.play(HapticKind::InTune, ms(500));
        assert_eq!(fired.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_beat_kinds_not_rate_limited() {
        let (fired, mut engine) = recording_engine();
        for i in 0..10 {
            engine.play(HapticKind::Normal, ms(i * 5));
        }
        assert_eq!(fired.lock().unwrap().len(), 10);
    }

    #[test]
    fn test_release_clears_pending() {
        let (fired, mut engine) = recording_engine();
        engine.play(HapticKind::Accent, ms(0));
        engine.release();
        engine.service(ms(100));
        assert_eq!(fired.lock().unwrap().len(), 1);
    }
}
