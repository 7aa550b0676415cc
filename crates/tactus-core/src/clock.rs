//! Monotonic clock seam
//!
//! All beat scheduling runs against a monotonic, nanosecond-resolution clock
//! behind the [`ClockSource`] trait. Production code uses [`MonotonicClock`]
//! (the platform monotonic clock rebased to a process-local origin); tests
//! drive the engine deterministically with [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic timestamp in nanoseconds since an arbitrary per-process origin
///
/// Only differences and offsets are meaningful; instants from different
/// clock sources must never be mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ClockInstant(u64);

impl ClockInstant {
    pub const ZERO: ClockInstant = ClockInstant(0);

    #[inline]
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    #[inline]
    pub fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    #[inline]
    pub fn as_nanos(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// Nanoseconds elapsed since `earlier`, zero if `earlier` is later
    #[inline]
    pub fn saturating_nanos_since(self, earlier: ClockInstant) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Signed nanoseconds from `other` to `self`
    #[inline]
    pub fn signed_nanos_since(self, other: ClockInstant) -> i64 {
        self.0 as i64 - other.0 as i64
    }

    #[inline]
    pub fn add_nanos(self, nanos: u64) -> ClockInstant {
        ClockInstant(self.0.saturating_add(nanos))
    }

    #[inline]
    pub fn sub_nanos(self, nanos: u64) -> ClockInstant {
        ClockInstant(self.0.saturating_sub(nanos))
    }
}

/// Source of monotonic timestamps for scheduling
///
/// Implementations must be strictly monotonic within one source. There are
/// no failure modes; reading the clock cannot fail.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> ClockInstant;
}

/// Platform monotonic clock rebased to a process-local origin
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for MonotonicClock {
    fn now(&self) -> ClockInstant {
        ClockInstant::from_nanos(self.origin.elapsed().as_nanos() as u64)
    }
}

/// Manually advanced clock for deterministic tests
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            nanos: AtomicU64::new(0),
        }
    }

    pub fn starting_at(instant: ClockInstant) -> Self {
        Self {
            nanos: AtomicU64::new(instant.as_nanos()),
        }
    }

    pub fn advance_nanos(&self, nanos: u64) {
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance_nanos(millis * 1_000_000);
    }

    pub fn set(&self, instant: ClockInstant) {
        self.nanos.store(instant.as_nanos(), Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> ClockInstant {
        ClockInstant::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}
