//! Drift-free beat and subdivision scheduling
//!
//! The engine keeps an absolute tick grid: an anchor instant, a tick
//! interval, and the index of the next tick. A tick's scheduled time is
//! always `anchor + index × interval`, so error never accumulates across a
//! session no matter how irregularly [`TimingEngine::tick`] is called.
//!
//! Pure computation: no clocks are read here and nothing can fail. Callers
//! feed in monotonic `now` values from one [`crate::clock::ClockSource`].

use crate::clock::ClockInstant;
use crate::types::MetronomeConfig;

/// Scheduler-side snapshot of the metronome configuration
///
/// Plain data, `Copy`, small enough to travel through the lock-free command
/// ring to the scheduler thread without allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridConfig {
    /// Nanoseconds between consecutive ticks
    pub tick_interval_nanos: u64,
    /// Ticks per beat (1 when subdivision is off)
    pub ticks_per_beat: u32,
    /// Beats per bar
    pub beats_per_bar: u32,
    /// Accent flags for the bar
    pub accents: crate::types::AccentPattern,
}

impl From<&MetronomeConfig> for GridConfig {
    fn from(config: &MetronomeConfig) -> Self {
        Self {
            tick_interval_nanos: config.tick_interval_nanos().max(1),
            ticks_per_beat: config.subdivision.divisor(),
            beats_per_bar: config.time_signature.beats_per_bar() as u32,
            accents: config.accent_pattern,
        }
    }
}

/// One scheduled tick that has come due
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DueEvent {
    /// Absolute scheduled time (`anchor + index × interval`)
    pub time: ClockInstant,
    /// Absolute tick index since the anchor
    pub tick_index: u64,
    /// Bar counter (0-based)
    pub bar: u64,
    /// Beat within the bar (0-based, < beats_per_bar)
    pub beat_in_bar: u32,
    /// Tick within the beat (0 is the beat itself)
    pub subdiv_index: u32,
    /// True for the first tick of a beat
    pub is_on_beat: bool,
    /// True for an on-beat tick whose beat is accented
    pub is_accent: bool,
}

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Armed,
    Running,
}

/// Absolute-time beat/subdivision scheduler
///
/// The anchor is kept signed: rescaling the grid on a reconfigure can move
/// the nominal tick-0 instant before the clock origin, which is fine because
/// indices that far back are never emitted.
#[derive(Debug)]
pub struct TimingEngine {
    state: EngineState,
    config: GridConfig,
    anchor_nanos: i64,
    next_tick_index: u64,
}

impl TimingEngine {
    pub fn new() -> Self {
        Self {
            state: EngineState::Idle,
            config: GridConfig::from(&MetronomeConfig::default()),
            anchor_nanos: 0,
            next_tick_index: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn next_tick_index(&self) -> u64 {
        self.next_tick_index
    }

    /// Set the tick grid so that tick 0 occurs at `anchor`
    pub fn arm(&mut self, config: GridConfig, anchor: ClockInstant) {
        self.config = config;
        self.anchor_nanos = anchor.as_nanos() as i64;
        self.next_tick_index = 0;
        self.state = EngineState::Armed;
    }

    /// Return to Idle; the grid is discarded
    pub fn disarm(&mut self) {
        self.state = EngineState::Idle;
        self.next_tick_index = 0;
    }

    /// Absolute scheduled time of a tick index on the current grid
    #[inline]
    pub fn scheduled_time(&self, index: u64) -> ClockInstant {
        let nanos = self.anchor_nanos + (index * self.config.tick_interval_nanos) as i64;
        ClockInstant::from_nanos(nanos.max(0) as u64)
    }

    /// Yield every event whose scheduled time is `<= now`, in index order
    ///
    /// Ticks are never skipped or coalesced: after a stall, every missed
    /// tick is still yielded exactly once. The returned iterator borrows the
    /// engine and advances its cursor lazily (no allocation).
    pub fn tick(&mut self, now: ClockInstant) -> DueTicks<'_> {
        if self.state == EngineState::Armed {
            self.state = EngineState::Running;
        }
        DueTicks { engine: self, now }
    }

    /// Swap in a new grid without losing intra-beat phase
    ///
    /// The position inside the current beat is carried over: elapsed ticks
    /// (fractional) are rescaled from the old divisor to the new one, and
    /// the anchor is recomputed as `now − elapsed_ticks × new_interval`, so
    /// the next due tick lands at `now + remaining_fraction × new_interval`.
    /// Ticks that are already past `now` but not yet emitted are dropped.
    pub fn reconfigure(&mut self, config: GridConfig, now: ClockInstant) {
        if self.state == EngineState::Idle {
            self.config = config;
            return;
        }
        // Armed with tick 0 still ahead: keep the requested anchor as-is
        if self.next_tick_index == 0 && (now.as_nanos() as i64) <= self.anchor_nanos {
            self.config = config;
            return;
        }

        let old_interval = self.config.tick_interval_nanos as f64;
        let old_tpb = self.config.ticks_per_beat.max(1) as f64;
        let elapsed_nanos = now.as_nanos() as f64 - self.anchor_nanos as f64;
        let next_sched_nanos = self.next_tick_index as f64 * old_interval;

        // Fractional tick position at the reconfigure instant. When the
        // cursor is ahead of `now` the position inside the pending tick is
        // preserved; when `now` has run ahead (stall), un-emitted ticks in
        // the past are dropped and the position is taken from the wall.
        let (elapsed_ticks_old, boundary_emitted) = if elapsed_nanos >= next_sched_nanos {
            (elapsed_nanos / old_interval, false)
        } else {
            let fraction_remaining = (next_sched_nanos - elapsed_nanos) / old_interval;
            (
                (self.next_tick_index as f64 - fraction_remaining).max(0.0),
                true,
            )
        };

        // Rescale across a divisor change so beat/bar continuity holds
        let elapsed_beats = elapsed_ticks_old / old_tpb;
        let position = elapsed_beats * config.ticks_per_beat.max(1) as f64;

        // Next index: the first grid point strictly after the position the
        // cursor has already covered. A position within float noise of a
        // grid point counts as on it: already emitted in the in-tick case,
        // due right now in the stall case.
        let rounded = position.round();
        let next_index = if (position - rounded).abs() < 1e-6 {
            if boundary_emitted {
                rounded as u64 + 1
            } else {
                rounded as u64
            }
        } else {
            position.ceil() as u64
        };

        let new_interval = config.tick_interval_nanos as f64;
        self.anchor_nanos = (now.as_nanos() as f64 - position * new_interval).round() as i64;
        self.next_tick_index = next_index;
        self.config = config;
    }

    /// Fast-forward the cursor past `now` without moving the anchor
    ///
    /// Used when resuming after a suspension: ticks that fell inside the
    /// pause are discarded, and because the anchor is untouched the grid
    /// stays aligned to the original bar positions.
    pub fn resync(&mut self, now: ClockInstant) {
        if self.state == EngineState::Idle {
            return;
        }
        let interval = self.config.tick_interval_nanos as i64;
        let elapsed = now.as_nanos() as i64 - self.anchor_nanos;
        if elapsed < 0 {
            return;
        }
        let passed = (elapsed / interval + 1) as u64;
        if passed > self.next_tick_index {
            self.next_tick_index = passed;
        }
    }

    fn event_at(&self, index: u64) -> DueEvent {
        let tpb = self.config.ticks_per_beat.max(1) as u64;
        let bpb = self.config.beats_per_bar.max(1) as u64;
        let beat_total = index / tpb;
        let subdiv_index = (index % tpb) as u32;
        let bar = beat_total / bpb;
        let beat_in_bar = (beat_total % bpb) as u32;
        let is_on_beat = subdiv_index == 0;
        DueEvent {
            time: self.scheduled_time(index),
            tick_index: index,
            bar,
            beat_in_bar,
            subdiv_index,
            is_on_beat,
            is_accent: is_on_beat && self.config.accents.is_accent(beat_in_bar),
        }
    }
}

impl Default for TimingEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over due events; advances the engine cursor as it yields
pub struct DueTicks<'a> {
    engine: &'a mut TimingEngine,
    now: ClockInstant,
}

impl Iterator for DueTicks<'_> {
    type Item = DueEvent;

    fn next(&mut self) -> Option<DueEvent> {
        if self.engine.state != EngineState::Running {
            return None;
        }
        let index = self.engine.next_tick_index;
        if self.engine.scheduled_time(index) > self.now {
            return None;
        }
        let event = self.engine.event_at(index);
        self.engine.next_tick_index = index + 1;
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccentPreset, BeatUnit, Subdivision, TimeSignature};

    fn config_for(bpm: u16, beats: u8, subdivision: Subdivision) -> GridConfig {
        let mut config = MetronomeConfig::default();
        config.set_bpm(bpm);
        config.set_time_signature(TimeSignature::new(beats, BeatUnit::Quarter));
        config.subdivision = subdivision;
        GridConfig::from(&config)
    }

    #[test]
    fn test_state_machine() {
        let mut engine = TimingEngine::new();
        assert_eq!(engine.state(), EngineState::Idle);

        engine.arm(config_for(120, 4, Subdivision::None), ClockInstant::ZERO);
        assert_eq!(engine.state(), EngineState::Armed);

        let _ = engine.tick(ClockInstant::ZERO).count();
        assert_eq!(engine.state(), EngineState::Running);

        engine.disarm();
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.tick(ClockInstant::from_millis(10_000)).count(), 0);
    }

    #[test]
    fn test_four_four_at_120_schedule() {
        // On-beat events at 0, 500ms, 1000ms, 1500ms, 2000ms with the
        // accent cycling on the downbeat.
        let mut engine = TimingEngine::new();
        engine.arm(config_for(120, 4, Subdivision::None), ClockInstant::ZERO);

        let events: Vec<DueEvent> = engine.tick(ClockInstant::from_millis(2000)).collect();
        assert_eq!(events.len(), 5);

        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.time, ClockInstant::from_millis(500 * i as u64));
            assert!(event.is_on_beat);
            assert_eq!(event.beat_in_bar, i as u32 % 4);
            assert_eq!(event.bar, i as u64 / 4);
            assert_eq!(event.is_accent, i % 4 == 0);
        }
    }

    #[test]
    fn test_drift_free_over_many_beats() {
        // The Nth beat is scheduled at exactly (N-1) * interval from the
        // anchor: absolute-index arithmetic admits no accumulation.
        let mut engine = TimingEngine::new();
        engine.arm(config_for(137, 4, Subdivision::None), ClockInstant::ZERO);

        let interval = 60_000_000_000u64 / 137;
        let n = 10_000u64;
        let horizon = ClockInstant::from_nanos(interval * n);
        let mut count = 0u64;
        let mut last_time = ClockInstant::ZERO;
        for event in engine.tick(horizon) {
            assert_eq!(event.time.as_nanos(), interval * event.tick_index);
            last_time = event.time;
            count += 1;
        }
        assert_eq!(count, n + 1);
        assert_eq!(last_time.as_nanos(), interval * n);
    }

    #[test]
    fn test_stall_yields_all_missed_ticks_in_order() {
        let mut engine = TimingEngine::new();
        engine.arm(config_for(120, 4, Subdivision::None), ClockInstant::ZERO);

        // Consume the first beat, then stall for 2.2 seconds
        assert_eq!(engine.tick(ClockInstant::ZERO).count(), 1);
        let events: Vec<DueEvent> = engine.tick(ClockInstant::from_millis(2200)).collect();
        let indices: Vec<u64> = events.iter().map(|e| e.tick_index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_no_doubles_across_calls() {
        let mut engine = TimingEngine::new();
        engine.arm(config_for(120, 4, Subdivision::None), ClockInstant::ZERO);

        let mut seen = Vec::new();
        for ms in (0..=2000).step_by(30) {
            for event in engine.tick(ClockInstant::from_millis(ms)) {
                seen.push(event.tick_index);
            }
        }
        let expected: Vec<u64> = (0..=4).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_subdivision_counts_and_ordering() {
        // Sixteenths in 4/4: exactly 4 ticks per beat, the first on-beat,
        // the remaining three subdivisions, in dispatch order.
        let mut engine = TimingEngine::new();
        engine.arm(config_for(120, 4, Subdivision::Sixteenth), ClockInstant::ZERO);

        let events: Vec<DueEvent> = engine
            .tick(ClockInstant::from_nanos(500_000_000 * 4 - 1))
            .collect();
        assert_eq!(events.len(), 16);

        for beat in 0..4 {
            let chunk = &events[beat * 4..beat * 4 + 4];
            assert!(chunk[0].is_on_beat);
            assert_eq!(chunk[0].subdiv_index, 0);
            for (i, event) in chunk.iter().enumerate().skip(1) {
                assert!(!event.is_on_beat);
                assert!(!event.is_accent);
                assert_eq!(event.subdiv_index, i as u32);
            }
        }
    }

    #[test]
    fn test_seven_eight_djent_with_sixteenths() {
        // 7/8 at 140 BPM with 16th subdivision: 28 ticks per bar, on-beats
        // at indices 0,4,8,... with the djent accent table.
        let mut config = MetronomeConfig::default();
        config.set_bpm(140);
        config.set_time_signature(TimeSignature::new(7, BeatUnit::Eighth));
        config.accent_pattern = AccentPreset::Djent.pattern(7);
        config.subdivision = Subdivision::Sixteenth;
        let grid = GridConfig::from(&config);

        let mut engine = TimingEngine::new();
        engine.arm(grid, ClockInstant::ZERO);

        let bar_nanos = grid.tick_interval_nanos * 28;
        let events: Vec<DueEvent> = engine
            .tick(ClockInstant::from_nanos(bar_nanos - 1))
            .collect();
        assert_eq!(events.len(), 28);

        let expected_accents = [true, false, false, true, false, true, false];
        for event in &events {
            if event.tick_index % 4 == 0 {
                assert!(event.is_on_beat);
                assert_eq!(
                    event.is_accent,
                    expected_accents[event.beat_in_bar as usize],
                    "beat {}",
                    event.beat_in_bar
                );
            } else {
                assert!(!event.is_on_beat);
            }
        }
    }

    #[test]
    fn test_reconfigure_preserves_phase() {
        // Halfway through a 500ms beat, doubling the tempo must leave half
        // of the new 250ms interval: next tick at now + 125ms.
        let mut engine = TimingEngine::new();
        engine.arm(config_for(120, 4, Subdivision::None), ClockInstant::ZERO);
        assert_eq!(engine.tick(ClockInstant::ZERO).count(), 1);

        let now = ClockInstant::from_millis(250);
        engine.reconfigure(config_for(240, 4, Subdivision::None), now);

        let next = engine.scheduled_time(engine.next_tick_index());
        assert_eq!(next, ClockInstant::from_millis(375));

        // And the tick fires exactly there, not before
        assert_eq!(engine.tick(ClockInstant::from_millis(374)).count(), 0);
        let events: Vec<DueEvent> = engine.tick(ClockInstant::from_millis(375)).collect();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_reconfigure_on_emitted_boundary_does_not_double_fire() {
        // Reconfiguring exactly on a tick that was just emitted: the next
        // tick is one full new interval away, never a replay of the
        // boundary tick.
        let mut engine = TimingEngine::new();
        engine.arm(config_for(120, 4, Subdivision::None), ClockInstant::ZERO);
        assert_eq!(engine.tick(ClockInstant::from_millis(500)).count(), 2);

        engine.reconfigure(
            config_for(100, 4, Subdivision::None),
            ClockInstant::from_millis(500),
        );
        let next = engine.scheduled_time(engine.next_tick_index());
        assert_eq!(next, ClockInstant::from_millis(1100));
        assert_eq!(engine.tick(ClockInstant::from_millis(500)).count(), 0);
    }

    #[test]
    fn test_reconfigure_drops_overdue_ticks() {
        // Ticks that were due during a stall are dropped by reconfigure,
        // not replayed at the new tempo.
        let mut engine = TimingEngine::new();
        engine.arm(config_for(120, 4, Subdivision::None), ClockInstant::ZERO);
        assert_eq!(engine.tick(ClockInstant::ZERO).count(), 1);

        // Two beats pass un-emitted; reconfigure at 1.1s
        engine.reconfigure(
            config_for(120, 4, Subdivision::None),
            ClockInstant::from_millis(1100),
        );
        let events: Vec<DueEvent> = engine.tick(ClockInstant::from_millis(1500)).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time, ClockInstant::from_millis(1500));
    }

    #[test]
    fn test_reconfigure_rescales_divisor_change() {
        // Halfway through a beat, switching eighths -> triplets: elapsed
        // 0.5 beat becomes 1.5 new ticks, next tick at beat fraction 2/3.
        let mut engine = TimingEngine::new();
        engine.arm(config_for(120, 4, Subdivision::Eighth), ClockInstant::ZERO);
        assert_eq!(engine.tick(ClockInstant::ZERO).count(), 1);

        let now = ClockInstant::from_millis(250);
        engine.reconfigure(config_for(120, 4, Subdivision::Triplet), now);

        // Triplet interval is 500/3 ms; next tick index 2 lands at 1000/3 ms
        assert_eq!(engine.next_tick_index(), 2);
        let next = engine.scheduled_time(engine.next_tick_index());
        let expected_nanos = (2.0 * 500_000_000.0 / 3.0) as i64;
        assert!(
            (next.as_nanos() as i64 - expected_nanos).abs() < 1_000,
            "next tick at {} expected ~{}",
            next.as_nanos(),
            expected_nanos
        );
    }

    #[test]
    fn test_reconfigure_while_armed_keeps_anchor() {
        let mut engine = TimingEngine::new();
        let anchor = ClockInstant::from_millis(100);
        engine.arm(config_for(120, 4, Subdivision::None), anchor);

        engine.reconfigure(config_for(200, 4, Subdivision::None), ClockInstant::from_millis(50));
        assert_eq!(engine.scheduled_time(0), anchor);
        assert_eq!(engine.next_tick_index(), 0);
    }

    #[test]
    fn test_resync_stays_bar_aligned() {
        // Suspend from 1.1s to 1.85s while playing 4/4 at 120: resync must
        // land the next beat at 2.0s, the original grid position.
        let mut engine = TimingEngine::new();
        engine.arm(config_for(120, 4, Subdivision::None), ClockInstant::ZERO);
        assert_eq!(engine.tick(ClockInstant::from_millis(1100)).count(), 3);

        engine.resync(ClockInstant::from_millis(1850));
        let events: Vec<DueEvent> = engine.tick(ClockInstant::from_millis(2000)).collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time, ClockInstant::from_millis(2000));
        assert_eq!(events[0].beat_in_bar, 0);
        assert_eq!(events[0].bar, 1);
    }
}
