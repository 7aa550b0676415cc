//! The lookahead scheduler
//!
//! A dedicated thread drives the beat pipeline at a ~25 ms cadence. Each
//! iteration drains control commands, advances the timing grid up to a
//! 100 ms horizon so every imminent tick has its click primed in the audio
//! queue, and dispatches haptic/observer events for ticks whose scheduled
//! time has actually arrived. Priming runs ahead of the clock; dispatch
//! does not, so haptics stay correlated with the audible beat within one
//! scheduler period.
//!
//! The pipeline itself is a plain struct fed explicit `now` values, so the
//! whole beat path is testable without threads or devices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;

use super::command::SchedCommand;
use super::event::EngineEvent;
use crate::audio::{AudioClock, ScheduledClick};
use crate::clock::{ClockInstant, ClockSource};
use crate::haptic::{HapticEngine, HapticKind};
use crate::timing::{DueEvent, EngineState, TimingEngine};
use crate::types::ClickKind;

/// Pause between scheduler iterations
pub const SCHEDULER_PERIOD: Duration = Duration::from_millis(25);

/// How far ahead of the clock clicks are primed
pub const LOOKAHEAD_NANOS: u64 = 100_000_000;

/// Capacity of the primed-but-not-yet-due event buffer
///
/// The densest grid (300 BPM, sixteenths) puts two events in the lookahead
/// window; 64 also covers stall catch-up bursts. Overflow degrades to
/// immediate dispatch rather than loss.
const PENDING_CAPACITY: usize = 64;

/// Click queue plus device clock for one open output
pub struct AudioSink {
    pub clicks: rtrb::Producer<ScheduledClick>,
    pub clock: AudioClock,
}

/// Fixed-capacity FIFO of primed events awaiting dispatch
struct PendingRing {
    events: [(DueEvent, f64); PENDING_CAPACITY],
    head: usize,
    len: usize,
}

impl PendingRing {
    fn new() -> Self {
        let placeholder = DueEvent {
            time: ClockInstant::ZERO,
            tick_index: 0,
            bar: 0,
            beat_in_bar: 0,
            subdiv_index: 0,
            is_on_beat: false,
            is_accent: false,
        };
        Self {
            events: [(placeholder, f64::NAN); PENDING_CAPACITY],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, event: DueEvent, audio_time: f64) -> bool {
        if self.len == PENDING_CAPACITY {
            return false;
        }
        let slot = (self.head + self.len) % PENDING_CAPACITY;
        self.events[slot] = (event, audio_time);
        self.len += 1;
        true
    }

    fn front(&self) -> Option<&(DueEvent, f64)> {
        if self.len == 0 {
            None
        } else {
            Some(&self.events[self.head])
        }
    }

    fn pop(&mut self) -> Option<(DueEvent, f64)> {
        if self.len == 0 {
            return None;
        }
        let item = self.events[self.head];
        self.head = (self.head + 1) % PENDING_CAPACITY;
        self.len -= 1;
        Some(item)
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

/// One scheduler timeline: grid, click priming, haptic and event dispatch
pub struct BeatPipeline {
    timing: TimingEngine,
    commands: rtrb::Consumer<SchedCommand>,
    audio: Option<AudioSink>,
    haptics: HapticEngine,
    events: Sender<EngineEvent>,
    pending: PendingRing,
    suspended: bool,
}

impl BeatPipeline {
    pub fn new(
        commands: rtrb::Consumer<SchedCommand>,
        events: Sender<EngineEvent>,
        haptics: HapticEngine,
    ) -> Self {
        Self {
            timing: TimingEngine::new(),
            commands,
            audio: None,
            haptics,
            events,
            pending: PendingRing::new(),
            suspended: false,
        }
    }

    /// Bring up the haptic hardware before the first beat
    pub fn prepare(&mut self) {
        self.haptics.prepare();
    }

    /// Wind down, returning the haptic engine to the caller
    pub fn into_haptics(self) -> HapticEngine {
        self.haptics
    }

    /// One scheduler iteration at monotonic time `now`
    pub fn run_iteration(&mut self, now: ClockInstant) {
        self.drain_commands(now);

        if !self.suspended && self.timing.state() != EngineState::Idle {
            self.prime(now);
        }
        self.dispatch_due(now);
        self.haptics.service(now);
    }

    fn drain_commands(&mut self, now: ClockInstant) {
        while let Ok(command) = self.commands.pop() {
            match command {
                SchedCommand::Arm { config, anchor } => {
                    self.timing.arm(config, anchor);
                    self.pending.clear();
                    self.suspended = false;
                }
                SchedCommand::Configure(config) => {
                    self.timing.reconfigure(config, now);
                }
                SchedCommand::Disarm => {
                    self.timing.disarm();
                    self.pending.clear();
                }
                SchedCommand::Suspend => {
                    self.suspended = true;
                    self.pending.clear();
                }
                SchedCommand::Resume => {
                    self.suspended = false;
                    self.timing.resync(now);
                }
                SchedCommand::AttachAudio { clicks, clock } => {
                    self.audio = Some(AudioSink { clicks, clock });
                }
                SchedCommand::DetachAudio => {
                    self.audio = None;
                }
            }
        }
    }

    /// Advance the grid to the lookahead horizon: queue clicks, hold events
    fn prime(&mut self, now: ClockInstant) {
        let horizon = now.add_nanos(LOOKAHEAD_NANOS);
        // Monotonic → device clock offset, re-derived every iteration so
        // the two clocks stay calibrated
        let offset = self
            .audio
            .as_ref()
            .map(|sink| sink.clock.now_secs() - now.as_secs_f64());

        let Self {
            timing,
            audio,
            pending,
            haptics,
            events,
            ..
        } = self;

        for event in timing.tick(horizon) {
            let kind = click_kind_for(&event);
            let audio_time = match (audio.as_mut(), offset) {
                (Some(sink), Some(offset)) => {
                    let at = event.time.as_secs_f64() + offset;
                    if sink
                        .clicks
                        .push(ScheduledClick {
                            kind,
                            audio_time: at,
                        })
                        .is_err()
                    {
                        log::warn!("Click queue full; dropping tick {}", event.tick_index);
                    }
                    at
                }
                _ => f64::NAN,
            };

            if !pending.push(event, audio_time) {
                // Pending buffer full (massive stall): dispatch in place to
                // preserve order rather than losing the event
                dispatch_event(haptics, events, &event, audio_time, now);
            }
        }
    }

    /// Deliver haptics and observer events whose scheduled time has arrived
    fn dispatch_due(&mut self, now: ClockInstant) {
        loop {
            match self.pending.front() {
                Some(&(event, _)) if event.time <= now => {}
                _ => break,
            }
            if let Some((event, audio_time)) = self.pending.pop() {
                dispatch_event(&mut self.haptics, &self.events, &event, audio_time, now);
            }
        }
    }
}

/// Click sound for a tick: accented/normal beats, subdivision in between
///
/// On a beat, the on-beat sound alone plays (the coinciding subdivision
/// position is index 0 and is never emitted separately).
fn click_kind_for(event: &DueEvent) -> ClickKind {
    if event.is_on_beat {
        if event.is_accent {
            ClickKind::Accent
        } else {
            ClickKind::Normal
        }
    } else {
        ClickKind::Subdivision
    }
}

fn dispatch_event(
    haptics: &mut HapticEngine,
    events: &Sender<EngineEvent>,
    event: &DueEvent,
    audio_time: f64,
    now: ClockInstant,
) {
    if event.is_on_beat {
        haptics.play(
            if event.is_accent {
                HapticKind::Accent
            } else {
                HapticKind::Normal
            },
            now,
        );
        let _ = events.try_send(EngineEvent::Beat {
            bar: event.bar,
            beat_in_bar: event.beat_in_bar,
            accent: event.is_accent,
            time: event.time,
            audio_time,
        });
    } else {
        haptics.play(HapticKind::Subdivision, now);
        let _ = events.try_send(EngineEvent::SubdivisionTick {
            bar: event.bar,
            beat_in_bar: event.beat_in_bar,
            index: event.subdiv_index,
        });
    }
}

/// Running scheduler thread
pub struct SchedulerHandle {
    thread: Option<thread::JoinHandle<BeatPipeline>>,
    stop: Arc<AtomicBool>,
}

impl SchedulerHandle {
    /// Spawn the scheduler loop
    pub fn spawn(mut pipeline: BeatPipeline, clock: Arc<dyn ClockSource>) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = thread::Builder::new()
            .name("tactus-scheduler".to_string())
            .spawn({
                let stop = stop.clone();
                move || {
                    log::debug!("Scheduler started");
                    loop {
                        pipeline.run_iteration(clock.now());
                        if stop.load(Ordering::Acquire) {
                            // Final drain iteration before winding down
                            pipeline.run_iteration(clock.now());
                            break;
                        }
                        thread::sleep(SCHEDULER_PERIOD);
                    }
                    log::debug!("Scheduler stopped");
                    pipeline
                }
            })?;
        Ok(Self {
            thread: Some(thread),
            stop,
        })
    }

    /// Synchronous stop: signals the loop, waits for the final drain, and
    /// returns the pipeline so the caller can recover the haptic driver
    pub fn stop(mut self) -> Option<BeatPipeline> {
        self.stop.store(true, Ordering::Release);
        self.thread.take().and_then(|t| t.join().ok())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
