//! The metronome orchestrator
//!
//! Owns the authoritative configuration and transport state, and glues the
//! subsystems together: on start it opens the click output (audio failure
//! degrades to haptic/visual, never blocks the beat), brings up haptics,
//! anchors the timing grid at the current monotonic instant and spawns the
//! scheduler thread. Every authoritative mutation bumps the
//! revision, notifies observers, and replicates to the paired peer when one
//! is attached.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use super::command::{command_channel, SchedCommand};
use super::event::{event_channel, EngineEvent};
use super::scheduler::{BeatPipeline, SchedulerHandle};
use crate::audio::{AudioError, AudioStatus, ClickOutput, DEFAULT_SAMPLE_RATE};
use crate::clock::ClockSource;
use crate::config::{epoch_seconds, Preset, TunerConfig};
use crate::haptic::{HapticDriver, HapticEngine, NullHapticDriver};
use crate::sync::{PeerLink, PeerSync, StateSnapshot, SyncCommand, SyncDisposition};
use crate::timing::{GridConfig, TapTempo};
use crate::tuner::TunerUpdate;
use crate::types::{clamp_reference_pitch, AccentPreset, MetronomeConfig, Subdivision, TimeSignature};

/// Errors that can abort `start()`
///
/// Audio unavailability is deliberately not among them: the metronome runs
/// without clicks (see [`Metronome::last_audio_error`]).
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to start scheduler thread: {0}")]
    Scheduler(#[from] std::io::Error),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

struct RunningScheduler {
    handle: SchedulerHandle,
    commands: rtrb::Producer<SchedCommand>,
}

/// Authoritative metronome state machine
pub struct Metronome {
    config: MetronomeConfig,
    tuner_config: TunerConfig,
    revision: u64,
    playing: bool,
    suspended: bool,
    clock: Arc<dyn ClockSource>,
    /// Parked while stopped; moves onto the scheduler thread while playing
    haptic_driver: Option<Box<dyn HapticDriver>>,
    scheduler: Option<RunningScheduler>,
    audio: Option<ClickOutput>,
    last_audio_error: Option<AudioError>,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
    status_tx: Sender<AudioStatus>,
    status_rx: Receiver<AudioStatus>,
    peer: Option<PeerSync>,
    tap: TapTempo,
    preferred_sample_rate: u32,
}

impl Metronome {
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self::with_haptics(clock, Box::new(NullHapticDriver))
    }

    pub fn with_haptics(clock: Arc<dyn ClockSource>, haptic_driver: Box<dyn HapticDriver>) -> Self {
        let (events_tx, events_rx) = event_channel();
        let (status_tx, status_rx) = crossbeam_channel::bounded(16);
        Self {
            config: MetronomeConfig::default(),
            tuner_config: TunerConfig::default(),
            revision: 0,
            playing: false,
            suspended: false,
            clock,
            haptic_driver: Some(haptic_driver),
            scheduler: None,
            audio: None,
            last_audio_error: None,
            events_tx,
            events_rx,
            status_tx,
            status_rx,
            peer: None,
            tap: TapTempo::new(),
            preferred_sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    // ─── Observation ────────────────────────────────────────────────────

    /// Receiver of engine events; clone freely, drain regularly
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.events_rx.clone()
    }

    pub fn config(&self) -> &MetronomeConfig {
        &self.config
    }

    pub fn tuner_config(&self) -> &TunerConfig {
        &self.tuner_config
    }

    pub fn bpm(&self) -> u16 {
        self.config.bpm()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Why click playback is absent, if it is
    pub fn last_audio_error(&self) -> Option<&AudioError> {
        self.last_audio_error.as_ref()
    }

    // ─── Transport ──────────────────────────────────────────────────────

    /// Start playback: open audio (best effort), prepare haptics, anchor
    /// the grid at `now` and launch the scheduler
    pub fn start(&mut self) -> EngineResult<()> {
        if self.playing {
            return Ok(());
        }
        self.start_transport()?;
        self.after_mutation();
        Ok(())
    }

    /// Stop playback synchronously: disarm, drain, join, close devices
    pub fn stop(&mut self) {
        if !self.playing {
            return;
        }
        self.stop_transport();
        self.after_mutation();
    }

    pub fn toggle(&mut self) -> EngineResult<()> {
        if self.playing {
            self.stop();
            Ok(())
        } else {
            self.start()
        }
    }

    fn start_transport(&mut self) -> EngineResult<()> {
        let audio_parts = self.open_audio();

        let (mut commands, command_rx) = command_channel();
        let driver = self
            .haptic_driver
            .take()
            .unwrap_or_else(|| Box::new(NullHapticDriver));
        let mut pipeline =
            BeatPipeline::new(command_rx, self.events_tx.clone(), HapticEngine::new(driver));
        pipeline.prepare();

        if let Some((clicks, clock)) = audio_parts {
            let _ = commands.push(SchedCommand::AttachAudio { clicks, clock });
        }
        let anchor = self.clock.now();
        let _ = commands.push(SchedCommand::Arm {
            config: GridConfig::from(&self.config),
            anchor,
        });

        let handle = SchedulerHandle::spawn(pipeline, self.clock.clone())?;
        self.scheduler = Some(RunningScheduler { handle, commands });
        self.playing = true;
        self.suspended = false;
        log::info!("Metronome started at {} BPM", self.config.bpm());
        Ok(())
    }

    fn stop_transport(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            let _ = scheduler.commands.push(SchedCommand::Disarm);
            if let Some(pipeline) = scheduler.handle.stop() {
                let mut haptics = pipeline.into_haptics();
                haptics.release();
                self.haptic_driver = Some(haptics.into_driver());
            }
        }
        // Dropping the handle drains and releases the device
        self.audio = None;
        self.playing = false;
        self.suspended = false;
        log::info!("Metronome stopped");
    }

    // ─── Configuration ──────────────────────────────────────────────────

    /// Set the tempo (clamped); playback keeps its intra-beat phase
    pub fn set_bpm(&mut self, bpm: u16) {
        self.config.set_bpm(bpm);
        self.send_command(SchedCommand::Configure(GridConfig::from(&self.config)));
        self.after_mutation();
    }

    pub fn increment_bpm(&mut self) {
        self.set_bpm(self.config.bpm().saturating_add(1));
    }

    pub fn decrement_bpm(&mut self) {
        self.set_bpm(self.config.bpm().saturating_sub(1));
    }

    /// Replace the time signature; bar/beat counters restart at `now`
    pub fn set_time_signature(&mut self, time_signature: TimeSignature) {
        self.config.set_time_signature(time_signature);
        self.rearm_if_playing();
        self.after_mutation();
    }

    /// Set one beat's accent flag (the pattern never goes all-plain)
    pub fn set_accent(&mut self, beat: usize, accented: bool) {
        self.config.accent_pattern.set(beat, accented);
        self.send_command(SchedCommand::Configure(GridConfig::from(&self.config)));
        self.after_mutation();
    }

    pub fn toggle_accent(&mut self, beat: usize) {
        self.config.accent_pattern.toggle(beat);
        self.send_command(SchedCommand::Configure(GridConfig::from(&self.config)));
        self.after_mutation();
    }

    /// Apply an accent preset against the current bar length
    pub fn apply_preset(&mut self, preset: AccentPreset) {
        self.config.accent_pattern = preset.pattern(self.config.time_signature.beats_per_bar());
        self.send_command(SchedCommand::Configure(GridConfig::from(&self.config)));
        self.after_mutation();
    }

    /// Change the subdivision; playback keeps its intra-beat phase
    pub fn set_subdivision(&mut self, subdivision: Subdivision) {
        self.config.subdivision = subdivision;
        self.send_command(SchedCommand::Configure(GridConfig::from(&self.config)));
        self.after_mutation();
    }

    /// Set the tuner's A4 reference (clamped to 415..=466 Hz)
    pub fn set_reference_pitch(&mut self, hz: f64) {
        self.tuner_config.reference_pitch = clamp_reference_pitch(hz);
    }

    /// Register a tap; enough fresh taps update the tempo
    pub fn tap(&mut self) {
        if let Some(bpm) = self.tap.tap(self.clock.now()) {
            self.set_bpm(bpm);
        }
    }

    /// Back to factory configuration
    pub fn reset_to_defaults(&mut self) {
        self.config = MetronomeConfig::default();
        self.rearm_if_playing();
        self.after_mutation();
    }

    /// Load a stored preset's configuration
    pub fn apply_stored_preset(&mut self, preset: &Preset) {
        self.config = preset.to_config();
        self.rearm_if_playing();
        self.after_mutation();
    }

    // ─── Visibility lifecycle ───────────────────────────────────────────

    /// Process hidden without a keep-alive: pause audio and tick emission
    pub fn suspend(&mut self) {
        if !self.playing || self.suspended {
            return;
        }
        self.suspended = true;
        if let Some(audio) = &self.audio {
            if let Err(e) = audio.suspend() {
                log::warn!("Failed to suspend audio: {}", e);
            }
        }
        self.send_command(SchedCommand::Suspend);
        log::debug!("Metronome suspended");
    }

    /// Process visible again: resume audio, drop missed ticks, keep the
    /// grid bar-aligned
    pub fn resume(&mut self) {
        if !self.playing || !self.suspended {
            return;
        }
        self.suspended = false;
        if let Some(audio) = &self.audio {
            if let Err(e) = audio.resume() {
                log::warn!("Failed to resume audio: {}", e);
            }
        }
        self.send_command(SchedCommand::Resume);
        log::debug!("Metronome resumed");
    }

    // ─── Device recovery ────────────────────────────────────────────────

    /// Handle out-of-band device status; call from the host's idle loop
    ///
    /// A stream error while playing triggers close-then-reopen; when the
    /// reopen fails the metronome continues haptic/visual only.
    pub fn process_status(&mut self) {
        while let Ok(status) = self.status_rx.try_recv() {
            match status {
                AudioStatus::StreamError(reason) => {
                    log::warn!("Audio stream error ({}); reopening", reason);
                    self.audio = None;
                    if self.playing {
                        match self.open_audio() {
                            Some((clicks, clock)) => {
                                self.send_command(SchedCommand::AttachAudio { clicks, clock });
                            }
                            None => self.send_command(SchedCommand::DetachAudio),
                        }
                    }
                }
            }
        }
    }

    // ─── Tuner bridging ─────────────────────────────────────────────────

    /// Re-publish tuner updates on the engine event channel so observers
    /// watch a single stream; call from the host's idle loop
    pub fn forward_tuner_updates(&self, updates: &Receiver<TunerUpdate>) {
        for update in updates.try_iter() {
            let _ = self.events_tx.try_send(EngineEvent::Pitch {
                reading: update.reading,
                note: update.note,
                cents: update.cents,
                accuracy: update.accuracy,
            });
        }
    }

    // ─── Peer replication ───────────────────────────────────────────────

    /// Pair with a peer; the current state is published immediately
    pub fn attach_peer(&mut self, link: Box<dyn PeerLink>) {
        let mut peer = PeerSync::new(link);
        peer.publish(
            StateSnapshot::capture(&self.config, self.playing),
            self.revision,
            epoch_seconds(),
        );
        self.peer = Some(peer);
    }

    pub fn peer(&self) -> Option<&PeerSync> {
        self.peer.as_ref()
    }

    /// Drain and apply inbound peer messages; call from the host's idle loop
    pub fn pump_peer(&mut self) {
        let Some(peer) = self.peer.as_mut() else {
            return;
        };
        let mut dispositions = Vec::new();
        peer.poll(|disposition| dispositions.push(disposition));
        for disposition in dispositions {
            self.apply_sync(disposition);
        }
    }

    fn apply_sync(&mut self, disposition: SyncDisposition) {
        match disposition {
            SyncDisposition::Apply {
                snapshot,
                revision,
                timestamp,
            } => {
                log::debug!("Adopting peer snapshot rev {}", revision);
                self.config = snapshot.to_config();
                self.revision = revision;
                if let Some(peer) = self.peer.as_mut() {
                    peer.note_applied(snapshot.clone(), revision, timestamp);
                }

                if snapshot.is_playing && !self.playing {
                    if let Err(e) = self.start_transport() {
                        log::error!("Peer-requested start failed: {}", e);
                    }
                } else if !snapshot.is_playing && self.playing {
                    self.stop_transport();
                } else if self.playing {
                    self.send_command(SchedCommand::Configure(GridConfig::from(&self.config)));
                }
                self.emit_state_changed();
            }
            SyncDisposition::Command(command) => {
                log::debug!("Applying peer command {:?}", command);
                let result = match command {
                    SyncCommand::Play => self.start(),
                    SyncCommand::Stop => {
                        self.stop();
                        Ok(())
                    }
                    SyncCommand::Toggle => self.toggle(),
                    SyncCommand::IncrementBpm => {
                        self.increment_bpm();
                        Ok(())
                    }
                    SyncCommand::DecrementBpm => {
                        self.decrement_bpm();
                        Ok(())
                    }
                    SyncCommand::ResetToDefaults => {
                        self.reset_to_defaults();
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    log::error!("Peer command failed: {}", e);
                }
            }
            SyncDisposition::Ignored => {}
        }
    }

    // ─── Internals ──────────────────────────────────────────────────────

    fn open_audio(&mut self) -> Option<(rtrb::Producer<crate::audio::ScheduledClick>, crate::audio::AudioClock)> {
        match ClickOutput::open(self.preferred_sample_rate, self.status_tx.clone()) {
            Ok(result) => {
                self.audio = Some(result.handle);
                self.last_audio_error = None;
                Some((result.clicks, result.clock))
            }
            Err(e) => {
                log::warn!("Audio unavailable, running without clicks: {}", e);
                self.last_audio_error = Some(e);
                None
            }
        }
    }

    fn rearm_if_playing(&mut self) {
        if self.playing {
            let anchor = self.clock.now();
            self.send_command(SchedCommand::Arm {
                config: GridConfig::from(&self.config),
                anchor,
            });
        }
    }

    fn send_command(&mut self, command: SchedCommand) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            if scheduler.commands.push(command).is_err() {
                log::warn!("Scheduler command queue full; command dropped");
            }
        }
    }

    fn emit_state_changed(&self) {
        let _ = self.events_tx.try_send(EngineEvent::StateChanged {
            config: self.config,
            playing: self.playing,
            revision: self.revision,
        });
    }

    fn after_mutation(&mut self) {
        self.revision += 1;
        self.emit_state_changed();
        if let Some(peer) = self.peer.as_mut() {
            peer.publish(
                StateSnapshot::capture(&self.config, self.playing),
                self.revision,
                epoch_seconds(),
            );
        }
    }
}

impl Drop for Metronome {
    fn drop(&mut self) {
        if self.playing {
            self.stop_transport();
        }
    }
}
