//! Sample-accurate click playback
//!
//! Architecture (mirrors the lock-free command-queue design used across the
//! engine):
//!
//! ```text
//! ┌──────────────────┐                    ┌─────────────────────┐
//! │ Scheduler thread │───push()──────────►│  ScheduledClick     │
//! │ (25ms lookahead) │                    │  ring (SPSC, rtrb)  │
//! └──────────────────┘                    └──────────┬──────────┘
//!                                                    │ peek()/pop()
//!                                                    ▼
//! ┌──────────────────┐   frame counter    ┌─────────────────────┐
//! │    AudioClock    │◄───────────────────│  CPAL audio thread  │
//! │   (AtomicU64)    │                    │ (owns ClickRenderer)│
//! └──────────────────┘                    └─────────────────────┘
//! ```
//!
//! The callback admits every queued click whose start frame falls before the
//! end of the current buffer into a fixed pool of voices and mixes from the
//! preallocated [`ClickBufferSet`]. No allocation, no locks, no logging on
//! the audio thread.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use crossbeam_channel::Sender;

use super::click::ClickBufferSet;
use super::error::{AudioError, AudioResult};
use crate::types::{ClickKind, Sample};

/// Preferred sample rate when the device offers a choice
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Capacity of the scheduled-click ring
///
/// The lookahead window holds at most a handful of clicks (the densest grid
/// is 300 BPM with sixteenths, 20 clicks/s, over a 100 ms window); 256 gives
/// generous headroom for stall catch-up bursts.
pub const CLICK_QUEUE_CAPACITY: usize = 256;

/// Simultaneous click voices
///
/// Clicks are at most 30 ms and the densest grid spaces them 50 ms apart, so
/// two voices rarely overlap; eight absorbs catch-up bursts.
pub const MAX_VOICES: usize = 8;

/// A click scheduled at an absolute device-clock time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledClick {
    pub kind: ClickKind,
    /// Device-clock time in seconds (see [`AudioClock::now_secs`])
    pub audio_time: f64,
}

/// Create the scheduler → audio click ring
pub fn click_channel() -> (rtrb::Producer<ScheduledClick>, rtrb::Consumer<ScheduledClick>) {
    rtrb::RingBuffer::new(CLICK_QUEUE_CAPACITY)
}

/// Out-of-band playback status, reported off the audio thread
#[derive(Debug, Clone)]
pub enum AudioStatus {
    /// The device stream reported an error; the owner should close and reopen
    StreamError(String),
}

/// Read side of the device clock: frames rendered so far
///
/// Cloneable handle; the scheduler uses it to convert monotonic event times
/// into device-clock click times.
#[derive(Clone)]
pub struct AudioClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl AudioClock {
    pub fn new(frames: Arc<AtomicU64>, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
        }
    }

    /// Device time in seconds since the stream opened
    pub fn now_secs(&self) -> f64 {
        self.frames.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// One active click playback
#[derive(Debug, Clone, Copy)]
struct Voice {
    kind: ClickKind,
    start_frame: u64,
    pos: usize,
    active: bool,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            kind: ClickKind::Normal,
            start_frame: 0,
            pos: 0,
            active: false,
        }
    }
}

/// Callback-side state: admits scheduled clicks and mixes voices
///
/// Owned exclusively by the audio callback. Kept separate from the stream
/// plumbing so the mixing logic is testable without a device.
pub struct ClickRenderer {
    buffers: Arc<ClickBufferSet>,
    clicks: rtrb::Consumer<ScheduledClick>,
    voices: [Voice; MAX_VOICES],
    frames: Arc<AtomicU64>,
    next_frame: u64,
    sample_rate: u32,
    flush_requests: Arc<AtomicU32>,
    flush_seen: u32,
}

impl ClickRenderer {
    pub fn new(
        buffers: Arc<ClickBufferSet>,
        clicks: rtrb::Consumer<ScheduledClick>,
        frames: Arc<AtomicU64>,
        flush_requests: Arc<AtomicU32>,
        sample_rate: u32,
    ) -> Self {
        Self {
            buffers,
            clicks,
            voices: [Voice::default(); MAX_VOICES],
            frames,
            next_frame: 0,
            sample_rate,
            flush_requests,
            flush_seen: 0,
        }
    }

    /// Fill one interleaved output buffer
    pub fn render(&mut self, out: &mut [Sample], channels: usize) {
        let n_frames = out.len() / channels.max(1);
        let start = self.next_frame;
        let end = start + n_frames as u64;

        // A flush request (suspend/resume cycle) drops everything queued
        // before the request was made, plus any in-flight voices.
        let flush = self.flush_requests.load(Ordering::Acquire);
        if flush != self.flush_seen {
            while self.clicks.pop().is_ok() {}
            for voice in &mut self.voices {
                voice.active = false;
            }
            self.flush_seen = flush;
        }

        // Admit every click that starts before this buffer ends. The ring is
        // filled in time order, so the first future click ends the scan.
        while let Ok(click) = self.clicks.peek() {
            let frame = (click.audio_time * self.sample_rate as f64).round().max(0.0) as u64;
            if frame >= end {
                break;
            }
            let kind = click.kind;
            let _ = self.clicks.pop();
            // Late clicks start immediately
            self.start_voice(kind, frame.max(start));
        }

        out.fill(0.0);
        for voice in &mut self.voices {
            if !voice.active {
                continue;
            }
            let buffer = self.buffers.buffer(voice.kind);
            let begin = voice.start_frame.saturating_sub(start) as usize;
            for frame in begin..n_frames {
                if voice.pos >= buffer.len() {
                    break;
                }
                let sample = buffer[voice.pos];
                voice.pos += 1;
                for ch in &mut out[frame * channels..(frame + 1) * channels] {
                    *ch += sample;
                }
            }
            if voice.pos >= buffer.len() {
                voice.active = false;
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.next_frame = end;
        self.frames.store(end, Ordering::Release);
    }

    fn start_voice(&mut self, kind: ClickKind, start_frame: u64) {
        // Prefer a free slot; otherwise steal the voice closest to done
        let slot = match self.voices.iter().position(|v| !v.active) {
            Some(i) => i,
            None => {
                let mut best = 0;
                for (i, voice) in self.voices.iter().enumerate() {
                    if voice.pos > self.voices[best].pos {
                        best = i;
                    }
                }
                best
            }
        };
        self.voices[slot] = Voice {
            kind,
            start_frame,
            pos: 0,
            active: true,
        };
    }
}

/// Result of opening the click output: handle plus the scheduler-side ends
pub struct ClickOutputResult {
    /// Keeps the stream alive; drop (or `close`) to stop audio
    pub handle: ClickOutput,
    /// Producer side of the click ring, for the scheduler thread
    pub clicks: rtrb::Producer<ScheduledClick>,
    /// Device clock handle, for the scheduler thread
    pub clock: AudioClock,
}

/// CPAL-backed click playback handle
///
/// Not `Send` (the underlying stream is platform-bound); it lives on the
/// control thread that opened it.
pub struct ClickOutput {
    stream: Stream,
    clock: AudioClock,
    flush_requests: Arc<AtomicU32>,
    sample_rate: u32,
}

impl ClickOutput {
    /// Acquire the default output device and start the click stream
    ///
    /// Renders the [`ClickBufferSet`] at the negotiated rate before the
    /// stream starts, so the callback never allocates. Stream errors are
    /// reported on `status` and logged.
    pub fn open(preferred_rate: u32, status: Sender<AudioStatus>) -> AudioResult<ClickOutputResult> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or(AudioError::NoDevices)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using audio output device: {}", device_name);

        let supported = negotiate_output_config(&device, preferred_rate)?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let stream_config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        log::info!(
            "Click output config: {} channels, {}Hz",
            channels,
            sample_rate
        );

        let buffers = Arc::new(ClickBufferSet::render(sample_rate));
        let frames = Arc::new(AtomicU64::new(0));
        let flush_requests = Arc::new(AtomicU32::new(0));
        let (producer, consumer) = click_channel();

        let mut renderer = ClickRenderer::new(
            buffers,
            consumer,
            frames.clone(),
            flush_requests.clone(),
            sample_rate,
        );

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    renderer.render(data, channels);
                },
                move |err| {
                    log::error!("Click output stream error: {}", err);
                    let _ = status.try_send(AudioStatus::StreamError(err.to_string()));
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        log::info!("Click output stream started");

        let clock = AudioClock {
            frames,
            sample_rate,
        };
        Ok(ClickOutputResult {
            handle: ClickOutput {
                stream,
                clock: clock.clone(),
                flush_requests,
                sample_rate,
            },
            clicks: producer,
            clock,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Device time in seconds
    pub fn audio_clock_now(&self) -> f64 {
        self.clock.now_secs()
    }

    /// Pause the device and mark the queue for flushing
    pub fn suspend(&self) -> AudioResult<()> {
        self.flush_requests.fetch_add(1, Ordering::Release);
        self.stream
            .pause()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))
    }

    /// Resume playback; anything queued before the suspension is dropped
    pub fn resume(&self) -> AudioResult<()> {
        self.flush_requests.fetch_add(1, Ordering::Release);
        self.stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))
    }

    /// Release the device; queued clicks that never became audible are lost
    pub fn close(self) {
        log::info!("Click output closed");
    }
}

/// Pick the best output configuration: f32 format, preferred rate if the
/// device supports it, otherwise the closest available
fn negotiate_output_config(
    device: &cpal::Device,
    preferred_rate: u32,
) -> AudioResult<cpal::SupportedStreamConfig> {
    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    if configs.is_empty() {
        return Err(AudioError::UnsupportedFormat(
            "no f32 output configuration".to_string(),
        ));
    }

    let in_range = configs.iter().find(|c| {
        preferred_rate >= c.min_sample_rate().0 && preferred_rate <= c.max_sample_rate().0
    });

    let supported = match in_range {
        Some(range) => range.clone().with_sample_rate(cpal::SampleRate(preferred_rate)),
        None => {
            let closest = configs
                .iter()
                .min_by_key(|c| {
                    let min_diff = (c.min_sample_rate().0 as i64 - preferred_rate as i64).abs();
                    let max_diff = (c.max_sample_rate().0 as i64 - preferred_rate as i64).abs();
                    min_diff.min(max_diff)
                })
                .ok_or_else(|| AudioError::ConfigError("no output configuration".to_string()))?;
            let rate = closest.max_sample_rate().min(cpal::SampleRate(
                preferred_rate.max(closest.min_sample_rate().0),
            ));
            log::warn!(
                "Audio device doesn't support {}Hz, falling back to {}Hz",
                preferred_rate,
                rate.0
            );
            closest.clone().with_sample_rate(rate)
        }
    };
    Ok(supported)
}
