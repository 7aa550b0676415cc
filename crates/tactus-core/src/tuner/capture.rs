//! Microphone capture feeding the pitch pipeline
//!
//! The CPAL input callback only accumulates samples into fixed-size blocks
//! and pushes them onto a lock-free ring; the YIN analysis runs on a worker
//! thread that drains the ring, classifies valid readings, and fans the
//! results out on a bounded channel. Pitch detection therefore never runs
//! on the device callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use thiserror::Error;

use super::note::{Classification, NoteClassifier, NoteHypothesis, TuningAccuracy};
use super::yin::{PitchDetector, PitchReading};
use crate::clock::ClockSource;
use crate::config::TunerConfig;
use crate::haptic::{HapticDriver, HapticEngine, HapticKind};

/// Analysis block length in samples (one YIN window)
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Preferred capture rate; the device may negotiate another
pub const PREFERRED_CAPTURE_RATE: u32 = 44_100;

/// Capacity of the capture-block ring (callback → worker)
const BLOCK_RING_CAPACITY: usize = 8;

/// Capacity of the outbound update channel
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Errors that can occur while starting microphone capture
#[derive(Error, Debug)]
pub enum CaptureError {
    /// No input devices available
    #[error("No audio input devices found")]
    NoInputDevice,

    /// The device refused access; on most platforms a missing microphone
    /// permission surfaces this way. Not retried automatically.
    #[error("Microphone unavailable or access denied: {0}")]
    PermissionDenied(String),

    /// Failed to query device configurations
    #[error("Failed to get input device config: {0}")]
    ConfigError(String),

    /// No f32 configuration offered
    #[error("Unsupported input sample format: {0}")]
    UnsupportedFormat(String),

    /// Failed to build the input stream
    #[error("Failed to build input stream: {0}")]
    StreamBuildError(String),

    /// Failed to start the input stream
    #[error("Failed to start input stream: {0}")]
    StreamPlayError(String),
}

/// One fixed-size block of mono capture samples
#[derive(Clone, Copy)]
pub struct CaptureBlock {
    pub samples: [f32; CAPTURE_BLOCK_SIZE],
}

impl CaptureBlock {
    fn silence() -> Self {
        Self {
            samples: [0.0; CAPTURE_BLOCK_SIZE],
        }
    }
}

/// A classified pitch reading delivered to observers
#[derive(Debug, Clone, Copy)]
pub struct TunerUpdate {
    pub reading: PitchReading,
    pub note: NoteHypothesis,
    /// Signed cent offset from the hypothesized note
    pub cents: f64,
    pub accuracy: TuningAccuracy,
}

/// Gathers arbitrary-length interleaved callback chunks into whole blocks
///
/// Channel 0 is taken as the mono signal when the device is not mono.
pub struct BlockAccumulator {
    block: CaptureBlock,
    fill: usize,
}

impl BlockAccumulator {
    pub fn new() -> Self {
        Self {
            block: CaptureBlock::silence(),
            fill: 0,
        }
    }

    /// Feed one callback chunk; invokes `on_block` for every completed block
    pub fn feed(&mut self, data: &[f32], channels: usize, mut on_block: impl FnMut(&CaptureBlock)) {
        let channels = channels.max(1);
        for frame in data.chunks(channels) {
            self.block.samples[self.fill] = frame[0];
            self.fill += 1;
            if self.fill == CAPTURE_BLOCK_SIZE {
                on_block(&self.block);
                self.fill = 0;
            }
        }
    }
}

impl Default for BlockAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Analyze one block: detect, gate, classify
///
/// Returns `None` for silence, noise, or readings that fail the validity
/// gates (confidence and amplitude thresholds).
pub fn analyze_block(
    detector: &mut PitchDetector,
    classifier: &NoteClassifier,
    block: &[f32],
    sample_rate: u32,
    timestamp: crate::clock::ClockInstant,
) -> Option<TunerUpdate> {
    let reading = detector.process(block, sample_rate, timestamp)?;
    if !reading.is_valid() {
        return None;
    }
    let Classification {
        note,
        cents,
        accuracy,
    } = classifier.classify(reading.frequency_hz as f64)?;
    Some(TunerUpdate {
        reading,
        note,
        cents,
        accuracy,
    })
}

/// Running capture session: input stream plus analysis worker
///
/// The stream handle is platform-bound, so the tuner lives on the control
/// thread that started it. Dropping it stops capture and joins the worker.
pub struct Tuner {
    _stream: Stream,
    worker: Option<thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    updates: Receiver<TunerUpdate>,
    sample_rate: u32,
}

impl Tuner {
    /// Open the default input device and start the analysis worker
    ///
    /// When `haptic_driver` is provided and the tuner config enables haptic
    /// feedback, an in-tune confirmation transient fires (rate-limited)
    /// whenever a reading lands in the in-tune bucket.
    pub fn start(
        clock: Arc<dyn ClockSource>,
        config: &TunerConfig,
        haptic_driver: Option<Box<dyn HapticDriver>>,
    ) -> Result<Tuner, CaptureError> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using audio input device: {}", device_name);

        let supported = negotiate_input_config(&device)?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let stream_config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        log::info!("Capture config: {} channels, {}Hz", channels, sample_rate);

        let (mut block_tx, block_rx) = rtrb::RingBuffer::<CaptureBlock>::new(BLOCK_RING_CAPACITY);
        let (update_tx, update_rx) = bounded(UPDATE_CHANNEL_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));

        let mut accumulator = BlockAccumulator::new();
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    accumulator.feed(data, channels, |block| {
                        // Ring full means the worker is behind; drop the block
                        let _ = block_tx.push(*block);
                    });
                },
                move |err| {
                    log::error!("Capture stream error: {}", err);
                },
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::DeviceNotAvailable => {
                    CaptureError::PermissionDenied(e.to_string())
                }
                other => CaptureError::StreamBuildError(other.to_string()),
            })?;

        stream
            .play()
            .map_err(|e| CaptureError::StreamPlayError(e.to_string()))?;

        let config = config.clone().clamped();
        let worker = thread::Builder::new()
            .name("tactus-pitch".to_string())
            .spawn({
                let stop = stop.clone();
                move || {
                    pitch_worker(block_rx, update_tx, clock, config, haptic_driver, stop, sample_rate)
                }
            })
            .map_err(|e| CaptureError::StreamBuildError(e.to_string()))?;

        log::info!("Tuner capture started");
        Ok(Tuner {
            _stream: stream,
            worker: Some(worker),
            stop,
            updates: update_rx,
            sample_rate,
        })
    }

    /// Receiver of classified readings; clone freely
    pub fn updates(&self) -> Receiver<TunerUpdate> {
        self.updates.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Stop capture and join the analysis worker
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Tuner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Analysis worker: drain blocks, detect, classify, fan out
fn pitch_worker(
    mut blocks: rtrb::Consumer<CaptureBlock>,
    updates: Sender<TunerUpdate>,
    clock: Arc<dyn ClockSource>,
    config: TunerConfig,
    haptic_driver: Option<Box<dyn HapticDriver>>,
    stop: Arc<AtomicBool>,
    sample_rate: u32,
) {
    let mut detector = PitchDetector::new();
    let classifier = NoteClassifier::new(config.reference_pitch)
        .with_thresholds(config.in_tune_threshold, config.close_threshold);
    let mut haptics = haptic_driver.map(|driver| {
        let mut engine = HapticEngine::new(driver);
        engine.prepare();
        engine
    });

    while !stop.load(Ordering::Acquire) {
        match blocks.pop() {
            Ok(block) => {
                let now = clock.now();
                if let Some(update) =
                    analyze_block(&mut detector, &classifier, &block.samples, sample_rate, now)
                {
                    if config.haptic_feedback_enabled
                        && update.accuracy == TuningAccuracy::InTune
                    {
                        if let Some(engine) = haptics.as_mut() {
                            engine.play(HapticKind::InTune, now);
                        }
                    }
                    // Full channel: drop the oldest-style reading, observers
                    // only care about the latest
                    let _ = updates.try_send(update);
                }
            }
            Err(_) => thread::sleep(Duration::from_millis(2)),
        }
    }

    if let Some(engine) = haptics.as_mut() {
        engine.release();
    }
    log::debug!("Pitch worker stopped");
}

/// Pick an input configuration: mono f32 preferred, any f32 otherwise
fn negotiate_input_config(
    device: &cpal::Device,
) -> Result<cpal::SupportedStreamConfig, CaptureError> {
    let configs: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| CaptureError::ConfigError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();
    if configs.is_empty() {
        return Err(CaptureError::UnsupportedFormat(
            "no f32 input configuration".to_string(),
        ));
    }

    let best = configs
        .iter()
        .filter(|c| c.channels() == 1)
        .min_by_key(|c| rate_distance(c, PREFERRED_CAPTURE_RATE))
        .or_else(|| {
            configs
                .iter()
                .min_by_key(|c| rate_distance(c, PREFERRED_CAPTURE_RATE))
        })
        .ok_or_else(|| CaptureError::ConfigError("no input configuration".to_string()))?;

    let rate = if PREFERRED_CAPTURE_RATE >= best.min_sample_rate().0
        && PREFERRED_CAPTURE_RATE <= best.max_sample_rate().0
    {
        cpal::SampleRate(PREFERRED_CAPTURE_RATE)
    } else {
        best.max_sample_rate()
    };
    Ok(best.clone().with_sample_rate(rate))
}

fn rate_distance(config: &cpal::SupportedStreamConfigRange, target: u32) -> u32 {
    let min_diff = config.min_sample_rate().0.abs_diff(target);
    let max_diff = config.max_sample_rate().0.abs_diff(target);
    min_diff.min(max_diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockInstant;

    fn sine(freq: f32, amplitude: f32, len: usize, rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / rate as f32;
                amplitude * (std::f32::consts::TAU * freq * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_accumulator_assembles_blocks_from_chunks() {
        let mut acc = BlockAccumulator::new();
        let mut blocks = 0;
        // 9000 mono samples in 512-sample chunks: two full blocks
        let data: Vec<f32> = (0..9000).map(|i| i as f32).collect();
        for chunk in data.chunks(512) {
            acc.feed(chunk, 1, |block| {
                if blocks == 0 {
                    assert_eq!(block.samples[0], 0.0);
                    assert_eq!(block.samples[4095], 4095.0);
                } else {
                    assert_eq!(block.samples[0], 4096.0);
                }
                blocks += 1;
            });
        }
        assert_eq!(blocks, 2);
    }

    #[test]
    fn test_accumulator_takes_first_channel_of_interleaved() {
        let mut acc = BlockAccumulator::new();
        // Stereo frames: left = index, right = -1
        let mut data = Vec::new();
        for i in 0..CAPTURE_BLOCK_SIZE {
            data.push(i as f32);
            data.push(-1.0);
        }
        let mut seen = false;
        acc.feed(&data, 2, |block| {
            assert_eq!(block.samples[10], 10.0);
            assert!(block.samples.iter().all(|&s| s != -1.0));
            seen = true;
        });
        assert!(seen);
    }

    #[test]
    fn test_analyze_block_classifies_a440() {
        let mut detector = PitchDetector::new();
        let classifier = NoteClassifier::new(440.0);
        let block = sine(440.0, 0.3, CAPTURE_BLOCK_SIZE, 44_100);

        let update = analyze_block(
            &mut detector,
            &classifier,
            &block,
            44_100,
            ClockInstant::ZERO,
        )
        .expect("update expected");
        assert_eq!(update.note.name, "A");
        assert_eq!(update.note.octave, 4);
        assert!(update.cents.abs() < 4.0);
        assert_eq!(update.accuracy, TuningAccuracy::InTune);
    }

    #[test]
    fn test_analyze_block_gates_silence() {
        let mut detector = PitchDetector::new();
        let classifier = NoteClassifier::default();
        let block = vec![0.0f32; CAPTURE_BLOCK_SIZE];
        assert!(analyze_block(
            &mut detector,
            &classifier,
            &block,
            44_100,
            ClockInstant::ZERO
        )
        .is_none());
    }
}
