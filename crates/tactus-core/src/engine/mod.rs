//! Orchestration: the metronome state machine, its scheduler thread, and
//! the channels that tie control, audio and observers together

mod command;
mod event;
mod metronome;
mod scheduler;

pub use command::{command_channel, SchedCommand, COMMAND_QUEUE_CAPACITY};
pub use event::{event_channel, EngineEvent, EVENT_CHANNEL_CAPACITY};
pub use metronome::{EngineError, EngineResult, Metronome};
pub use scheduler::{
    AudioSink, BeatPipeline, SchedulerHandle, LOOKAHEAD_NANOS, SCHEDULER_PERIOD,
};
