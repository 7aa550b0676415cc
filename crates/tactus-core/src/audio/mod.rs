//! Click synthesis and sample-accurate playback

mod click;
mod error;
mod output;

pub use click::{render_click, ClickBufferSet, ClickSpec};
pub use error::{AudioError, AudioResult};
pub use output::{
    click_channel, AudioClock, ClickOutput, ClickOutputResult, ClickRenderer, ScheduledClick,
    AudioStatus, CLICK_QUEUE_CAPACITY, DEFAULT_SAMPLE_RATE, MAX_VOICES,
};
