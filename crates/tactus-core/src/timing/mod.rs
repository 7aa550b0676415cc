//! Beat scheduling and tempo estimation

mod engine;
mod tap;

pub use engine::{DueEvent, DueTicks, EngineState, GridConfig, TimingEngine};
pub use tap::{TapTempo, MAX_TAPS, TAP_WINDOW_NANOS};
