//! Lock-free command queue to the scheduler thread
//!
//! The control thread never touches the beat pipeline directly: every
//! change travels through a bounded SPSC ring and is applied at the top of
//! the next scheduler iteration. Pushing is wait-free; the scheduler drains
//! the queue without blocking. Command payloads are plain data (the grid
//! snapshot is `Copy`), so no allocation happens on either side.

use crate::audio::{AudioClock, ScheduledClick};
use crate::clock::ClockInstant;
use crate::timing::GridConfig;

/// Commands applied by the scheduler at frame boundaries
pub enum SchedCommand {
    /// Re-anchor the grid: tick 0 at `anchor` (resets bar/beat counters)
    Arm {
        config: GridConfig,
        anchor: ClockInstant,
    },
    /// Swap the grid phase-preservingly (tempo/subdivision/accent changes)
    Configure(GridConfig),
    /// Stop emitting ticks and discard the grid
    Disarm,
    /// Pause tick emission and drop pending dispatches
    Suspend,
    /// Resume tick emission, discarding ticks that fell inside the pause
    Resume,
    /// Attach (or replace) the click output after a device open/reopen
    AttachAudio {
        clicks: rtrb::Producer<ScheduledClick>,
        clock: AudioClock,
    },
    /// Drop the click output (device lost); haptics and events continue
    DetachAudio,
}

/// Capacity of the command queue
///
/// Control-surface edits arrive at human rates; 64 absorbs any realistic
/// burst (e.g. a preset apply emitting several commands) without growing
/// the ring.
pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Create a command channel (producer for the control thread, consumer for
/// the scheduler)
pub fn command_channel() -> (rtrb::Producer<SchedCommand>, rtrb::Consumer<SchedCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetronomeConfig;

    #[test]
    fn test_command_channel_roundtrip() {
        let (mut tx, mut rx) = command_channel();
        tx.push(SchedCommand::Disarm).unwrap();
        tx.push(SchedCommand::Configure(GridConfig::from(
            &MetronomeConfig::default(),
        )))
        .unwrap();

        assert!(matches!(rx.pop().unwrap(), SchedCommand::Disarm));
        assert!(matches!(rx.pop().unwrap(), SchedCommand::Configure(_)));
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_command_size() {
        // Commands cross a preallocated ring; keep them within two cache
        // lines. GridConfig dominates (33-byte accent pattern plus grid
        // fields).
        let size = std::mem::size_of::<SchedCommand>();
        assert!(size <= 128, "SchedCommand is {} bytes", size);
    }
}
