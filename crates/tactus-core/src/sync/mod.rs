//! Peer state synchronization

mod envelope;
mod peer;

pub use envelope::{StateSnapshot, SyncCommand, SyncEnvelope};
pub use peer::{
    ConflictArbiter, InMemoryLink, LatestWriterWins, PeerLink, PeerSync, SyncDisposition,
    SyncError, SyncResult, SEND_TIMEOUT,
};
