//! Peer state replication
//!
//! Latest-writer-wins replication between the primary and the wearable.
//! Every authoritative mutation publishes a [`StateSnapshot`] tagged with a
//! revision and timestamp; inbound snapshots are arbitrated against local
//! state, commands are surfaced to be applied like user actions, and pings
//! are answered with the last known context so a reconnecting peer can
//! bootstrap.
//!
//! Delivery failures are observational only: they are logged, the
//! last-known-context slot still updates, and the metronome never stalls on
//! the channel.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use thiserror::Error;

use super::envelope::{StateSnapshot, SyncCommand, SyncEnvelope};

/// Budget for one send on the peer channel
pub const SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors on the peer channel
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Peer send timed out after {0:?}")]
    SendTimeout(Duration),

    #[error("Peer channel closed")]
    ChannelClosed,

    #[error("Peer unreachable")]
    Unreachable,

    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Duplex message path to the paired device
///
/// Messages are delivered at most once with no cross-send ordering
/// guarantee. `send` may block up to [`SEND_TIMEOUT`].
pub trait PeerLink: Send {
    fn send(&self, payload: &str) -> SyncResult<()>;
    /// Non-blocking receive of the next inbound payload
    fn try_recv(&self) -> Option<String>;
    fn is_reachable(&self) -> bool;
}

/// Tie-break rule for concurrent snapshots
///
/// Separated behind a trait so the resolution policy is testable and
/// replaceable without touching the replication plumbing.
pub trait ConflictArbiter: Send {
    /// Whether an incoming `(revision, timestamp)` should replace local state
    fn should_apply(&self, local: (u64, f64), incoming: (u64, f64)) -> bool;
}

/// Default rule: higher revision wins; on a revision tie the later
/// timestamp wins; an exact tie is dropped.
pub struct LatestWriterWins;

impl ConflictArbiter for LatestWriterWins {
    fn should_apply(&self, local: (u64, f64), incoming: (u64, f64)) -> bool {
        incoming.0 > local.0 || (incoming.0 == local.0 && incoming.1 > local.1)
    }
}

/// What the owner should do with one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum SyncDisposition {
    /// Adopt this snapshot wholesale (it won arbitration)
    Apply {
        snapshot: StateSnapshot,
        revision: u64,
        timestamp: f64,
    },
    /// Execute this command as if the local user requested it
    Command(SyncCommand),
    /// Nothing to do (stale snapshot, ping already answered, undecodable)
    Ignored,
}

/// Replication endpoint for one peer pairing
pub struct PeerSync {
    link: Box<dyn PeerLink>,
    arbiter: Box<dyn ConflictArbiter>,
    local_revision: u64,
    local_timestamp: f64,
    /// Survives reachability gaps so a reconnecting peer can re-sync
    last_known: Option<StateSnapshot>,
}

impl PeerSync {
    pub fn new(link: Box<dyn PeerLink>) -> Self {
        Self::with_arbiter(link, Box::new(LatestWriterWins))
    }

    pub fn with_arbiter(link: Box<dyn PeerLink>, arbiter: Box<dyn ConflictArbiter>) -> Self {
        Self {
            link,
            arbiter,
            local_revision: 0,
            local_timestamp: 0.0,
            last_known: None,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.link.is_reachable()
    }

    pub fn local_revision(&self) -> u64 {
        self.local_revision
    }

    /// The last snapshot written to the replicated context slot
    pub fn last_known_context(&self) -> Option<&StateSnapshot> {
        self.last_known.as_ref()
    }

    /// Publish an authoritative mutation
    ///
    /// The context slot always updates; the broadcast is attempted only
    /// while the peer is reachable, and failures are logged and swallowed.
    pub fn publish(&mut self, snapshot: StateSnapshot, revision: u64, timestamp: f64) {
        self.local_revision = revision;
        self.local_timestamp = timestamp;
        self.last_known = Some(snapshot.clone());

        if !self.link.is_reachable() {
            log::debug!("Peer unreachable; snapshot rev {} kept in context slot", revision);
            return;
        }
        let envelope = SyncEnvelope::StateSync {
            timestamp,
            revision,
            snapshot,
        };
        self.transmit(&envelope);
    }

    /// Record that an inbound snapshot was adopted, without re-broadcasting
    pub fn note_applied(&mut self, snapshot: StateSnapshot, revision: u64, timestamp: f64) {
        self.local_revision = revision;
        self.local_timestamp = timestamp;
        self.last_known = Some(snapshot);
    }

    /// Ask the peer for its current state (used after reconnection)
    pub fn ping(&mut self, timestamp: f64) {
        let envelope = SyncEnvelope::Ping {
            timestamp,
            revision: self.local_revision,
        };
        self.transmit(&envelope);
    }

    /// Drain inbound messages into dispositions for the owner to apply
    pub fn poll(&mut self, mut on_disposition: impl FnMut(SyncDisposition)) {
        while let Some(payload) = self.link.try_recv() {
            let disposition = match SyncEnvelope::decode(&payload) {
                Some(envelope) => self.handle_inbound(envelope),
                None => SyncDisposition::Ignored,
            };
            if disposition != SyncDisposition::Ignored {
                on_disposition(disposition);
            }
        }
    }

    /// Arbitrate one inbound envelope
    pub fn handle_inbound(&mut self, envelope: SyncEnvelope) -> SyncDisposition {
        match envelope {
            SyncEnvelope::StateSync {
                timestamp,
                revision,
                snapshot,
            }
            | SyncEnvelope::Pong {
                timestamp,
                revision,
                snapshot,
            } => {
                let local = (self.local_revision, self.local_timestamp);
                if self.arbiter.should_apply(local, (revision, timestamp)) {
                    SyncDisposition::Apply {
                        snapshot,
                        revision,
                        timestamp,
                    }
                } else {
                    log::debug!(
                        "Dropping stale snapshot rev {} (local rev {})",
                        revision,
                        self.local_revision
                    );
                    SyncDisposition::Ignored
                }
            }
            SyncEnvelope::Command { command, .. } => SyncDisposition::Command(command),
            SyncEnvelope::Ping { .. } => {
                // Answer synchronously with the current context
                if let Some(snapshot) = self.last_known.clone() {
                    let pong = SyncEnvelope::Pong {
                        timestamp: self.local_timestamp,
                        revision: self.local_revision,
                        snapshot,
                    };
                    self.transmit(&pong);
                }
                SyncDisposition::Ignored
            }
        }
    }

    fn transmit(&self, envelope: &SyncEnvelope) {
        let payload = match envelope.encode() {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Failed to encode peer envelope: {}", e);
                return;
            }
        };
        if let Err(e) = self.link.send(&payload) {
            log::warn!("Peer send failed: {}", e);
        }
    }
}

/// In-process duplex link, used by tests and simulator pairings
pub struct InMemoryLink {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl InMemoryLink {
    /// Two connected endpoints
    pub fn pair() -> (InMemoryLink, InMemoryLink) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        (
            InMemoryLink { tx: a_tx, rx: b_rx },
            InMemoryLink { tx: b_tx, rx: a_rx },
        )
    }
}

impl PeerLink for InMemoryLink {
    fn send(&self, payload: &str) -> SyncResult<()> {
        self.tx
            .send_timeout(payload.to_string(), SEND_TIMEOUT)
            .map_err(|e| match e {
                crossbeam_channel::SendTimeoutError::Timeout(_) => {
                    SyncError::SendTimeout(SEND_TIMEOUT)
                }
                crossbeam_channel::SendTimeoutError::Disconnected(_) => SyncError::ChannelClosed,
            })
    }

    fn try_recv(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    fn is_reachable(&self) -> bool {
        true
    }
}
