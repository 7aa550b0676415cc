//! Peer wire format
//!
//! JSON envelopes exchanged with the paired device. Every envelope carries
//! the sender's wall-clock timestamp and state revision; the channel gives
//! no ordering guarantee, so receivers arbitrate on those fields alone.

use serde::{Deserialize, Serialize};

use crate::types::{
    AccentPattern, BeatUnit, MetronomeConfig, Subdivision, TimeSignature,
};

/// Full replicated state: configuration plus transport flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub bpm: u16,
    pub is_playing: bool,
    pub time_signature_beats: u8,
    pub time_signature_unit: u8,
    pub accent_pattern: Vec<bool>,
    pub subdivision_enabled: bool,
    /// Subdivision divisor (2, 3 or 4); meaningful when enabled
    pub subdivision_type: u32,
}

impl StateSnapshot {
    pub fn capture(config: &MetronomeConfig, is_playing: bool) -> Self {
        Self {
            bpm: config.bpm(),
            is_playing,
            time_signature_beats: config.time_signature.beats_per_bar(),
            time_signature_unit: config.time_signature.beat_unit().denominator(),
            accent_pattern: config.accent_pattern.into(),
            subdivision_enabled: config.subdivision.is_enabled(),
            subdivision_type: config.subdivision.divisor().max(2),
        }
    }

    /// Rebuild a configuration, clamping anything out of range
    pub fn to_config(&self) -> MetronomeConfig {
        let unit = BeatUnit::from_denominator(self.time_signature_unit).unwrap_or_default();
        let subdivision = if self.subdivision_enabled {
            Subdivision::from_divisor(self.subdivision_type).unwrap_or(Subdivision::Eighth)
        } else {
            Subdivision::None
        };
        MetronomeConfig::new(
            self.bpm,
            TimeSignature::new(self.time_signature_beats, unit),
            AccentPattern::from(self.accent_pattern.clone()),
            subdivision,
        )
    }
}

/// Remote request, applied like a local user action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncCommand {
    Play,
    Stop,
    Toggle,
    #[serde(rename = "incrementBPM")]
    IncrementBpm,
    #[serde(rename = "decrementBPM")]
    DecrementBpm,
    ResetToDefaults,
}

/// One message on the peer channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEnvelope {
    #[serde(rename_all = "camelCase")]
    StateSync {
        timestamp: f64,
        revision: u64,
        #[serde(flatten)]
        snapshot: StateSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    Command {
        timestamp: f64,
        revision: u64,
        command: SyncCommand,
    },
    #[serde(rename_all = "camelCase")]
    Ping { timestamp: f64, revision: u64 },
    #[serde(rename_all = "camelCase")]
    Pong {
        timestamp: f64,
        revision: u64,
        #[serde(flatten)]
        snapshot: StateSnapshot,
    },
}

impl SyncEnvelope {
    pub fn timestamp(&self) -> f64 {
        match self {
            SyncEnvelope::StateSync { timestamp, .. }
            | SyncEnvelope::Command { timestamp, .. }
            | SyncEnvelope::Ping { timestamp, .. }
            | SyncEnvelope::Pong { timestamp, .. } => *timestamp,
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            SyncEnvelope::StateSync { revision, .. }
            | SyncEnvelope::Command { revision, .. }
            | SyncEnvelope::Ping { revision, .. }
            | SyncEnvelope::Pong { revision, .. } => *revision,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode a wire payload; unknown types and malformed JSON are ignored
    pub fn decode(payload: &str) -> Option<SyncEnvelope> {
        match serde_json::from_str(payload) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                log::debug!("Ignoring undecodable peer message: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccentPreset;

    fn sample_snapshot() -> StateSnapshot {
        let mut config = MetronomeConfig::default();
        config.set_bpm(140);
        config.set_time_signature(TimeSignature::new(7, BeatUnit::Eighth));
        config.accent_pattern = AccentPreset::Djent.pattern(7);
        config.subdivision = Subdivision::Triplet;
        StateSnapshot::capture(&config, true)
    }

    #[test]
    fn test_state_sync_wire_fields() {
        let envelope = SyncEnvelope::StateSync {
            timestamp: 12.5,
            revision: 7,
            snapshot: sample_snapshot(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&envelope.encode().unwrap()).unwrap();

        assert_eq!(json["type"], "stateSync");
        assert_eq!(json["timestamp"], 12.5);
        assert_eq!(json["revision"], 7);
        assert_eq!(json["bpm"], 140);
        assert_eq!(json["isPlaying"], true);
        assert_eq!(json["timeSignatureBeats"], 7);
        assert_eq!(json["timeSignatureUnit"], 8);
        assert_eq!(json["subdivisionEnabled"], true);
        assert_eq!(json["subdivisionType"], 3);
        assert_eq!(json["accentPattern"][0], true);
        assert_eq!(json["accentPattern"][1], false);
    }

    #[test]
    fn test_command_wire_names() {
        for (command, name) in [
            (SyncCommand::Play, "play"),
            (SyncCommand::Stop, "stop"),
            (SyncCommand::Toggle, "toggle"),
            (SyncCommand::IncrementBpm, "incrementBPM"),
            (SyncCommand::DecrementBpm, "decrementBPM"),
            (SyncCommand::ResetToDefaults, "resetToDefaults"),
        ] {
            let envelope = SyncEnvelope::Command {
                timestamp: 0.0,
                revision: 1,
                command,
            };
            let json: serde_json::Value =
                serde_json::from_str(&envelope.encode().unwrap()).unwrap();
            assert_eq!(json["type"], "command");
            assert_eq!(json["command"], name, "{:?}", command);
        }
    }

    #[test]
    fn test_roundtrip() {
        let envelopes = [
            SyncEnvelope::StateSync {
                timestamp: 1.0,
                revision: 3,
                snapshot: sample_snapshot(),
            },
            SyncEnvelope::Command {
                timestamp: 2.0,
                revision: 4,
                command: SyncCommand::IncrementBpm,
            },
            SyncEnvelope::Ping {
                timestamp: 3.0,
                revision: 5,
            },
            SyncEnvelope::Pong {
                timestamp: 4.0,
                revision: 6,
                snapshot: sample_snapshot(),
            },
        ];
        for envelope in envelopes {
            let decoded = SyncEnvelope::decode(&envelope.encode().unwrap()).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn test_unknown_type_ignored() {
        assert!(SyncEnvelope::decode(r#"{"type":"chatMessage","timestamp":1.0}"#).is_none());
        assert!(SyncEnvelope::decode("not json at all").is_none());
        assert!(SyncEnvelope::decode("{}").is_none());
    }

    #[test]
    fn test_snapshot_config_roundtrip() {
        let snapshot = sample_snapshot();
        let config = snapshot.to_config();
        assert_eq!(StateSnapshot::capture(&config, true), snapshot);
        assert_eq!(config.bpm(), 140);
        assert_eq!(config.subdivision, Subdivision::Triplet);
    }

    #[test]
    fn test_snapshot_clamps_wild_values() {
        let snapshot = StateSnapshot {
            bpm: 9999,
            is_playing: false,
            time_signature_beats: 99,
            time_signature_unit: 5,
            accent_pattern: vec![],
            subdivision_enabled: true,
            subdivision_type: 7,
        };
        let config = snapshot.to_config();
        assert_eq!(config.bpm(), crate::types::MAX_BPM);
        assert_eq!(config.time_signature.beats_per_bar(), 32);
        // Unknown unit falls back to quarters, empty pattern regains a beat
        assert_eq!(config.time_signature.beat_unit().denominator(), 4);
        assert!(config.accent_pattern.is_accent(0));
        assert_eq!(config.subdivision, Subdivision::Eighth);
    }
}
