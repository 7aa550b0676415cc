//! Preset and tuner-settings persistence
//!
//! The persisted blob holds the user's saved metronome presets, the id of
//! the last preset used, and the tuner configuration, as one opaque YAML
//! document. Loading is forgiving: a missing or damaged file starts the
//! store empty rather than blocking startup, and tuner thresholds are
//! re-clamped on the way in so a hand-edited file can't smuggle in an
//! out-of-range reference pitch.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::types::{
    clamp_reference_pitch, AccentPattern, BeatUnit, MetronomeConfig, Subdivision, TimeSignature,
    DEFAULT_REFERENCE_PITCH_HZ,
};

/// A saved metronome configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub bpm: u16,
    pub time_signature: TimeSignature,
    pub accent_pattern: Vec<bool>,
    pub subdivision_enabled: bool,
    /// Divisor of the subdivision (2, 3 or 4); meaningful when enabled
    pub subdivision_type: u32,
    /// Seconds since the Unix epoch
    pub created_at: f64,
    pub updated_at: f64,
}

impl Preset {
    /// Capture the current configuration as a named preset
    pub fn from_config(name: &str, config: &MetronomeConfig, now_epoch_secs: f64) -> Self {
        Self {
            id: generate_preset_id(),
            name: name.to_string(),
            bpm: config.bpm(),
            time_signature: config.time_signature,
            accent_pattern: config.accent_pattern.into(),
            subdivision_enabled: config.subdivision.is_enabled(),
            subdivision_type: config.subdivision.divisor().max(2),
            created_at: now_epoch_secs,
            updated_at: now_epoch_secs,
        }
    }

    /// Rebuild a metronome configuration from this preset
    pub fn to_config(&self) -> MetronomeConfig {
        let subdivision = if self.subdivision_enabled {
            Subdivision::from_divisor(self.subdivision_type).unwrap_or(Subdivision::Eighth)
        } else {
            Subdivision::None
        };
        MetronomeConfig::new(
            self.bpm,
            self.time_signature,
            AccentPattern::from(self.accent_pattern.clone()),
            subdivision,
        )
    }
}

/// Persisted tuner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TunerConfig {
    /// A4 reference in Hz, clamped to 415..=466
    pub reference_pitch: f64,
    /// |cents| below this reads as in tune
    pub in_tune_threshold: f64,
    /// |cents| below this reads as close
    pub close_threshold: f64,
    pub haptic_feedback_enabled: bool,
    pub auto_detect_enabled: bool,
}

impl TunerConfig {
    pub fn clamped(mut self) -> Self {
        self.reference_pitch = clamp_reference_pitch(self.reference_pitch);
        self.close_threshold = self.close_threshold.max(self.in_tune_threshold);
        self
    }
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            reference_pitch: DEFAULT_REFERENCE_PITCH_HZ,
            in_tune_threshold: 5.0,
            close_threshold: 20.0,
            haptic_feedback_enabled: true,
            auto_detect_enabled: true,
        }
    }
}

/// The whole persisted blob
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresetStore {
    pub presets: Vec<Preset>,
    pub last_used_preset_id: Option<String>,
    #[serde(rename = "tunerConfiguration")]
    pub tuner: TunerConfig,
}

impl PresetStore {
    /// Load from disk; a missing or damaged file yields an empty store
    pub fn load(path: &Path) -> Self {
        match Self::read(path) {
            Ok(mut store) => {
                store.tuner = store.tuner.clone().clamped();
                log::info!(
                    "Loaded {} preset(s) from {:?}",
                    store.presets.len(),
                    path
                );
                store
            }
            Err(e) if path.exists() => {
                log::warn!("Preset store {:?} unreadable ({:#}); starting empty", path, e);
                Self::default()
            }
            Err(_) => {
                log::info!("No preset store at {:?}; starting empty", path);
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&yaml)?)
    }

    /// Persist to disk, creating the directory on first save
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating preset directory {:?}", parent))?;
        }
        let yaml = serde_yaml::to_string(self).context("serializing preset store")?;
        std::fs::write(path, yaml).with_context(|| format!("writing preset store {:?}", path))?;
        log::debug!("Preset store saved to {:?}", path);
        Ok(())
    }

    /// Save the configuration under a new preset and mark it last-used
    pub fn add_preset(&mut self, name: &str, config: &MetronomeConfig) -> &Preset {
        let preset = Preset::from_config(name, config, epoch_seconds());
        self.last_used_preset_id = Some(preset.id.clone());
        self.presets.push(preset);
        self.presets.last().expect("just pushed")
    }

    /// Overwrite an existing preset's settings; returns false when unknown
    pub fn update_preset(&mut self, id: &str, config: &MetronomeConfig) -> bool {
        match self.presets.iter_mut().find(|p| p.id == id) {
            Some(preset) => {
                preset.bpm = config.bpm();
                preset.time_signature = config.time_signature;
                preset.accent_pattern = config.accent_pattern.into();
                preset.subdivision_enabled = config.subdivision.is_enabled();
                preset.subdivision_type = config.subdivision.divisor().max(2);
                preset.updated_at = epoch_seconds();
                true
            }
            None => false,
        }
    }

    pub fn find(&self, id: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.id == id)
    }

    /// Remove a preset, clearing the last-used marker if it pointed there
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.presets.len();
        self.presets.retain(|p| p.id != id);
        if self.last_used_preset_id.as_deref() == Some(id) {
            self.last_used_preset_id = None;
        }
        self.presets.len() != before
    }

    /// Resolve a preset to a configuration and mark it last-used
    pub fn use_preset(&mut self, id: &str) -> Option<MetronomeConfig> {
        let config = self.find(id)?.to_config();
        self.last_used_preset_id = Some(id.to_string());
        Some(config)
    }
}

/// Seconds since the Unix epoch as f64
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Unique, opaque preset id: creation time in nanos plus a process counter
fn generate_preset_id() -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:04x}", nanos, n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccentPreset;

    fn sample_config() -> MetronomeConfig {
        let mut config = MetronomeConfig::default();
        config.set_bpm(140);
        config.set_time_signature(TimeSignature::new(7, BeatUnit::Eighth));
        config.accent_pattern = AccentPreset::Djent.pattern(7);
        config.subdivision = Subdivision::Sixteenth;
        config
    }

    #[test]
    fn test_preset_roundtrip_preserves_config() {
        let config = sample_config();
        let preset = Preset::from_config("djent 7/8", &config, 1000.0);
        assert_eq!(preset.to_config(), config);
        assert!(preset.subdivision_enabled);
        assert_eq!(preset.subdivision_type, 4);
    }

    #[test]
    fn test_preset_ids_unique() {
        let config = MetronomeConfig::default();
        let a = Preset::from_config("a", &config, 0.0);
        let b = Preset::from_config("b", &config, 0.0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_store_add_find_remove() {
        let mut store = PresetStore::default();
        let id = store.add_preset("groove", &sample_config()).id.clone();
        assert_eq!(store.last_used_preset_id.as_deref(), Some(id.as_str()));
        assert!(store.find(&id).is_some());

        assert!(store.remove(&id));
        assert!(store.find(&id).is_none());
        assert_eq!(store.last_used_preset_id, None);
        assert!(!store.remove(&id));
    }

    #[test]
    fn test_use_preset_marks_last_used() {
        let mut store = PresetStore::default();
        let id = store.add_preset("a", &sample_config()).id.clone();
        store.add_preset("b", &MetronomeConfig::default());

        let config = store.use_preset(&id).unwrap();
        assert_eq!(config.bpm(), 140);
        assert_eq!(store.last_used_preset_id.as_deref(), Some(id.as_str()));
        assert!(store.use_preset("missing").is_none());
    }

    #[test]
    fn test_load_missing_file_starts_empty() {
        let store = PresetStore::load(Path::new("/nonexistent/tactus/presets.yaml"));
        assert_eq!(store, PresetStore::default());
    }

    #[test]
    fn test_load_damaged_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presets.yaml");
        std::fs::write(&path, "presets: [not a preset").unwrap();

        let store = PresetStore::load(&path);
        assert_eq!(store, PresetStore::default());
    }

    #[test]
    fn test_load_reclamps_tuner_settings() {
        // A hand-edited file with a wild reference pitch is pulled back
        // into range on load
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presets.yaml");

        let mut store = PresetStore::default();
        store.tuner.reference_pitch = 440.0;
        store.save(&path).unwrap();
        let yaml = std::fs::read_to_string(&path)
            .unwrap()
            .replace("referencePitch: 440.0", "referencePitch: 900.0");
        std::fs::write(&path, yaml).unwrap();

        let loaded = PresetStore::load(&path);
        assert_eq!(
            loaded.tuner.reference_pitch,
            crate::types::MAX_REFERENCE_PITCH_HZ
        );
    }

    #[test]
    fn test_save_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("presets.yaml");

        PresetStore::default().save(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_store_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presets.yaml");

        let mut store = PresetStore::default();
        store.add_preset("saved", &sample_config());
        store.tuner.reference_pitch = 442.0;
        store.save(&path).unwrap();

        let loaded = PresetStore::load(&path);
        assert_eq!(loaded, store);
    }

    #[test]
    fn test_tuner_config_clamping() {
        let config = TunerConfig {
            reference_pitch: 500.0,
            in_tune_threshold: 10.0,
            close_threshold: 5.0,
            ..TunerConfig::default()
        }
        .clamped();
        assert_eq!(config.reference_pitch, crate::types::MAX_REFERENCE_PITCH_HZ);
        assert_eq!(config.close_threshold, 10.0);
    }

    #[test]
    fn test_update_preset_touches_timestamp() {
        let mut store = PresetStore::default();
        let id = store.add_preset("a", &MetronomeConfig::default()).id.clone();
        let created = store.find(&id).unwrap().created_at;

        assert!(store.update_preset(&id, &sample_config()));
        let preset = store.find(&id).unwrap();
        assert_eq!(preset.bpm, 140);
        assert!(preset.updated_at >= created);
        assert!(!store.update_preset("missing", &sample_config()));
    }
}
