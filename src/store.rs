// Persistent settings: calibration, scheduler bounds, default mode, impulse selection
//
// The runtime only needs get/set semantics. JsonFileStore keeps everything in
// one pretty-printed JSON file; MemoryStore backs tests and dry runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{
    DEFAULT_AUTO_BLINK, DEFAULT_AUTO_IMPULSE, DEFAULT_BLINK_INTERVAL_MAX,
    DEFAULT_BLINK_INTERVAL_MIN, DEFAULT_IMPULSE_INTERVAL_MAX, DEFAULT_IMPULSE_INTERVAL_MIN,
    DEFAULT_IMPULSE_SELECTION, DEFAULT_MODE, DEFAULT_SERVO_CENTER, DEFAULT_SERVO_MAX,
    DEFAULT_SERVO_MIN, DEFAULT_SERVO_PINS, NUM_SERVOS,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-channel calibration
///
/// `pin` is the physical output address; on the Feetech bus it is the servo ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoCalibration {
    pub pin: u8,
    pub min: u8,
    pub center: u8,
    pub max: u8,
    pub invert: bool,
}

impl ServoCalibration {
    pub fn factory(index: usize) -> Self {
        Self {
            pin: DEFAULT_SERVO_PINS.get(index).copied().unwrap_or(0),
            min: DEFAULT_SERVO_MIN,
            center: DEFAULT_SERVO_CENTER,
            max: DEFAULT_SERVO_MAX,
            invert: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// "follow" or the name of an auto mode
    pub default_mode: String,
    pub auto_blink: bool,
    pub blink_interval_min: u32,
    pub blink_interval_max: u32,
    pub remember_last_mode: bool,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            default_mode: DEFAULT_MODE.to_string(),
            auto_blink: DEFAULT_AUTO_BLINK,
            blink_interval_min: DEFAULT_BLINK_INTERVAL_MIN,
            blink_interval_max: DEFAULT_BLINK_INTERVAL_MAX,
            remember_last_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpulseConfig {
    pub auto_impulse: bool,
    pub impulse_interval_min: u32,
    pub impulse_interval_max: u32,
    /// Comma-separated impulse names
    pub impulse_selection: String,
}

impl Default for ImpulseConfig {
    fn default() -> Self {
        Self {
            auto_impulse: DEFAULT_AUTO_IMPULSE,
            impulse_interval_min: DEFAULT_IMPULSE_INTERVAL_MIN,
            impulse_interval_max: DEFAULT_IMPULSE_INTERVAL_MAX,
            impulse_selection: DEFAULT_IMPULSE_SELECTION.to_string(),
        }
    }
}

/// Everything the runtime persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub servos: [ServoCalibration; NUM_SERVOS],
    pub mode: ModeConfig,
    pub impulse: ImpulseConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            servos: std::array::from_fn(ServoCalibration::factory),
            mode: ModeConfig::default(),
            impulse: ImpulseConfig::default(),
        }
    }
}

/// Key-value style access to persisted settings
pub trait SettingsStore: Send {
    fn settings(&self) -> &Settings;

    /// Replace the settings and persist them. The in-memory copy changes even
    /// when persisting fails; the write is not retried.
    fn save(&mut self, settings: Settings) -> Result<(), StoreError>;
}

/// Read-modify-write helper; failures are logged, not propagated
pub fn update(store: &mut dyn SettingsStore, f: impl FnOnce(&mut Settings)) {
    let mut settings = store.settings().clone();
    f(&mut settings);
    if let Err(e) = store.save(settings) {
        warn!("Failed to persist settings: {}", e);
    }
}

/// Settings kept in a single JSON file
pub struct JsonFileStore {
    path: PathBuf,
    settings: Settings,
}

impl JsonFileStore {
    /// Open the store, falling back to defaults when the file is missing or unreadable
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let settings = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Settings>(&text) {
                Ok(settings) => {
                    info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    warn!("Corrupt settings file {}: {}, using defaults", path.display(), e);
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No settings at {}, using defaults", path.display());
                Settings::default()
            }
            Err(e) => {
                warn!("Failed to read {}: {}, using defaults", path.display(), e);
                Settings::default()
            }
        };
        Self { path, settings }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileStore {
    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn save(&mut self, settings: Settings) -> Result<(), StoreError> {
        self.settings = settings;
        let text = serde_json::to_string_pretty(&self.settings)?;
        std::fs::write(&self.path, text).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// In-memory store (tests, simulation without a settings file)
#[derive(Debug, Default)]
pub struct MemoryStore {
    settings: Settings,
    pub saves: usize,
}

impl MemoryStore {
    pub fn new(settings: Settings) -> Self {
        Self { settings, saves: 0 }
    }
}

impl SettingsStore for MemoryStore {
    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn save(&mut self, settings: Settings) -> Result<(), StoreError> {
        self.settings = settings;
        self.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("settings.json"));
        assert_eq!(store.settings(), &Settings::default());
        assert_eq!(store.settings().servos[2].pin, 3);
    }

    #[test]
    fn test_save_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut store = JsonFileStore::open(&path);
        update(&mut store, |s| {
            s.mode.default_mode = "natural".to_string();
            s.servos[0].min = 40;
        });

        let reopened = JsonFileStore::open(&path);
        assert_eq!(reopened.settings().mode.default_mode, "natural");
        assert_eq!(reopened.settings().servos[0].min, 40);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"mode": {"remember_last_mode": true}}"#).unwrap();

        let store = JsonFileStore::open(&path);
        assert!(store.settings().mode.remember_last_mode);
        assert_eq!(store.settings().mode.default_mode, "follow");
        assert_eq!(store.settings().impulse, ImpulseConfig::default());
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::open(&path);
        assert_eq!(store.settings(), &Settings::default());
    }

    #[test]
    fn test_failed_write_still_updates_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("settings.json");

        let mut store = JsonFileStore::open(&path);
        let mut settings = store.settings().clone();
        settings.mode.remember_last_mode = true;
        assert!(matches!(store.save(settings), Err(StoreError::Io { .. })));
        assert!(store.settings().mode.remember_last_mode);
        assert!(!path.exists());
    }

    #[test]
    fn test_memory_store_counts_saves() {
        let mut store = MemoryStore::default();
        update(&mut store, |s| s.mode.auto_blink = false);
        assert_eq!(store.saves, 1);
        assert!(!store.settings().mode.auto_blink);
    }
}
