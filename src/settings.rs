//! Persisted user preferences.

use crate::{CaptureMode, Error, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Export preferences
///
/// Serialized with the keys `defaultMode`, `includeImages` and `includeLinks`.
/// Missing keys take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub default_mode: CaptureMode,
    pub include_images: bool,
    pub include_links: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_mode: CaptureMode::Original,
            include_images: true,
            include_links: true,
        }
    }
}

/// Get-all / set-all key-value storage for `Settings`
pub trait SettingsStore: Send + Sync {
    fn get_all(&self) -> Result<Settings>;
    fn set_all(&self, settings: &Settings) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    inner: Mutex<Settings>,
}

impl MemorySettingsStore {
    pub fn new(initial: Settings) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get_all(&self) -> Result<Settings> {
        Ok(*self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn set_all(&self, settings: &Settings) -> Result<()> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = *settings;
        Ok(())
    }
}

/// Settings kept in a JSON file. A missing file reads as the defaults.
#[derive(Debug, Clone)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileSettingsStore {
    fn get_all(&self) -> Result<Settings> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                let settings = serde_json::from_str(&text).map_err(|e| {
                    Error::ConfigError(format!("invalid settings file {}: {}", self.path.display(), e))
                })?;
                Ok(settings)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no settings at {}, using defaults", self.path.display());
                Ok(Settings::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_all(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, json)?;
        debug!("saved settings to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_wire_keys() {
        let s = Settings::default();
        assert_eq!(s.default_mode, CaptureMode::Original);
        let v = serde_json::to_value(s).unwrap();
        assert_eq!(v["defaultMode"], "original");
        assert_eq!(v["includeImages"], true);
        assert_eq!(v["includeLinks"], true);
    }

    #[test]
    fn partial_documents_fill_defaults() {
        let s: Settings = serde_json::from_str(r#"{"defaultMode":"readable"}"#).unwrap();
        assert_eq!(s.default_mode, CaptureMode::Readable);
        assert!(s.include_images && s.include_links);
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemorySettingsStore::default();
        let wanted = Settings {
            default_mode: CaptureMode::Readable,
            include_images: false,
            include_links: true,
        };
        store.set_all(&wanted).unwrap();
        assert_eq!(store.get_all().unwrap(), wanted);
    }

    #[test]
    fn file_store_missing_then_saved() {
        let dir = std::env::temp_dir().join(format!("rfexport-settings-{}", std::process::id()));
        let store = JsonFileSettingsStore::new(dir.join("nested").join("settings.json"));
        assert_eq!(store.get_all().unwrap(), Settings::default());
        let wanted = Settings {
            include_links: false,
            ..Default::default()
        };
        store.set_all(&wanted).unwrap();
        assert_eq!(store.get_all().unwrap(), wanted);

        std::fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.get_all(), Err(Error::ConfigError(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
