//! Persisted, non-secret host settings, per spec §4.8.
//!
//! Written via write-temp/fsync/atomic-rename (`tempfile::NamedTempFile`
//! + `persist`) with a schema-version field. This crate never hardcodes
//! a config directory — the settings directory is supplied by the host,
//! since a browser extension or mobile shell has its own storage area.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

const SETTINGS_FILE_NAME: &str = "settings.toml";
const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("settings schema version '{0}' is not supported")]
    UnsupportedSchemaVersion(u32),
}

/// Auto-lock idle timeout, per spec §4.8's fixed option set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoLockTimeout {
    OneMinute,
    TwoMinutes,
    FiveMinutes,
    TenMinutes,
    TwentyMinutes,
    ThirtyMinutes,
    SixtyMinutes,
}

impl AutoLockTimeout {
    pub fn as_duration(self) -> Duration {
        let minutes = match self {
            AutoLockTimeout::OneMinute => 1,
            AutoLockTimeout::TwoMinutes => 2,
            AutoLockTimeout::FiveMinutes => 5,
            AutoLockTimeout::TenMinutes => 10,
            AutoLockTimeout::TwentyMinutes => 20,
            AutoLockTimeout::ThirtyMinutes => 30,
            AutoLockTimeout::SixtyMinutes => 60,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl Default for AutoLockTimeout {
    fn default() -> Self {
        AutoLockTimeout::TwentyMinutes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    pub auto_lock_timeout: AutoLockTimeout,
    #[serde(default)]
    pub api_base_url: String,
    #[serde(default)]
    pub show_hidden_tags: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            auto_lock_timeout: AutoLockTimeout::default(),
            api_base_url: String::new(),
            show_hidden_tags: false,
        }
    }
}

/// Host-directed settings persistence. One file per directory; the host
/// decides where that directory lives.
pub struct SettingsStore {
    dir: PathBuf,
}

impl SettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE_NAME)
    }

    /// Load settings from disk, or the defaults if no file exists yet.
    pub fn load(&self) -> Result<Settings, SettingsError> {
        let path = self.path();
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let settings: Settings = toml::from_str(&contents)?;
                if settings.schema_version > CURRENT_SCHEMA_VERSION {
                    return Err(SettingsError::UnsupportedSchemaVersion(settings.schema_version));
                }
                Ok(settings)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(err) => Err(SettingsError::Io(err)),
        }
    }

    /// Persist settings via write-temp-then-rename, so a crash mid-write
    /// never leaves a truncated file in place.
    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
        }

        let toml = toml::to_string_pretty(settings)?;
        let mut temp = NamedTempFile::new_in(&self.dir)?;
        temp.write_all(toml.as_bytes())?;
        temp.flush()?;
        temp.persist(self.path()).map_err(|err| SettingsError::Io(err.error))?;
        Ok(())
    }
}

/// Push a loaded/updated `auto_lock_timeout` into the keystore, per spec
/// §4.8 ("a settings change takes effect on the next access/reset, not
/// retroactively on the current timer").
pub fn apply_auto_lock_timeout(keystore: &crate::keystore::Keystore, settings: &Settings) {
    keystore.set_idle_timeout(settings.auto_lock_timeout.as_duration());
}
