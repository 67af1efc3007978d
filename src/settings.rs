use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::timer::TimerConfig;

pub const SETTINGS_FILE: &str = "settings.json";
pub const DATA_DIR_ENV: &str = "SPADESK_DATA_DIR";
pub const DEBUG_ENV: &str = "SPADESK_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DeskSettings {
    /// How often running sessions compare the clock against their end time.
    pub poll_interval_ms: u64,
    /// Also arm a one-shot timer at each session's end.
    pub deadline_backup: bool,
    pub database_file: String,
    pub debug_logging: bool,
}

impl Default for DeskSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            deadline_backup: true,
            database_file: "spadesk.sqlite3".into(),
            debug_logging: false,
        }
    }
}

impl DeskSettings {
    pub fn timer_config(&self) -> TimerConfig {
        TimerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            deadline_backup: self.deadline_backup,
        }
    }
}

/// Where settings and the database live: `SPADESK_DATA_DIR`, else the
/// working directory.
pub fn data_dir() -> PathBuf {
    env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<DeskSettings>,
    debug_override: Option<bool>,
}

impl SettingsStore {
    /// Loads `settings.json` from `dir`, falling back to defaults when the file
    /// is missing or unreadable as JSON.
    pub fn new(dir: &Path) -> Result<Self> {
        Self::with_env(dir, |key| env::var(key).ok())
    }

    fn with_env(dir: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(data) => data,
                Err(err) => {
                    log::warn!(
                        "Ignoring malformed settings in {}: {}",
                        path.display(),
                        err
                    );
                    DeskSettings::default()
                }
            }
        } else {
            DeskSettings::default()
        };

        let debug_override = lookup(DEBUG_ENV).map(|value| {
            !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "no")
        });

        Ok(Self {
            path,
            data: RwLock::new(data),
            debug_override,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current settings with environment overrides applied.
    pub fn settings(&self) -> DeskSettings {
        let mut settings = self.read().clone();
        if let Some(debug) = self.debug_override {
            settings.debug_logging = debug;
        }
        settings
    }

    /// Replaces the stored settings and writes them to disk. Environment
    /// overrides are never written back.
    pub fn update(&self, settings: DeskSettings) -> Result<()> {
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: DeskSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Malformed settings in {}", self.path.display()))?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &DeskSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, DeskSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, DeskSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
