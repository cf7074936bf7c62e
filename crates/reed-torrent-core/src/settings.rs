// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Settings persistence
//
// Settings are stored in a local JSON file next to the other
// per-user configuration. Resume data belongs to the engine, not here.

use crate::types::{AppError, AppSettings};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// In-memory cache of settings, persisted to disk on changes
pub struct SettingsStore {
    settings: RwLock<AppSettings>,
    file_path: PathBuf,
}

impl SettingsStore {
    /// Create a new settings store in the platform config directory
    pub fn new() -> Result<Self, AppError> {
        let file_path = Self::get_settings_path()?;
        Self::at_path(file_path)
    }

    /// Create a settings store backed by an explicit file
    pub fn at_path(file_path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let file_path = file_path.into();
        tracing::info!("Settings file path: {:?}", file_path);

        let settings = if file_path.exists() {
            let content = fs::read_to_string(&file_path)
                .map_err(|e| AppError::FileIo(format!("Failed to read settings: {}", e)))?;

            serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse settings, using defaults: {}", e);
                AppSettings::default()
            })
        } else {
            tracing::info!("No settings file found, using defaults");
            AppSettings::default()
        };

        let store = Self {
            settings: RwLock::new(settings),
            file_path,
        };

        if !store.file_path.exists() {
            store.persist()?;
        }

        Ok(store)
    }

    fn get_settings_path() -> Result<PathBuf, AppError> {
        let config_dir = directories::ProjectDirs::from("com", "reed", "torrent")
            .ok_or_else(|| AppError::FileIo("Could not determine config directory".to_string()))?
            .config_dir()
            .to_path_buf();

        Ok(config_dir.join("settings.json"))
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn persist(&self) -> Result<(), AppError> {
        let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);

        let content = serde_json::to_string_pretty(&*settings)
            .map_err(|e| AppError::Serialization(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::FileIo(format!("Failed to create config dir: {}", e)))?;
        }

        fs::write(&self.file_path, content)
            .map_err(|e| AppError::FileIo(format!("Failed to write settings: {}", e)))?;

        Ok(())
    }

    /// Get current settings
    pub fn get(&self) -> AppSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate, replace and persist settings
    pub fn update(&self, new_settings: AppSettings) -> Result<(), AppError> {
        new_settings.validate()?;
        {
            let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
            *settings = new_settings;
        }

        let result = self.persist();
        if let Err(e) = &result {
            tracing::error!("Failed to persist settings: {}", e);
        }
        result
    }
}
