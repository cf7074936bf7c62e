// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Settings and error types

use crate::engine::{EngineError, HandleError};
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application settings (GUI-agnostic)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Directory the engine writes transfer data into
    pub download_dir: PathBuf,
    /// Refresh loop cadence in milliseconds
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// How long an add waits for transfer metadata
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
    /// Download rate (bytes per second) an ETA must exceed to be shown
    #[serde(default = "default_eta_min_rate_bps")]
    pub eta_min_rate_bps: u64,
    /// Show system notifications when a transfer completes
    #[serde(default = "default_notifications_enabled")]
    pub notifications_enabled: bool,
}

fn default_refresh_interval_ms() -> u64 {
    1000
}

fn default_metadata_timeout_secs() -> u64 {
    30
}

fn default_eta_min_rate_bps() -> u64 {
    1024
}

fn default_notifications_enabled() -> bool {
    true
}

impl Default for AppSettings {
    fn default() -> Self {
        let download_dir = directories::UserDirs::new()
            .and_then(|d| d.download_dir().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ReedTorrent");

        Self {
            download_dir,
            refresh_interval_ms: default_refresh_interval_ms(),
            metadata_timeout_secs: default_metadata_timeout_secs(),
            eta_min_rate_bps: default_eta_min_rate_bps(),
            notifications_enabled: default_notifications_enabled(),
        }
    }
}

impl AppSettings {
    /// Reject values the session core cannot run with
    pub fn validate(&self) -> Result<(), AppError> {
        if self.refresh_interval_ms == 0 {
            return Err(AppError::InvalidConfig(
                "refresh interval must be greater than zero".to_string(),
            ));
        }
        if self.metadata_timeout_secs == 0 {
            return Err(AppError::InvalidConfig(
                "metadata timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Convert to the session core's configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            download_dir: self.download_dir.clone(),
            refresh_interval: Duration::from_millis(self.refresh_interval_ms),
            metadata_timeout: Duration::from_secs(self.metadata_timeout_secs),
            eta_min_rate_bps: self.eta_min_rate_bps,
        }
    }
}

/// Error types for the application
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppError {
    #[error("Could not add torrent: {0}")]
    Registration(String),

    #[error("Torrent already tracked: {0}")]
    DuplicateId(String),

    #[error("Torrent not found: {0}")]
    NotFound(String),

    #[error("Torrent handle is no longer usable: {0}")]
    InvalidHandle(String),

    #[error("Failed to sample {id}: {reason}")]
    Sample { id: String, reason: String },

    #[error("Timed out waiting for torrent metadata: {0}")]
    MetadataTimeout(String),

    #[error("File I/O error: {0}")]
    FileIo(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Session bridge is closed")]
    BridgeClosed,
}

impl AppError {
    /// Classify a failed handle read for the entry `id`
    pub fn from_handle(id: &str, err: HandleError) -> Self {
        match err {
            HandleError::Closed => AppError::InvalidHandle(id.to_string()),
            HandleError::Inconsistent(reason) => AppError::Sample {
                id: id.to_string(),
                reason,
            },
        }
    }
}

/// The engine only fails while registering a transfer
impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Registration(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::FileIo(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert_eq!(settings.refresh_interval_ms, 1000);
        assert_eq!(settings.metadata_timeout_secs, 30);
        assert_eq!(settings.eta_min_rate_bps, 1024);
        assert!(settings.notifications_enabled);
        assert!(settings.download_dir.ends_with("ReedTorrent"));
    }

    #[test]
    fn test_session_config_conversion() {
        let settings = AppSettings {
            refresh_interval_ms: 250,
            ..AppSettings::default()
        };
        let config = settings.session_config();
        assert_eq!(config.refresh_interval, Duration::from_millis(250));
        assert_eq!(config.metadata_timeout, Duration::from_secs(30));
        assert_eq!(config.download_dir, settings.download_dir);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let settings = AppSettings {
            refresh_interval_ms: 0,
            ..AppSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(AppError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: AppSettings =
            serde_json::from_str(r#"{ "downloadDir": "/tmp/reed" }"#).unwrap();
        assert_eq!(settings.download_dir, PathBuf::from("/tmp/reed"));
        assert_eq!(settings.refresh_interval_ms, 1000);
        assert!(settings.notifications_enabled);
    }

    #[test]
    fn test_engine_rejection_is_registration_error() {
        let err: AppError = EngineError::InvalidReference("nope".to_string()).into();
        assert!(matches!(err, AppError::Registration(_)));
    }

    #[test]
    fn test_closed_handle_is_invalid_handle() {
        let err = AppError::from_handle("abc", HandleError::Closed);
        assert_eq!(err, AppError::InvalidHandle("abc".to_string()));
    }
}
