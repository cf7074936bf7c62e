// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Download session state
//
// The table is the single source of truth; the refresh loop is the only
// thing that recomputes entries from their handles, and mutators only flip
// flags and issue engine controls.

pub mod entry;
pub mod manager;
pub mod rate;
pub mod refresh;
pub mod status;
pub mod table;

pub use entry::{FileProgress, SessionEntry, TrackedTransfer, TransferStatus};
pub use manager::SessionManager;
pub use rate::RateEstimator;
pub use refresh::{RefreshLoop, RefreshLoopHandle};
pub use table::SessionTable;

use crate::format::format_rate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration of the session core
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub download_dir: PathBuf,
    pub refresh_interval: Duration,
    pub metadata_timeout: Duration,
    pub eta_min_rate_bps: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        crate::types::AppSettings::default().session_config()
    }
}

/// Overall state shown in the status bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Activity {
    /// At least one transfer is incomplete and not seeding
    Downloading,
    /// Transfers exist but none is moving data in
    Idle,
    /// Nothing is tracked
    Ready,
}

impl Activity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Downloading => "Downloading",
            Self::Idle => "Idle",
            Self::Ready => "Ready",
        }
    }
}

/// Totals across every live entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    /// Incomplete transfers, paused ones included
    pub active: usize,
    pub completed: usize,
    pub download_rate: u64,
    pub upload_rate: u64,
    pub activity: Activity,
}

impl AggregateStats {
    pub fn from_entries(entries: &[SessionEntry]) -> Self {
        // paused transfers still count until every byte is in
        let active = entries
            .iter()
            .filter(|e| e.progress < 1.0 && e.status != TransferStatus::Seeding)
            .count();
        let completed = entries.iter().filter(|e| e.progress >= 1.0).count();

        let activity = if active > 0 {
            Activity::Downloading
        } else if entries.is_empty() {
            Activity::Ready
        } else {
            Activity::Idle
        };

        Self {
            active,
            completed,
            download_rate: entries.iter().map(|e| e.download_rate).sum(),
            upload_rate: entries.iter().map(|e| e.upload_rate).sum(),
            activity,
        }
    }

    /// One-line summary for a status bar
    pub fn status_line(&self) -> String {
        format!(
            "{} | \u{2193} {} \u{2191} {} | {} Active | {} Complete",
            self.activity.label(),
            format_rate(self.download_rate),
            format_rate(self.upload_rate),
            self.active,
            self.completed
        )
    }
}

/// Immutable view of the session published once per refresh cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub entries: Vec<SessionEntry>,
    pub stats: AggregateStats,
    pub taken_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(entries: Vec<SessionEntry>, taken_at: DateTime<Utc>) -> Self {
        let stats = AggregateStats::from_entries(&entries);
        Self {
            entries,
            stats,
            taken_at,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Utc::now())
    }

    pub fn get(&self, id: &str) -> Option<&SessionEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

/// Events emitted to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Metadata arrived and the transfer is now tracked
    Added { id: String, name: String },
    /// A registered transfer never became trackable
    AddFailed { id: String, reason: String },
    /// A transfer crossed into completion
    Completed { id: String, name: String },
    /// A transfer was removed by the user
    Removed { id: String },
}
