// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Session entries

use super::rate::RateEstimator;
use crate::engine::{FileEntry, HandleError, TransferHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// ETA shown until the first rate is known
pub const ETA_CALCULATING: &str = "Calculating...";

/// Lifecycle status of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferStatus {
    Discovering,
    Downloading,
    Paused,
    Seeding,
    Completed,
}

impl TransferStatus {
    /// Seeding and Completed both mean every byte is present
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Seeding | Self::Completed)
    }

    /// Label for list rows; downloading embeds the percentage
    pub fn label(&self, progress: f64) -> String {
        match self {
            Self::Discovering => "Discovering".to_string(),
            Self::Downloading => format!("Downloading ({:.1}%)", progress * 100.0),
            Self::Paused => "Paused".to_string(),
            Self::Seeding => "Seeding".to_string(),
            Self::Completed => "Completed".to_string(),
        }
    }
}

/// One file inside a tracked transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProgress {
    pub path: String,
    pub size: u64,
    pub progress: f64,
}

/// Display record for one transfer, as handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub id: String,
    pub name: String,
    pub total_size: u64,
    pub downloaded_bytes: u64,
    pub progress: f64,
    /// Bytes per second
    pub download_rate: u64,
    /// Bytes per second
    pub upload_rate: u64,
    pub status: TransferStatus,
    pub eta: String,
    pub peers: usize,
    pub seeds: usize,
    pub files: Vec<FileProgress>,
    pub is_paused: bool,
    pub added_at: DateTime<Utc>,
    pub last_sampled_at: DateTime<Utc>,
}

impl SessionEntry {
    /// Build the initial entry once the handle has metadata
    pub fn from_handle(handle: &dyn TransferHandle, now: DateTime<Utc>) -> Result<Self, HandleError> {
        let name = handle.name()?;
        let total_size = handle.total_length()?;
        let files = file_progress(&name, total_size, &handle.file_list()?, 0.0);

        Ok(Self {
            id: handle.stable_id(),
            name,
            total_size,
            downloaded_bytes: 0,
            progress: 0.0,
            download_rate: 0,
            upload_rate: 0,
            status: TransferStatus::Downloading,
            eta: ETA_CALCULATING.to_string(),
            peers: 0,
            seeds: 0,
            files,
            is_paused: false,
            added_at: now,
            last_sampled_at: now,
        })
    }

    pub fn status_label(&self) -> String {
        self.status.label(self.progress)
    }
}

/// Fraction of `total` covered by `done`, clamped to `[0, 1]`; zero while the size is unknown
pub fn progress_of(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64).min(1.0)
}

/// Map engine file entries to display rows.
///
/// Files without an engine-side byte count inherit the transfer's overall
/// progress. An empty list means a single-file transfer named after itself.
pub fn file_progress(
    name: &str,
    total_size: u64,
    files: &[FileEntry],
    overall: f64,
) -> Vec<FileProgress> {
    if files.is_empty() {
        return vec![FileProgress {
            path: name.to_string(),
            size: total_size,
            progress: overall,
        }];
    }

    files
        .iter()
        .map(|file| FileProgress {
            path: file.path.clone(),
            size: file.length,
            progress: file
                .bytes_completed
                .map(|done| progress_of(done, file.length))
                .unwrap_or(overall),
        })
        .collect()
}

/// A session entry bound to its engine handle, plus the bookkeeping the refresh loop needs
#[derive(Debug)]
pub struct TrackedTransfer {
    pub(crate) handle: Arc<dyn TransferHandle>,
    pub(crate) entry: SessionEntry,
    pub(crate) download: RateEstimator,
    pub(crate) upload: RateEstimator,
    /// Set when the handle turned out to be unusable; purged next cycle
    pub(crate) invalid: bool,
    /// Set once the completion event for the current completion has fired
    pub(crate) completion_reported: bool,
}

impl TrackedTransfer {
    pub fn new(handle: Arc<dyn TransferHandle>, entry: SessionEntry) -> Self {
        Self {
            handle,
            entry,
            download: RateEstimator::new(),
            upload: RateEstimator::new(),
            invalid: false,
            completion_reported: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.entry.id
    }

    pub fn entry(&self) -> &SessionEntry {
        &self.entry
    }

    /// Usable handle and not flagged by an earlier cycle
    pub fn is_live(&self) -> bool {
        !self.invalid && !self.handle.is_closed()
    }

    pub(crate) fn mark_invalid(&mut self) {
        self.invalid = true;
    }

    /// Zero both rates and drop their baselines
    pub(crate) fn reset_rates(&mut self) {
        self.download.reset();
        self.upload.reset();
        self.entry.download_rate = 0;
        self.entry.upload_rate = 0;
    }
}
