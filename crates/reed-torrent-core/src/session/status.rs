// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Status classification
//
// Rules are checked in priority order: missing metadata, paused,
// complete, downloading. Seeding is only reachable on the complete path.

use super::entry::TransferStatus;
use crate::format::format_eta;

/// ETA shown when the rate is too low to extrapolate from
pub const ETA_UNKNOWN: &str = "Unknown";

/// What the classifier looks at for one entry in one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusInput {
    pub metadata_ready: bool,
    pub is_paused: bool,
    pub progress: f64,
    pub remaining_bytes: u64,
    pub download_rate: u64,
    pub is_seeding: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: TransferStatus,
    pub eta: String,
}

impl Classification {
    /// Discovering and Paused entries report no traffic
    pub fn forces_zero_rates(&self) -> bool {
        matches!(
            self.status,
            TransferStatus::Discovering | TransferStatus::Paused
        )
    }
}

pub fn classify(input: &StatusInput, eta_min_rate_bps: u64) -> Classification {
    let (status, eta) = if !input.metadata_ready {
        (TransferStatus::Discovering, String::new())
    } else if input.is_paused {
        (TransferStatus::Paused, String::new())
    } else if input.progress >= 1.0 {
        if input.is_seeding {
            (TransferStatus::Seeding, String::new())
        } else {
            (TransferStatus::Completed, String::new())
        }
    } else {
        (
            TransferStatus::Downloading,
            estimate_eta(input.remaining_bytes, input.download_rate, eta_min_rate_bps),
        )
    };

    Classification { status, eta }
}

/// ETA for a downloading entry, or "Unknown" at or below the threshold rate
pub fn estimate_eta(remaining_bytes: u64, download_rate: u64, min_rate_bps: u64) -> String {
    if download_rate <= min_rate_bps || download_rate == 0 {
        return ETA_UNKNOWN.to_string();
    }
    format_eta(remaining_bytes as f64 / download_rate as f64)
}
