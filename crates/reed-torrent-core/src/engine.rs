// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Transfer engine contract
//
// The peer wire protocol lives behind these traits. Everything the session
// core knows about a transfer comes from a TransferHandle; every accessor is
// expected to read cached engine state and return without blocking.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Errors returned by the engine when registering a transfer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("engine rejected transfer: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors returned when reading a single handle
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HandleError {
    /// The engine no longer knows this transfer
    #[error("handle is closed")]
    Closed,

    /// The engine returned state that does not add up
    #[error("inconsistent state: {0}")]
    Inconsistent(String),
}

/// Where a transfer comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSource {
    /// A magnet-style reference
    Magnet(String),
    /// A metainfo file on disk
    File(PathBuf),
}

impl TransferSource {
    /// Treat anything that is not an existing path as a magnet reference
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        let path = Path::new(trimmed);
        if !trimmed.starts_with("magnet:") && path.exists() {
            TransferSource::File(path.to_path_buf())
        } else {
            TransferSource::Magnet(trimmed.to_string())
        }
    }
}

impl fmt::Display for TransferSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferSource::Magnet(reference) => f.write_str(reference),
            TransferSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// One file inside a transfer, as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub length: u64,
    /// Piece-accurate completed bytes, when the engine tracks them per file
    pub bytes_completed: Option<u64>,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, length: u64) -> Self {
        Self {
            path: path.into(),
            length,
            bytes_completed: None,
        }
    }
}

/// Engine-side reference to one transfer
#[async_trait]
pub trait TransferHandle: Send + Sync + fmt::Debug {
    /// Content hash identifying the transfer
    fn stable_id(&self) -> String;

    /// Whether name, size and file list are known yet
    fn metadata_ready(&self) -> bool;

    /// Resolves once metadata is available
    async fn wait_for_metadata(&self);

    fn name(&self) -> Result<String, HandleError>;
    fn total_length(&self) -> Result<u64, HandleError>;
    fn file_list(&self) -> Result<Vec<FileEntry>, HandleError>;
    fn bytes_completed(&self) -> Result<u64, HandleError>;
    fn bytes_uploaded(&self) -> Result<u64, HandleError>;
    fn peer_connection_count(&self) -> usize;
    fn seed_count(&self) -> usize;
    fn is_seeding(&self) -> bool;

    /// True once the engine has dropped or lost this transfer
    fn is_closed(&self) -> bool;

    /// Request every piece
    fn download_all(&self);

    /// Cancel every outstanding piece request
    fn cancel_all_pieces(&self);

    /// Stop all network activity and forget the transfer
    fn drop_transfer(&self);
}

/// Registration side of the engine
pub trait TransferEngine: Send + Sync {
    fn add_from_magnet(&self, reference: &str) -> Result<Arc<dyn TransferHandle>, EngineError>;
    fn add_from_file(&self, path: &Path) -> Result<Arc<dyn TransferHandle>, EngineError>;

    /// Dispatch on the kind of source
    fn register(&self, source: &TransferSource) -> Result<Arc<dyn TransferHandle>, EngineError> {
        match source {
            TransferSource::Magnet(reference) => self.add_from_magnet(reference),
            TransferSource::File(path) => self.add_from_file(path),
        }
    }
}
