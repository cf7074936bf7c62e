// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Session manager
//
// Entry point for the presentation layer: add, remove, pause/resume,
// snapshots and event subscription. Engine controls are issued under the
// table lock so no cycle ever samples a handle that was already detached;
// waiting for metadata and deleting data happen outside it.

use super::entry::{SessionEntry, TrackedTransfer, TransferStatus};
use super::refresh::{RefreshLoop, RefreshLoopHandle};
use super::table::SessionTable;
use super::{AggregateStats, SessionConfig, SessionEvent, SessionSnapshot};
use crate::engine::{TransferEngine, TransferHandle, TransferSource};
use crate::types::AppError;
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};

const EVENT_CAPACITY: usize = 100;

/// Owns the session table and everything that mutates it
pub struct SessionManager {
    engine: Arc<dyn TransferEngine>,
    table: Arc<SessionTable>,
    config: SessionConfig,
    events: broadcast::Sender<SessionEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionManager {
    pub fn new(engine: Arc<dyn TransferEngine>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (snapshots, _) = watch::channel(SessionSnapshot::empty());

        Self {
            engine,
            table: Arc::new(SessionTable::new()),
            config,
            events,
            snapshots,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<SessionTable> {
        &self.table
    }

    /// Lifecycle events: added, add failed, completed, removed
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Snapshot published by the most recent refresh cycle
    pub fn watch_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    /// Current table contents, without waiting for the next cycle
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::new(self.table.snapshot(), Utc::now())
    }

    pub fn stats(&self) -> AggregateStats {
        AggregateStats::from_entries(&self.table.snapshot())
    }

    pub fn refresh_loop(&self) -> RefreshLoop {
        RefreshLoop::new(
            self.table.clone(),
            self.events.clone(),
            self.snapshots.clone(),
            self.config.refresh_interval,
            self.config.eta_min_rate_bps,
        )
    }

    /// Start refreshing on the current tokio runtime
    pub fn spawn_refresh_loop(&self) -> RefreshLoopHandle {
        self.refresh_loop().spawn()
    }

    /// Register a transfer with the engine.
    ///
    /// Returns the transfer id as soon as the engine accepts the source; the
    /// entry shows up in the table once metadata resolves. Must be called
    /// from within a tokio runtime.
    pub fn add(&self, source: TransferSource) -> Result<String, AppError> {
        let runtime = Handle::try_current().map_err(|e| AppError::Engine(e.to_string()))?;

        let handle = self.engine.register(&source).map_err(|e| {
            tracing::warn!("Engine rejected {}: {}", source, e);
            AppError::from(e)
        })?;
        let id = handle.stable_id();
        self.table.reserve(&id, handle.clone())?;
        tracing::info!("Registered torrent {}, waiting for metadata", id);

        runtime.spawn(resolve_pending(
            self.table.clone(),
            self.events.clone(),
            handle,
            self.config.metadata_timeout,
        ));

        Ok(id)
    }

    /// Add several sources; each one succeeds or fails on its own
    pub fn add_batch(&self, sources: Vec<TransferSource>) -> Vec<Result<String, AppError>> {
        sources.into_iter().map(|source| self.add(source)).collect()
    }

    /// Detach a transfer from the engine and drop it from the table.
    ///
    /// With `delete_data`, the downloaded content is deleted in the
    /// background; this call does not wait for the disk.
    pub fn remove(&self, id: &str, delete_data: bool) -> Result<(), AppError> {
        if let Some(handle) = self.table.release(id) {
            handle.drop_transfer();
            tracing::info!("Cancelled pending torrent {}", id);
            let _ = self.events.send(SessionEvent::Removed { id: id.to_string() });
            return Ok(());
        }

        let removed = self
            .table
            .remove_with(id, |transfer| transfer.handle.drop_transfer())?;
        tracing::info!("Removed torrent {} ({})", removed.entry.name, id);

        if delete_data {
            self.delete_data(&removed.entry.name);
        }

        let _ = self.events.send(SessionEvent::Removed { id: id.to_string() });
        Ok(())
    }

    /// Pause or resume a transfer
    pub fn set_paused(&self, id: &str, paused: bool) -> Result<(), AppError> {
        self.table.update(id, |transfer| {
            if !transfer.is_live() {
                return Err(AppError::InvalidHandle(id.to_string()));
            }
            if transfer.entry.is_paused == paused {
                return Ok(());
            }

            transfer.entry.is_paused = paused;
            if paused {
                transfer.handle.cancel_all_pieces();
                transfer.entry.status = TransferStatus::Paused;
                transfer.entry.download_rate = 0;
                transfer.entry.upload_rate = 0;
                transfer.entry.eta.clear();
            } else {
                transfer.handle.download_all();
                transfer.reset_rates();
                transfer.entry.status = if transfer.entry.progress >= 1.0 {
                    TransferStatus::Completed
                } else {
                    TransferStatus::Downloading
                };
            }
            Ok(())
        })??;

        tracing::info!(
            "{} torrent {}",
            if paused { "Paused" } else { "Resumed" },
            id
        );
        Ok(())
    }

    fn delete_data(&self, name: &str) {
        let Some(path) = data_path(&self.config.download_dir, name) else {
            tracing::warn!("Not deleting data for unsafe torrent name {:?}", name);
            return;
        };

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(remove_path(path));
            }
            Err(_) => {
                std::thread::spawn(move || {
                    let result = if path.is_dir() {
                        std::fs::remove_dir_all(&path)
                    } else {
                        std::fs::remove_file(&path)
                    };
                    if let Err(e) = result {
                        tracing::warn!("Error removing downloaded files {:?}: {}", path, e);
                    }
                });
            }
        }
    }
}

/// Wait for metadata outside the table lock, then commit the entry
async fn resolve_pending(
    table: Arc<SessionTable>,
    events: broadcast::Sender<SessionEvent>,
    handle: Arc<dyn TransferHandle>,
    timeout: Duration,
) {
    let id = handle.stable_id();

    if tokio::time::timeout(timeout, handle.wait_for_metadata())
        .await
        .is_err()
    {
        let err = AppError::MetadataTimeout(id.clone());
        abandon_pending(&table, &events, &handle, &id, err);
        return;
    }

    let entry = match SessionEntry::from_handle(handle.as_ref(), Utc::now()) {
        Ok(entry) => entry,
        Err(e) => {
            let err = AppError::from_handle(&id, e);
            abandon_pending(&table, &events, &handle, &id, err);
            return;
        }
    };
    let name = entry.name.clone();

    let transfer = TrackedTransfer::new(handle, entry);
    match table.commit_with(transfer, |t| t.handle.download_all()) {
        Ok(true) => {
            tracing::info!("Added torrent {} ({})", name, id);
            let _ = events.send(SessionEvent::Added { id, name });
        }
        Ok(false) => tracing::debug!("Torrent {} was removed before metadata arrived", id),
        Err(e) => tracing::error!("Failed to add torrent {}: {}", id, e),
    }
}

fn abandon_pending(
    table: &SessionTable,
    events: &broadcast::Sender<SessionEvent>,
    handle: &Arc<dyn TransferHandle>,
    id: &str,
    err: AppError,
) {
    // no reservation of ours means the user removed it, and maybe re-added it
    if !table.release_if(id, handle) {
        return;
    }
    handle.drop_transfer();
    tracing::error!("Failed to add torrent {}: {}", id, err);
    let _ = events.send(SessionEvent::AddFailed {
        id: id.to_string(),
        reason: err.to_string(),
    });
}

/// Location of a transfer's data, if `name` is a single plain path component
fn data_path(download_dir: &Path, name: &str) -> Option<PathBuf> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Some(download_dir.join(part)),
        _ => None,
    }
}

async fn remove_path(path: PathBuf) {
    let result = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
        Ok(_) => tokio::fs::remove_file(&path).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => tracing::info!("Removed downloaded files at {:?}", path),
        Err(e) => tracing::warn!("Error removing downloaded files {:?}: {}", path, e),
    }
}
