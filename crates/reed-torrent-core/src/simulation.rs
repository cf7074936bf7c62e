// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Simulated transfer engine
//
// An in-process engine with scriptable handles. Tests drive byte counters
// and metadata by hand; the headless frontend lets `tick` advance them.

use crate::engine::{EngineError, FileEntry, HandleError, TransferEngine, TransferHandle};
use async_trait::async_trait;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct HandleState {
    name: Option<String>,
    total_length: Option<u64>,
    files: Vec<FileEntry>,
    bytes_completed: u64,
    bytes_uploaded: u64,
    peers: usize,
    seeds: usize,
    seeding: bool,
    downloading: bool,
    closed: bool,
    dropped: bool,
    read_failure: Option<String>,
}

/// Scriptable stand-in for an engine handle
#[derive(Debug)]
pub struct SimulatedHandle {
    id: String,
    state: Mutex<HandleState>,
    metadata_tx: watch::Sender<bool>,
}

impl SimulatedHandle {
    /// A handle still waiting for metadata
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        let (metadata_tx, _) = watch::channel(false);
        Arc::new(Self {
            id: id.into(),
            state: Mutex::new(HandleState::default()),
            metadata_tx,
        })
    }

    /// A handle whose metadata is already known
    pub fn with_metadata(id: impl Into<String>, name: &str, total_length: u64) -> Arc<Self> {
        let handle = Self::new(id);
        handle.resolve_metadata(name, total_length, Vec::new());
        handle
    }

    fn state(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn readable(&self) -> Result<MutexGuard<'_, HandleState>, HandleError> {
        let state = self.state();
        if state.closed {
            return Err(HandleError::Closed);
        }
        if let Some(reason) = &state.read_failure {
            return Err(HandleError::Inconsistent(reason.clone()));
        }
        Ok(state)
    }

    pub fn resolve_metadata(&self, name: &str, total_length: u64, files: Vec<FileEntry>) {
        {
            let mut state = self.state();
            state.name = Some(name.to_string());
            state.total_length = Some(total_length);
            state.files = files;
        }
        self.metadata_tx.send_replace(true);
    }

    pub fn set_bytes_completed(&self, bytes: u64) {
        self.state().bytes_completed = bytes;
    }

    pub fn set_bytes_uploaded(&self, bytes: u64) {
        self.state().bytes_uploaded = bytes;
    }

    pub fn set_swarm(&self, peers: usize, seeds: usize) {
        let mut state = self.state();
        state.peers = peers;
        state.seeds = seeds;
    }

    pub fn set_seeding(&self, seeding: bool) {
        self.state().seeding = seeding;
    }

    /// Make every counter read fail with an inconsistent-state error
    pub fn fail_reads(&self, reason: Option<&str>) {
        self.state().read_failure = reason.map(str::to_string);
    }

    /// Simulate the engine losing the transfer
    pub fn close(&self) {
        self.state().closed = true;
    }

    pub fn is_dropped(&self) -> bool {
        self.state().dropped
    }

    pub fn is_downloading(&self) -> bool {
        self.state().downloading
    }

    /// Move the counters forward as if pieces had arrived
    pub fn advance(&self, downloaded: u64, uploaded: u64) {
        let mut state = self.state();
        if state.closed || !state.downloading {
            return;
        }
        let Some(total) = state.total_length else {
            return;
        };
        state.bytes_completed = state.bytes_completed.saturating_add(downloaded).min(total);
        state.bytes_uploaded = state.bytes_uploaded.saturating_add(uploaded);
        if state.bytes_completed >= total {
            state.seeding = state.peers > 0;
        }
    }
}

#[async_trait]
impl TransferHandle for SimulatedHandle {
    fn stable_id(&self) -> String {
        self.id.clone()
    }

    fn metadata_ready(&self) -> bool {
        *self.metadata_tx.borrow()
    }

    async fn wait_for_metadata(&self) {
        let mut rx = self.metadata_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn name(&self) -> Result<String, HandleError> {
        let state = self.readable()?;
        state
            .name
            .clone()
            .ok_or_else(|| HandleError::Inconsistent("metadata not resolved".to_string()))
    }

    fn total_length(&self) -> Result<u64, HandleError> {
        let state = self.readable()?;
        state
            .total_length
            .ok_or_else(|| HandleError::Inconsistent("metadata not resolved".to_string()))
    }

    fn file_list(&self) -> Result<Vec<FileEntry>, HandleError> {
        Ok(self.readable()?.files.clone())
    }

    fn bytes_completed(&self) -> Result<u64, HandleError> {
        Ok(self.readable()?.bytes_completed)
    }

    fn bytes_uploaded(&self) -> Result<u64, HandleError> {
        Ok(self.readable()?.bytes_uploaded)
    }

    fn peer_connection_count(&self) -> usize {
        self.state().peers
    }

    fn seed_count(&self) -> usize {
        self.state().seeds
    }

    fn is_seeding(&self) -> bool {
        self.state().seeding
    }

    fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn download_all(&self) {
        self.state().downloading = true;
    }

    fn cancel_all_pieces(&self) {
        self.state().downloading = false;
    }

    fn drop_transfer(&self) {
        let mut state = self.state();
        state.downloading = false;
        state.dropped = true;
        state.closed = true;
    }
}

/// In-process engine handing out [`SimulatedHandle`]s
#[derive(Debug, Default)]
pub struct SimulatedEngine {
    handles: Mutex<HashMap<String, Arc<SimulatedHandle>>>,
    /// When set, new handles resolve metadata immediately with this size
    auto_metadata_size: Option<u64>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve metadata for every new handle right away
    pub fn with_auto_metadata(total_length: u64) -> Self {
        Self {
            auto_metadata_size: Some(total_length),
            ..Self::default()
        }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<String, Arc<SimulatedHandle>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle(&self, id: &str) -> Option<Arc<SimulatedHandle>> {
        self.handles().get(id).cloned()
    }

    /// Advance every downloading handle by one step
    pub fn tick(&self, downloaded: u64, uploaded: u64) {
        for handle in self.handles().values() {
            handle.advance(downloaded, uploaded);
        }
    }

    fn register_id(&self, id: String, name: &str) -> Arc<dyn TransferHandle> {
        let mut handles = self.handles();
        if let Some(existing) = handles.get(&id).filter(|h| !h.is_closed()) {
            return existing.clone();
        }

        let handle = SimulatedHandle::new(id.clone());
        if let Some(size) = self.auto_metadata_size {
            handle.resolve_metadata(name, size, Vec::new());
        }
        handles.insert(id, handle.clone());
        handle
    }
}

impl TransferEngine for SimulatedEngine {
    fn add_from_magnet(&self, reference: &str) -> Result<Arc<dyn TransferHandle>, EngineError> {
        let magnet = parse_magnet(reference)?;
        let name = magnet.display_name.unwrap_or_else(|| magnet.info_hash.clone());
        Ok(self.register_id(magnet.info_hash, &name))
    }

    fn add_from_file(&self, path: &Path) -> Result<Arc<dyn TransferHandle>, EngineError> {
        let content = std::fs::read(path).map_err(|e| EngineError::Io(e.to_string()))?;
        if content.is_empty() {
            return Err(EngineError::InvalidReference(format!(
                "{} is empty",
                path.display()
            )));
        }

        let id = hex::encode(Sha1::digest(&content));
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| id.clone());
        Ok(self.register_id(id, &name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Magnet {
    info_hash: String,
    display_name: Option<String>,
}

fn parse_magnet(reference: &str) -> Result<Magnet, EngineError> {
    let invalid = || EngineError::InvalidReference(reference.to_string());
    let url = url::Url::parse(reference.trim()).map_err(|_| invalid())?;
    if url.scheme() != "magnet" {
        return Err(invalid());
    }

    let mut info_hash = None;
    let mut display_name = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "xt" => {
                info_hash = value.strip_prefix("urn:btih:").map(str::to_ascii_lowercase);
            }
            "dn" => display_name = Some(value.into_owned()),
            _ => {}
        }
    }

    let info_hash = info_hash.ok_or_else(invalid)?;
    let valid_hex = info_hash.len() == 40 && info_hash.chars().all(|c| c.is_ascii_hexdigit());
    let valid_base32 = info_hash.len() == 32
        && info_hash
            .chars()
            .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c));
    if !valid_hex && !valid_base32 {
        return Err(invalid());
    }

    Ok(Magnet {
        info_hash,
        display_name,
    })
}
