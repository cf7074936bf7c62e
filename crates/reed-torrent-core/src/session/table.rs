// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Session table
//
// Every tracked transfer and every add still waiting for metadata lives
// behind one lock. The lock is never held across an await point.

use super::entry::{SessionEntry, TrackedTransfer};
use crate::engine::TransferHandle;
use crate::types::AppError;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct TableInner {
    transfers: HashMap<String, TrackedTransfer>,
    /// Adds registered with the engine whose metadata has not arrived yet
    pending: HashMap<String, Arc<dyn TransferHandle>>,
}

/// Thread-safe map from transfer id to its tracked state
#[derive(Default)]
pub struct SessionTable {
    inner: RwLock<TableInner>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, TableInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a transfer, failing if its id is already tracked
    pub fn add(&self, transfer: TrackedTransfer) -> Result<(), AppError> {
        let mut inner = self.write();
        if inner.transfers.contains_key(transfer.id()) {
            return Err(AppError::DuplicateId(transfer.id().to_string()));
        }
        inner.transfers.insert(transfer.id().to_string(), transfer);
        Ok(())
    }

    /// Remove and return a transfer
    pub fn remove(&self, id: &str) -> Result<TrackedTransfer, AppError> {
        self.remove_with(id, |_| {})
    }

    /// Run `detach` on the transfer and remove it, under one lock acquisition
    pub fn remove_with(
        &self,
        id: &str,
        detach: impl FnOnce(&TrackedTransfer),
    ) -> Result<TrackedTransfer, AppError> {
        let mut inner = self.write();
        let transfer = inner
            .transfers
            .get(id)
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;
        detach(transfer);
        inner
            .transfers
            .remove(id)
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    /// Mutate one transfer in place
    pub fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut TrackedTransfer) -> R,
    ) -> Result<R, AppError> {
        let mut inner = self.write();
        let transfer = inner
            .transfers
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;
        Ok(f(transfer))
    }

    /// Run `f` over every transfer while holding the write lock
    pub(crate) fn with_transfers_mut<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, TrackedTransfer>) -> R,
    ) -> R {
        let mut inner = self.write();
        f(&mut inner.transfers)
    }

    /// Consistent copy of every live entry, oldest first
    pub fn snapshot(&self) -> Vec<SessionEntry> {
        collect_live(&self.read().transfers)
    }

    /// Drop transfers whose handle is closed or was flagged invalid
    pub fn purge_invalid(&self) -> Vec<String> {
        let mut inner = self.write();
        let broken: Vec<String> = inner
            .transfers
            .values()
            .filter(|t| !t.is_live())
            .map(|t| t.id().to_string())
            .collect();

        for id in &broken {
            inner.transfers.remove(id);
            tracing::warn!("Purged torrent {} with an unusable handle", id);
        }
        broken
    }

    pub fn get(&self, id: &str) -> Option<SessionEntry> {
        self.read()
            .transfers
            .get(id)
            .filter(|t| t.is_live())
            .map(|t| t.entry().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().transfers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().transfers.is_empty()
    }

    /// Claim an id for an add whose metadata is still resolving
    pub fn reserve(&self, id: &str, handle: Arc<dyn TransferHandle>) -> Result<(), AppError> {
        let mut inner = self.write();
        if inner.transfers.contains_key(id) || inner.pending.contains_key(id) {
            return Err(AppError::DuplicateId(id.to_string()));
        }
        inner.pending.insert(id.to_string(), handle);
        Ok(())
    }

    /// Turn a reservation into a tracked transfer, running `activate` on it first.
    ///
    /// Returns `Ok(false)` when the reservation was released in the meantime
    /// or now belongs to a different handle (the add was cancelled, possibly
    /// re-added); nothing is inserted and `activate` never runs.
    pub fn commit_with(
        &self,
        transfer: TrackedTransfer,
        activate: impl FnOnce(&TrackedTransfer),
    ) -> Result<bool, AppError> {
        let mut inner = self.write();
        let reserved = inner
            .pending
            .get(transfer.id())
            .is_some_and(|handle| same_handle(handle, &transfer.handle));
        if !reserved {
            return Ok(false);
        }
        inner.pending.remove(transfer.id());
        if inner.transfers.contains_key(transfer.id()) {
            return Err(AppError::DuplicateId(transfer.id().to_string()));
        }
        activate(&transfer);
        inner.transfers.insert(transfer.id().to_string(), transfer);
        Ok(true)
    }

    /// Forget a reservation, handing back its handle
    pub fn release(&self, id: &str) -> Option<Arc<dyn TransferHandle>> {
        self.write().pending.remove(id)
    }

    /// Forget the reservation for `id` only if `handle` made it
    pub fn release_if(&self, id: &str, handle: &Arc<dyn TransferHandle>) -> bool {
        let mut inner = self.write();
        let owned = inner
            .pending
            .get(id)
            .is_some_and(|reserved| same_handle(reserved, handle));
        if owned {
            inner.pending.remove(id);
        }
        owned
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.read().pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.read().pending.len()
    }
}

fn same_handle(a: &Arc<dyn TransferHandle>, b: &Arc<dyn TransferHandle>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

pub(crate) fn collect_live(transfers: &HashMap<String, TrackedTransfer>) -> Vec<SessionEntry> {
    let mut entries: Vec<SessionEntry> = transfers
        .values()
        .filter(|t| t.is_live())
        .map(|t| t.entry().clone())
        .collect();
    entries.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.id.cmp(&b.id)));
    entries
}
