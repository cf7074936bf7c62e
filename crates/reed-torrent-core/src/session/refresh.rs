// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Refresh loop
//
// Once per tick: purge broken entries, sample every handle against one
// timestamp, reclassify, publish a snapshot, then emit completion events.
// A failure on one entry never stops the cycle for the others.

use super::entry::{file_progress, progress_of, TrackedTransfer, TransferStatus};
use super::status::{classify, StatusInput};
use super::table::{collect_live, SessionTable};
use super::{SessionEvent, SessionSnapshot};
use crate::types::AppError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// tokio's interval panics on a zero period
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Recomputes every session entry on a fixed cadence
#[derive(Clone)]
pub struct RefreshLoop {
    table: Arc<SessionTable>,
    events: broadcast::Sender<SessionEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
    interval: Duration,
    eta_min_rate_bps: u64,
}

impl RefreshLoop {
    pub fn new(
        table: Arc<SessionTable>,
        events: broadcast::Sender<SessionEvent>,
        snapshots: watch::Sender<SessionSnapshot>,
        interval: Duration,
        eta_min_rate_bps: u64,
    ) -> Self {
        let interval = if interval.is_zero() {
            tracing::warn!("Refresh interval of zero, using {:?}", MIN_INTERVAL);
            MIN_INTERVAL
        } else {
            interval
        };

        Self {
            table,
            events,
            snapshots,
            interval,
            eta_min_rate_bps,
        }
    }

    /// Run one refresh cycle with `now` as the sampling instant for every entry
    pub fn run_cycle(&self, now: DateTime<Utc>) -> SessionSnapshot {
        self.table.purge_invalid();

        let (entries, completed) = self.table.with_transfers_mut(|transfers| {
            let mut completed = Vec::new();
            for transfer in transfers.values_mut() {
                match refresh_transfer(transfer, now, self.eta_min_rate_bps) {
                    Ok(Some(event)) => completed.push(event),
                    Ok(None) => {}
                    Err(AppError::InvalidHandle(id)) => {
                        tracing::warn!("Torrent {} lost its handle, scheduling purge", id);
                        transfer.mark_invalid();
                    }
                    Err(e) => tracing::warn!("{}", e),
                }
            }
            (collect_live(transfers), completed)
        });

        let snapshot = SessionSnapshot::new(entries, now);
        tracing::debug!(
            "Refreshed {} torrents: {} active, {} complete",
            snapshot.entries.len(),
            snapshot.stats.active,
            snapshot.stats.completed
        );
        self.snapshots.send_replace(snapshot.clone());

        for event in completed {
            if let SessionEvent::Completed { id, name } = &event {
                tracing::info!("Download complete: {} ({})", name, id);
            }
            // no subscribers is fine
            let _ = self.events.send(event);
        }

        snapshot
    }

    /// Start the loop on the current tokio runtime
    pub fn spawn(self) -> RefreshLoopHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        RefreshLoopHandle { stop_tx, task }
    }

    async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Refresh loop started ({:?} period)", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle(Utc::now());
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Refresh loop stopped");
    }
}

/// Handle to a running refresh loop
pub struct RefreshLoopHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshLoopHandle {
    /// Signal the loop and wait for it to finish its current cycle
    pub async fn stop(self) {
        self.stop_tx.send_replace(true);
        if let Err(e) = self.task.await {
            tracing::error!("Refresh loop task failed: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Sample one handle and fold the result into its entry.
///
/// All reads happen before any field is written, so a failed read leaves
/// the entry at its last known state.
fn refresh_transfer(
    transfer: &mut TrackedTransfer,
    now: DateTime<Utc>,
    eta_min_rate_bps: u64,
) -> Result<Option<SessionEvent>, AppError> {
    let id = transfer.entry.id.clone();
    let handle = transfer.handle.clone();
    if handle.is_closed() {
        return Err(AppError::InvalidHandle(id));
    }

    if !handle.metadata_ready() {
        transfer.reset_rates();
        transfer.entry.status = TransferStatus::Discovering;
        transfer.entry.eta.clear();
        transfer.entry.last_sampled_at = now;
        return Ok(None);
    }

    let read_error = |e| AppError::from_handle(&id, e);
    let downloaded = handle.bytes_completed().map_err(read_error)?;
    let uploaded = handle.bytes_uploaded().map_err(read_error)?;
    let files = handle.file_list().map_err(read_error)?;
    let total_size = match transfer.entry.total_size {
        0 => handle.total_length().map_err(read_error)?,
        known => known,
    };

    let entry = &mut transfer.entry;
    entry.total_size = total_size;
    entry.downloaded_bytes = downloaded;
    entry.progress = progress_of(downloaded, total_size);
    entry.peers = handle.peer_connection_count();
    entry.seeds = handle.seed_count();
    entry.files = file_progress(&entry.name, total_size, &files, entry.progress);

    if !entry.is_paused {
        entry.download_rate = transfer.download.sample(downloaded, now);
        entry.upload_rate = transfer.upload.sample(uploaded, now);
    }

    let classification = classify(
        &StatusInput {
            metadata_ready: true,
            is_paused: entry.is_paused,
            progress: entry.progress,
            remaining_bytes: total_size.saturating_sub(downloaded),
            download_rate: entry.download_rate,
            is_seeding: handle.is_seeding(),
        },
        eta_min_rate_bps,
    );
    if classification.forces_zero_rates() {
        entry.download_rate = 0;
        entry.upload_rate = 0;
    }
    entry.status = classification.status;
    entry.eta = classification.eta;
    entry.last_sampled_at = now;

    if entry.progress < 1.0 {
        transfer.completion_reported = false;
    } else if entry.status.is_complete() && !transfer.completion_reported {
        transfer.completion_reported = true;
        return Ok(Some(SessionEvent::Completed {
            id,
            name: entry.name.clone(),
        }));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FileEntry;
    use crate::session::entry::SessionEntry;
    use crate::session::status::ETA_UNKNOWN;
    use crate::simulation::SimulatedHandle;
    use chrono::TimeDelta;
    use proptest::prelude::*;

    const TOTAL: u64 = 1_000_000;

    struct Fixture {
        table: Arc<SessionTable>,
        refresh: RefreshLoop,
        events: broadcast::Receiver<SessionEvent>,
        snapshots: watch::Receiver<SessionSnapshot>,
    }

    fn fixture() -> Fixture {
        let table = Arc::new(SessionTable::new());
        let (events_tx, events) = broadcast::channel(64);
        let (snapshots_tx, snapshots) = watch::channel(SessionSnapshot::empty());
        let refresh = RefreshLoop::new(
            table.clone(),
            events_tx,
            snapshots_tx,
            Duration::from_millis(10),
            1024,
        );
        Fixture {
            table,
            refresh,
            events,
            snapshots,
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn track(table: &SessionTable, id: &str) -> Arc<SimulatedHandle> {
        let handle = SimulatedHandle::with_metadata(id, id, TOTAL);
        let entry = SessionEntry::from_handle(handle.as_ref(), t(0)).unwrap();
        table
            .add(TrackedTransfer::new(handle.clone(), entry))
            .unwrap();
        handle
    }

    fn completions(events: &mut broadcast::Receiver<SessionEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::Completed { .. }) {
                count += 1;
            }
        }
        count
    }

    #[test]
    fn test_rate_progress_and_eta_scenario() {
        let fx = fixture();
        let handle = track(&fx.table, "aa");

        fx.refresh.run_cycle(t(0));
        handle.set_bytes_completed(100_000);
        let snapshot = fx.refresh.run_cycle(t(1));

        let entry = snapshot.get("aa").unwrap();
        assert_eq!(entry.download_rate, 100_000);
        assert_eq!(entry.progress, 0.1);
        assert_eq!(entry.status, TransferStatus::Downloading);
        assert_eq!(entry.eta, "9 sec");
        assert_eq!(entry.status_label(), "Downloading (10.0%)");
    }

    #[test]
    fn test_first_sample_has_zero_rate() {
        let fx = fixture();
        let handle = track(&fx.table, "aa");
        handle.set_bytes_completed(500_000);

        let snapshot = fx.refresh.run_cycle(t(0));
        let entry = snapshot.get("aa").unwrap();
        assert_eq!(entry.download_rate, 0);
        assert_eq!(entry.eta, ETA_UNKNOWN);
    }

    #[test]
    fn test_completion_fires_exactly_once() {
        let mut fx = fixture();
        let handle = track(&fx.table, "aa");

        fx.refresh.run_cycle(t(0));
        handle.set_bytes_completed(TOTAL / 2);
        fx.refresh.run_cycle(t(1));
        assert_eq!(completions(&mut fx.events), 0);

        handle.set_bytes_completed(TOTAL);
        let snapshot = fx.refresh.run_cycle(t(2));
        let entry = snapshot.get("aa").unwrap();
        assert_eq!(entry.status, TransferStatus::Completed);
        assert_eq!(entry.eta, "");
        assert_eq!(completions(&mut fx.events), 1);

        for secs in 3..20 {
            fx.refresh.run_cycle(t(secs));
        }
        assert_eq!(completions(&mut fx.events), 0);
    }

    #[test]
    fn test_completion_while_paused_fires_after_resume() {
        let mut fx = fixture();
        let handle = track(&fx.table, "aa");
        fx.refresh.run_cycle(t(0));

        fx.table.update("aa", |tr| tr.entry.is_paused = true).unwrap();
        handle.set_bytes_completed(TOTAL);
        let snapshot = fx.refresh.run_cycle(t(1));
        assert_eq!(snapshot.get("aa").unwrap().status, TransferStatus::Paused);
        assert_eq!(completions(&mut fx.events), 0);

        fx.table.update("aa", |tr| tr.entry.is_paused = false).unwrap();
        fx.refresh.run_cycle(t(2));
        fx.refresh.run_cycle(t(3));
        assert_eq!(completions(&mut fx.events), 1);
    }

    #[test]
    fn test_seeding_after_completion() {
        let fx = fixture();
        let handle = track(&fx.table, "aa");
        handle.set_bytes_completed(TOTAL);
        handle.set_seeding(true);

        let snapshot = fx.refresh.run_cycle(t(0));
        assert_eq!(snapshot.get("aa").unwrap().status, TransferStatus::Seeding);
    }

    #[test]
    fn test_paused_entry_reports_no_traffic() {
        let fx = fixture();
        let handle = track(&fx.table, "aa");
        fx.refresh.run_cycle(t(0));
        handle.set_bytes_completed(200_000);
        fx.refresh.run_cycle(t(1));

        fx.table.update("aa", |tr| tr.entry.is_paused = true).unwrap();
        handle.set_bytes_completed(300_000);
        let snapshot = fx.refresh.run_cycle(t(2));

        let entry = snapshot.get("aa").unwrap();
        assert_eq!(entry.status, TransferStatus::Paused);
        assert_eq!(entry.download_rate, 0);
        assert_eq!(entry.eta, "");
        assert_eq!(entry.downloaded_bytes, 300_000);
    }

    #[test]
    fn test_sample_failure_is_isolated() {
        let fx = fixture();
        let broken = track(&fx.table, "aa");
        let healthy = track(&fx.table, "bb");
        fx.refresh.run_cycle(t(0));

        broken.fail_reads(Some("piece count mismatch"));
        broken.set_bytes_completed(50_000);
        healthy.set_bytes_completed(50_000);
        let snapshot = fx.refresh.run_cycle(t(1));

        let stale = snapshot.get("aa").unwrap();
        assert_eq!(stale.downloaded_bytes, 0);
        assert_eq!(stale.last_sampled_at, t(0));
        assert_eq!(snapshot.get("bb").unwrap().downloaded_bytes, 50_000);

        broken.fail_reads(None);
        let snapshot = fx.refresh.run_cycle(t(2));
        assert_eq!(snapshot.get("aa").unwrap().downloaded_bytes, 50_000);
    }

    #[test]
    fn test_closed_handle_is_hidden_then_purged() {
        let fx = fixture();
        let lost = track(&fx.table, "aa");
        track(&fx.table, "bb");
        fx.refresh.run_cycle(t(0));

        lost.close();
        let snapshot = fx.refresh.run_cycle(t(1));
        assert!(snapshot.get("aa").is_none());
        assert_eq!(snapshot.entries.len(), 1);
        assert!(!fx.table.contains("aa"));
    }

    #[test]
    fn test_missing_metadata_is_discovering() {
        let fx = fixture();
        let handle = SimulatedHandle::new("aa");
        let ready = SimulatedHandle::with_metadata("aa", "late", TOTAL);
        let entry = SessionEntry::from_handle(ready.as_ref(), t(0)).unwrap();
        fx.table.add(TrackedTransfer::new(handle, entry)).unwrap();

        let snapshot = fx.refresh.run_cycle(t(1));
        let entry = snapshot.get("aa").unwrap();
        assert_eq!(entry.status, TransferStatus::Discovering);
        assert_eq!(entry.download_rate, 0);
    }

    #[test]
    fn test_files_follow_engine_counts() {
        let fx = fixture();
        let handle = SimulatedHandle::new("aa");
        let mut first = FileEntry::new("set/a.bin", 600_000);
        first.bytes_completed = Some(600_000);
        handle.resolve_metadata("set", TOTAL, vec![first, FileEntry::new("set/b.bin", 400_000)]);
        let entry = SessionEntry::from_handle(handle.as_ref(), t(0)).unwrap();
        fx.table.add(TrackedTransfer::new(handle.clone(), entry)).unwrap();

        handle.set_bytes_completed(600_000);
        let snapshot = fx.refresh.run_cycle(t(1));
        let files = &snapshot.get("aa").unwrap().files;
        assert_eq!(files[0].progress, 1.0);
        assert_eq!(files[1].progress, 0.6);
    }

    #[test]
    fn test_snapshot_is_published() {
        let fx = fixture();
        track(&fx.table, "aa");
        fx.refresh.run_cycle(t(5));

        let published = fx.snapshots.borrow().clone();
        assert_eq!(published.taken_at, t(5));
        assert_eq!(published.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_loop_refreshes_and_stops() {
        let fx = fixture();
        let handle = track(&fx.table, "aa");
        handle.set_bytes_completed(TOTAL / 4);

        let mut snapshots = fx.snapshots.clone();
        let running = fx.refresh.clone().spawn();
        tokio::time::timeout(Duration::from_secs(5), snapshots.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshots.borrow().get("aa").unwrap().progress, 0.25);

        running.stop().await;
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let table = Arc::new(SessionTable::new());
        let (events_tx, _events) = broadcast::channel(8);
        let (snapshots_tx, mut snapshots) = watch::channel(SessionSnapshot::empty());
        let refresh = RefreshLoop::new(table, events_tx, snapshots_tx, Duration::ZERO, 1024);

        let running = refresh.spawn();
        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(5), snapshots.changed())
                .await
                .unwrap()
                .unwrap();
        }
        assert!(!running.is_finished());
        running.stop().await;
    }

    proptest! {
        #[test]
        fn prop_rates_non_negative_and_progress_monotonic(
            steps in prop::collection::vec((0u64..200_000, any::<bool>()), 1..40)
        ) {
            let fx = fixture();
            let handle = track(&fx.table, "aa");
            let mut bytes = 0u64;
            let mut last_progress = 0.0;

            for (i, (delta, reset)) in steps.into_iter().enumerate() {
                // occasionally the engine reports fewer bytes than before
                bytes = if reset { bytes / 2 } else { (bytes + delta).min(TOTAL) };
                handle.set_bytes_completed(bytes);
                handle.set_bytes_uploaded(bytes / 3);

                let snapshot = fx.refresh.run_cycle(t(i as i64));
                let entry = snapshot.get("aa").unwrap();
                prop_assert!(entry.progress >= 0.0 && entry.progress <= 1.0);
                if !reset {
                    prop_assert!(entry.progress >= last_progress);
                }
                last_progress = entry.progress;
                // u64 rates cannot go negative; a shrinking counter must read as zero
                if reset {
                    prop_assert_eq!(entry.download_rate, 0);
                }
            }
        }
    }
}
