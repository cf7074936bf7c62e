// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Session Bridge
//
// Runs the session manager and its refresh loop on a dedicated Tokio
// runtime so synchronous frontends can drive it over channels.

use crate::engine::{TransferEngine, TransferSource};
use crate::session::{SessionConfig, SessionEvent, SessionManager, SessionSnapshot};
use crate::types::AppError;
use async_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::{broadcast, watch};

/// Commands that can be sent to the session
#[derive(Debug)]
pub enum SessionCommand {
    Add {
        source: TransferSource,
        reply: Sender<Result<String, AppError>>,
    },
    AddBatch {
        sources: Vec<TransferSource>,
        reply: Sender<Vec<Result<String, AppError>>>,
    },
    Remove {
        id: String,
        delete_data: bool,
        reply: Sender<Result<(), AppError>>,
    },
    SetPaused {
        id: String,
        paused: bool,
        reply: Sender<Result<(), AppError>>,
    },
    Snapshot {
        reply: Sender<SessionSnapshot>,
    },
}

/// Bridge between a synchronous frontend and the async session core
pub struct SessionBridge {
    command_tx: Sender<SessionCommand>,
    event_rx: Receiver<SessionEvent>,
    snapshots: watch::Receiver<SessionSnapshot>,
    done_rx: Receiver<()>,
    _runtime: Arc<Runtime>,
}

impl SessionBridge {
    pub fn new(engine: Arc<dyn TransferEngine>, config: SessionConfig) -> Result<Self, AppError> {
        let (command_tx, command_rx) = async_channel::bounded::<SessionCommand>(32);
        let (event_tx, event_rx) = async_channel::bounded::<SessionEvent>(64);
        let (done_tx, done_rx) = async_channel::bounded::<()>(1);

        let runtime = Arc::new(
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .map_err(|e| AppError::Engine(format!("Failed to create Tokio runtime: {}", e)))?,
        );

        let manager = SessionManager::new(engine, config);
        let snapshots = manager.watch_snapshots();

        runtime.spawn(async move {
            Self::run_session(manager, command_rx, event_tx).await;
            drop(done_tx);
        });

        Ok(Self {
            command_tx,
            event_rx,
            snapshots,
            done_rx,
            _runtime: runtime,
        })
    }

    async fn run_session(
        manager: SessionManager,
        command_rx: Receiver<SessionCommand>,
        event_tx: Sender<SessionEvent>,
    ) {
        let mut events = manager.subscribe();
        let refresh = manager.spawn_refresh_loop();

        loop {
            tokio::select! {
                // Handle commands from the frontend
                cmd = command_rx.recv() => {
                    match cmd {
                        Ok(cmd) => Self::handle_command(&manager, cmd).await,
                        Err(_) => break, // Channel closed
                    }
                }
                // Forward session events to the frontend
                event = events.recv() => {
                    match event {
                        Ok(event) => match event_tx.try_send(event) {
                            Ok(()) => {}
                            Err(TrySendError::Full(event)) => {
                                tracing::warn!("Event queue full, dropping {:?}", event);
                            }
                            Err(TrySendError::Closed(_)) => break,
                        },
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Session events lagged, skipped {}", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        refresh.stop().await;
        tracing::info!("Session bridge stopped");
    }

    async fn handle_command(manager: &SessionManager, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Add { source, reply } => {
                let _ = reply.send(manager.add(source)).await;
            }
            SessionCommand::AddBatch { sources, reply } => {
                let _ = reply.send(manager.add_batch(sources)).await;
            }
            SessionCommand::Remove {
                id,
                delete_data,
                reply,
            } => {
                let result = manager.remove(&id, delete_data);
                if let Err(e) = &result {
                    tracing::error!("Remove failed: {}", e);
                }
                let _ = reply.send(result).await;
            }
            SessionCommand::SetPaused { id, paused, reply } => {
                let result = manager.set_paused(&id, paused);
                if let Err(e) = &result {
                    tracing::error!("Pause toggle failed: {}", e);
                }
                let _ = reply.send(result).await;
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(manager.snapshot()).await;
            }
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Sender<T>) -> SessionCommand,
    ) -> Result<T, AppError> {
        let (reply_tx, reply_rx) = async_channel::bounded(1);
        self.command_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| AppError::BridgeClosed)?;
        reply_rx.recv().await.map_err(|_| AppError::BridgeClosed)
    }

    fn request_blocking<T>(
        &self,
        make: impl FnOnce(Sender<T>) -> SessionCommand,
    ) -> Result<T, AppError> {
        let (reply_tx, reply_rx) = async_channel::bounded(1);
        self.command_tx
            .send_blocking(make(reply_tx))
            .map_err(|_| AppError::BridgeClosed)?;
        reply_rx.recv_blocking().map_err(|_| AppError::BridgeClosed)
    }

    /// Add a transfer; the id is returned before metadata arrives
    pub async fn add(&self, source: TransferSource) -> Result<String, AppError> {
        self.request(|reply| SessionCommand::Add { source, reply })
            .await?
    }

    pub fn add_blocking(&self, source: TransferSource) -> Result<String, AppError> {
        self.request_blocking(|reply| SessionCommand::Add { source, reply })?
    }

    /// Add several transfers, one result per source
    pub async fn add_batch(
        &self,
        sources: Vec<TransferSource>,
    ) -> Result<Vec<Result<String, AppError>>, AppError> {
        self.request(|reply| SessionCommand::AddBatch { sources, reply })
            .await
    }

    pub fn add_batch_blocking(
        &self,
        sources: Vec<TransferSource>,
    ) -> Result<Vec<Result<String, AppError>>, AppError> {
        self.request_blocking(|reply| SessionCommand::AddBatch { sources, reply })
    }

    /// Remove a transfer, optionally deleting its downloaded data
    pub async fn remove(&self, id: String, delete_data: bool) -> Result<(), AppError> {
        self.request(|reply| SessionCommand::Remove {
            id,
            delete_data,
            reply,
        })
        .await?
    }

    pub fn remove_blocking(&self, id: String, delete_data: bool) -> Result<(), AppError> {
        self.request_blocking(|reply| SessionCommand::Remove {
            id,
            delete_data,
            reply,
        })?
    }

    /// Pause or resume a transfer
    pub async fn set_paused(&self, id: String, paused: bool) -> Result<(), AppError> {
        self.request(|reply| SessionCommand::SetPaused { id, paused, reply })
            .await?
    }

    pub fn set_paused_blocking(&self, id: String, paused: bool) -> Result<(), AppError> {
        self.request_blocking(|reply| SessionCommand::SetPaused { id, paused, reply })?
    }

    /// Current table contents, read through the session task
    pub async fn snapshot(&self) -> Result<SessionSnapshot, AppError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    pub fn snapshot_blocking(&self) -> Result<SessionSnapshot, AppError> {
        self.request_blocking(|reply| SessionCommand::Snapshot { reply })
    }

    /// Snapshots published by the refresh loop
    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Get event receiver for subscribing to session events
    pub fn event_receiver(&self) -> Receiver<SessionEvent> {
        self.event_rx.clone()
    }

    /// Stop accepting commands; the session task winds down on its own
    pub fn shutdown(&self) {
        self.command_tx.close();
    }

    /// Stop accepting commands and wait for the refresh loop to exit
    pub fn shutdown_blocking(&self) {
        self.shutdown();
        let _ = self.done_rx.recv_blocking();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulatedEngine;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    const HASH: &str = "c9e15763f722f23e98a29decdfae341b98d53056";

    fn bridge(engine: Arc<SimulatedEngine>) -> SessionBridge {
        let config = SessionConfig {
            download_dir: PathBuf::from("."),
            refresh_interval: Duration::from_millis(10),
            metadata_timeout: Duration::from_secs(30),
            eta_min_rate_bps: 1024,
        };
        SessionBridge::new(engine, config).unwrap()
    }

    fn source() -> TransferSource {
        TransferSource::Magnet(format!("magnet:?xt=urn:btih:{}&dn=Example", HASH))
    }

    #[test]
    fn test_add_then_snapshot() {
        let bridge = bridge(Arc::new(SimulatedEngine::with_auto_metadata(1_000)));
        let events = bridge.event_receiver();

        assert_eq!(bridge.add_blocking(source()).unwrap(), HASH);
        assert_eq!(
            events.recv_blocking().unwrap(),
            SessionEvent::Added {
                id: HASH.to_string(),
                name: "Example".to_string()
            }
        );

        let snapshot = bridge.snapshot_blocking().unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].name, "Example");
        bridge.shutdown_blocking();
    }

    #[test]
    fn test_refresh_loop_publishes_snapshots() {
        let engine = Arc::new(SimulatedEngine::with_auto_metadata(1_000));
        let bridge = bridge(engine.clone());
        let events = bridge.event_receiver();
        bridge.add_blocking(source()).unwrap();
        events.recv_blocking().unwrap();

        engine.tick(1_000, 0);
        let snapshots = bridge.snapshots();
        let deadline = Instant::now() + Duration::from_secs(5);
        while snapshots.borrow().stats.completed == 0 {
            assert!(Instant::now() < deadline, "refresh loop never caught up");
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(
            events.recv_blocking().unwrap(),
            SessionEvent::Completed {
                id: HASH.to_string(),
                name: "Example".to_string()
            }
        );
        bridge.shutdown_blocking();
    }

    #[test]
    fn test_errors_pass_through() {
        let bridge = bridge(Arc::new(SimulatedEngine::new()));
        assert_eq!(
            bridge.set_paused_blocking("missing".to_string(), true),
            Err(AppError::NotFound("missing".to_string()))
        );
        assert!(matches!(
            bridge.add_blocking(TransferSource::Magnet("bogus".to_string())),
            Err(AppError::Registration(_))
        ));
        bridge.shutdown_blocking();
    }

    #[test]
    fn test_batch_add_blocking() {
        let bridge = bridge(Arc::new(SimulatedEngine::with_auto_metadata(1_000)));
        let results = bridge
            .add_batch_blocking(vec![source(), TransferSource::Magnet("bogus".to_string())])
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        bridge.shutdown_blocking();
    }

    #[test]
    fn test_commands_after_shutdown_fail() {
        let bridge = bridge(Arc::new(SimulatedEngine::new()));
        bridge.shutdown_blocking();
        assert_eq!(bridge.add_blocking(source()), Err(AppError::BridgeClosed));
        assert_eq!(bridge.snapshot_blocking().err(), Some(AppError::BridgeClosed));
    }
}
