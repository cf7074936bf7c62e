// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Headless - Console frontend
//
// Drives the session core against the simulated engine and logs the status
// bar the way a desktop frontend would render it.

use clap::Parser;
use reed_torrent_core::{
    AppError, SessionBridge, SessionEvent, SettingsStore, SimulatedEngine, TransferSource,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "reed-torrent-headless")]
#[command(about = "Download torrents from the console")]
struct Args {
    /// Magnet links or paths to torrent files
    #[arg(required = true)]
    sources: Vec<String>,
    /// Settings file to use instead of the per-user one
    #[arg(short, long)]
    settings: Option<PathBuf>,
    /// Simulated download rate in bytes per second
    #[arg(long, default_value = "1048576")]
    sim_rate: u64,
    /// Size reported for every simulated torrent, in bytes
    #[arg(long, default_value = "16777216")]
    sim_size: u64,
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reed_torrent_headless=info".parse().unwrap())
                .add_directive("reed_torrent_core=info".parse().unwrap()),
        )
        .init();

    tracing::info!("Starting Reed Torrent v{}", env!("CARGO_PKG_VERSION"));

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), AppError> {
    let store = match args.settings {
        Some(path) => SettingsStore::at_path(path)?,
        None => SettingsStore::new()?,
    };
    let settings = store.get();
    settings.validate()?;
    let config = settings.session_config();
    let interval = config.refresh_interval;

    let engine = Arc::new(SimulatedEngine::with_auto_metadata(args.sim_size));
    let bridge = SessionBridge::new(engine.clone(), config)?;
    let events = bridge.event_receiver();
    let snapshots = bridge.snapshots();

    let sources = args.sources.iter().map(|s| TransferSource::parse(s)).collect();
    let mut expected: usize = 0;
    for result in bridge.add_batch_blocking(sources)? {
        match result {
            Ok(id) => {
                tracing::info!("Queued {}", id);
                expected += 1;
            }
            Err(e) => tracing::error!("{}", e),
        }
    }

    let per_tick = (args.sim_rate as f64 * interval.as_secs_f64()) as u64;
    while expected > 0 {
        engine.tick(per_tick, per_tick / 4);
        std::thread::sleep(interval);

        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::Added { name, .. } => tracing::info!("Downloading {}", name),
                SessionEvent::AddFailed { reason, .. } => {
                    tracing::warn!("{}", reason);
                    expected = expected.saturating_sub(1);
                }
                SessionEvent::Completed { name, .. } => {
                    if settings.notifications_enabled {
                        tracing::info!("Download Complete: {}", name);
                    }
                }
                SessionEvent::Removed { .. } => expected = expected.saturating_sub(1),
            }
        }

        let snapshot = snapshots.borrow().clone();
        for entry in &snapshot.entries {
            tracing::debug!("{}: {} ETA {}", entry.name, entry.status_label(), entry.eta);
        }
        tracing::info!("{}", snapshot.stats.status_line());

        if expected > 0 && snapshot.stats.completed >= expected {
            break;
        }
    }

    bridge.shutdown_blocking();
    Ok(())
}
