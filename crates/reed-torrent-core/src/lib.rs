// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Download session state for all frontends
//
// This crate provides:
// - AppSettings and AppError types
// - SettingsStore for persistent settings
// - The TransferEngine seam and a simulated engine
// - SessionManager, the session table and its refresh loop
// - SessionBridge for frontends without an async runtime
//
// Frontend-specific code lives in separate crates.

pub mod bridge;
pub mod engine;
pub mod format;
pub mod session;
pub mod settings;
pub mod simulation;
pub mod types;

// Re-export commonly used items
pub use bridge::{SessionBridge, SessionCommand};
pub use engine::{
    EngineError, FileEntry, HandleError, TransferEngine, TransferHandle, TransferSource,
};
pub use format::{format_eta, format_rate, format_size};
pub use session::{
    Activity, AggregateStats, FileProgress, SessionConfig, SessionEntry, SessionEvent,
    SessionManager, SessionSnapshot, TransferStatus,
};
pub use settings::SettingsStore;
pub use simulation::{SimulatedEngine, SimulatedHandle};
pub use types::{AppError, AppSettings};
