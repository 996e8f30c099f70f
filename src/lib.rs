//! Load-order management for Baldur's Gate 3 mods.
//!
//! Mods are imported from folders holding an `info.json` manifest and a `.pak`
//! archive, staged into a managed store, ordered, and written into the game's
//! `modsettings.lsx`.

pub mod backup;
pub mod bg3;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod library;
pub mod logging;
pub mod lsx;
pub mod manager;
pub mod manifest;
pub mod modsettings;
pub mod order;
pub mod staging;

pub use config::AppConfig;
pub use error::{ModError, ModResult};
pub use library::{Library, MemoryStore, ModRecord, RecordStore};
pub use manager::{ImportReport, ManagerSettings, ModManager, SyncReport};
pub use staging::{StagingPolicy, StagingProgress};
