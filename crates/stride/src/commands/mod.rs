//! CLI command handlers.

pub mod cache;
pub mod config;
pub mod sweep;
pub mod usage;
pub mod versions;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use stride_cache::SyncRuntime;
use stride_config::LoadedConfig;
use stride_store::SqliteStore;
use stride_sync::{EngineSettings, SyncEngine};

use crate::offline::OfflineRemote;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration and where it came from.
    pub loaded: LoadedConfig,
    /// `--database` override.
    pub database: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    pub verbose: bool,
}

impl Context {
    /// The database file commands operate on.
    pub fn database_path(&self) -> Result<PathBuf> {
        self.database
            .clone()
            .or_else(|| self.loaded.config.database_path())
            .context("no database path configured and no platform data directory")
    }

    /// Open the local database and restore engine state from it.
    pub async fn open_engine(&self) -> Result<SyncEngine> {
        let path = self.database_path()?;
        let store = SqliteStore::open(&path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        let settings = EngineSettings::from_config(&self.loaded.config);
        let engine = SyncEngine::restore(
            Arc::new(store),
            Arc::new(OfflineRemote),
            settings,
            SyncRuntime::new(),
        )
        .await?;
        Ok(engine)
    }
}

/// Human-readable byte count.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
