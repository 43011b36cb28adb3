//! Configuration system for the Stride content sync engine.
//!
//! Provides TOML-based configuration with:
//! - Per-kind cache TTLs and the in-memory front size (`[cache]`)
//! - Reconciliation watchdog and aggregate window settings (`[sync]`)
//! - Content retention, sweep interval and database location (`[storage]`)
//! - Config file layering (user config dir + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_file, load_config_with_options, save_config,
    user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
