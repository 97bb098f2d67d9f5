//! Configuration system for menuflow.
//!
//! Provides TOML-based configuration with:
//! - Upstream connection settings (`[upstream]`)
//! - Catalog freshness and fallback policy (`[catalog]`)
//! - Download concurrency and deadlines (`[downloads]`)
//! - Session idle deadline (`[idle]`)
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, save_config, user_config_dir,
    user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
