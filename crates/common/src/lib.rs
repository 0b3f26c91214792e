//! SelfHeal Common Library
//!
//! Shared data model and error types for the self-healing engine and its
//! callers.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// SelfHeal version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default directory for SelfHeal state
pub fn default_home() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".selfheal")
}

/// Default configuration file
pub fn default_config_path() -> std::path::PathBuf {
    default_home().join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
