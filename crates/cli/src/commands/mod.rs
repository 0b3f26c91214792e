//! CLI Commands

pub mod batch;
pub mod config;
pub mod demo;
pub mod heal;

use anyhow::Context;
use selfheal_engine::HealingConfig;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Connection overrides shared by every command that talks to the backends
#[derive(clap::Args, Debug, Default, Clone)]
pub struct BackendArgs {
    /// Repair backend API key (defaults to ANTHROPIC_API_KEY)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Repair model
    #[arg(long)]
    pub model: Option<String>,

    /// Visual backend endpoint
    #[arg(long)]
    pub visual_endpoint: Option<String>,

    /// Enable visual healing
    #[arg(long)]
    pub visual: bool,
}

impl BackendArgs {
    pub fn apply(&self, config: &mut HealingConfig) {
        if let Some(key) = &self.api_key {
            config.repair.api_key = key.clone();
        }
        if let Some(model) = &self.model {
            config.repair.model = model.clone();
        }
        if let Some(endpoint) = &self.visual_endpoint {
            config.visual.endpoint = endpoint.clone();
        }
        if self.visual {
            config.features.enable_visual_healing = true;
        }
    }
}

/// Config file (or defaults) overlaid with the environment
pub fn load_config(path: Option<&Path>) -> anyhow::Result<HealingConfig> {
    let path: PathBuf = path
        .map(Path::to_path_buf)
        .unwrap_or_else(selfheal_common::default_config_path);
    let config = HealingConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    Ok(config.apply_env())
}

/// Token cancelled on Ctrl-C
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight healing");
            child.cancel();
        }
    });
    token
}

/// Read a UTF-8 file, naming it in the error
pub fn read_file(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
