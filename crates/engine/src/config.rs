//! Healing configuration

use selfheal_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Process-wide healing tunables, loaded once at service construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Text-generation repair backend
    pub repair: RepairBackendConfig,

    /// Visual similarity backend
    pub visual: VisualBackendConfig,

    /// Feature flags
    pub features: FeatureFlags,

    /// Attempts per request before giving up
    pub max_attempts: u32,

    /// Largest page markup sent to the repair backend, in bytes
    pub max_html_size: usize,

    /// Per-call timeout for backend requests
    pub timeout_secs: u64,

    /// Confidence below which a repair is flagged (but still returned)
    pub min_confidence: f64,

    /// Threshold passed to the visual backend for a semantic match
    pub similarity_threshold: f64,

    /// Upper bound on concurrently healing requests in a batch
    pub max_concurrency: usize,

    /// Capacity of the attempt audit queue
    pub audit_queue_capacity: usize,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            repair: RepairBackendConfig::default(),
            visual: VisualBackendConfig::default(),
            features: FeatureFlags::default(),
            max_attempts: 3,
            max_html_size: 100_000,
            timeout_secs: 60,
            min_confidence: 0.7,
            similarity_threshold: 0.85,
            max_concurrency: 8,
            audit_queue_capacity: 256,
        }
    }
}

/// Repair backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairBackendConfig {
    /// Messages endpoint
    pub endpoint: String,

    /// API key; usually supplied through `ANTHROPIC_API_KEY`
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    pub model: String,

    pub max_tokens: u32,

    pub api_version: String,
}

impl Default for RepairBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            api_key: String::new(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            api_version: "2023-06-01".to_string(),
        }
    }
}

/// Visual backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualBackendConfig {
    /// gRPC endpoint
    pub endpoint: String,

    /// Max encoded/decoded gRPC message size
    pub max_message_bytes: usize,

    /// Frame-to-frame similarity regarded as "unchanged"
    pub stability_threshold: f32,

    /// Consecutive unchanged frames required for stability
    pub min_stable_frames: u32,
}

impl Default for VisualBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:50051".to_string(),
            max_message_bytes: 50 * 1024 * 1024,
            stability_threshold: 0.98,
            min_stable_frames: 3,
        }
    }
}

/// Feature flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub enable_visual_healing: bool,

    /// Surfaced to callers; the engine itself never commits a fix
    pub enable_auto_apply: bool,

    pub enable_suggestions: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_visual_healing: true,
            enable_auto_apply: false,
            enable_suggestions: true,
        }
    }
}

impl HealingConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay credentials and endpoints from the environment
    pub fn apply_env(mut self) -> Self {
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.is_empty() {
                self.repair.api_key = key;
            }
        }
        if let Ok(endpoint) = std::env::var("SELFHEAL_VISUAL_ENDPOINT") {
            if !endpoint.is_empty() {
                self.visual.endpoint = endpoint;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.max_html_size == 0 {
            return Err(Error::InvalidConfig("max_html_size must be positive".into()));
        }
        if self.max_concurrency == 0 {
            return Err(Error::InvalidConfig("max_concurrency must be at least 1".into()));
        }
        for (name, value) in [
            ("min_confidence", self.min_confidence),
            ("similarity_threshold", self.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn has_repair_credentials(&self) -> bool {
        !self.repair.api_key.trim().is_empty()
    }
}
