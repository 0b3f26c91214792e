//! Selector repair backend
//!
//! Wire types exchanged with the text-generation repair model, the
//! [`RepairBackend`] seam the orchestrator calls through, and the HTTP
//! implementation in [`client`].

pub mod client;
pub mod prompt;

use async_trait::async_trait;
use selfheal_common::{FailureType, HealingRequest, HealingStrategy, Result};
use serde::{Deserialize, Serialize};

pub use client::RepairClient;

/// Request sent to the repair backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorRepairRequest {
    pub failed_selector: String,
    pub error_message: String,
    /// Possibly reduced by the context extractor
    pub page_html: String,
    pub page_url: String,
    pub test_context: String,
    pub test_code: String,
    pub failed_line: u32,
    /// Extra evidence, e.g. a visual diff summary
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

impl SelectorRepairRequest {
    pub fn from_healing(request: &HealingRequest, page_html: String) -> Self {
        Self {
            failed_selector: request.selector().unwrap_or_default().to_string(),
            error_message: request.error_message.clone(),
            page_html,
            page_url: request.page_url.clone(),
            test_context: request.failed_step.clone(),
            test_code: request.test_code.clone(),
            failed_line: request.failed_line,
            hints: Vec::new(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }
}

/// Locator family of an alternative selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorType {
    Css,
    Xpath,
    Text,
    Role,
    Testid,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for LocatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LocatorType::Css => "css",
            LocatorType::Xpath => "xpath",
            LocatorType::Text => "text",
            LocatorType::Role => "role",
            LocatorType::Testid => "testid",
            LocatorType::Other => "other",
        };
        f.write_str(s)
    }
}

/// Backup selector proposed next to the primary repair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeSelector {
    pub selector: String,
    #[serde(rename = "type")]
    pub locator_type: LocatorType,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Coarse reason a selector stopped matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorChangeType {
    IdChanged,
    ClassChanged,
    StructureChanged,
    TextChanged,
    ElementRemoved,
    ElementMoved,
    #[default]
    #[serde(other)]
    Unknown,
}

impl SelectorChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorChangeType::IdChanged => "id_changed",
            SelectorChangeType::ClassChanged => "class_changed",
            SelectorChangeType::StructureChanged => "structure_changed",
            SelectorChangeType::TextChanged => "text_changed",
            SelectorChangeType::ElementRemoved => "element_removed",
            SelectorChangeType::ElementMoved => "element_moved",
            SelectorChangeType::Unknown => "unknown",
        }
    }
}

/// Structured answer of the repair backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorRepairResponse {
    pub repaired_selector: String,
    #[serde(default)]
    pub alternative_selectors: Vec<AlternativeSelector>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub change_type: SelectorChangeType,
    #[serde(default)]
    pub root_cause: String,
}

/// Flakiness signals for a failure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    #[serde(default, deserialize_with = "lenient")]
    pub failure_type: Option<FailureType>,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub is_flaky: bool,
    #[serde(default)]
    pub flakiness_reason: String,
    #[serde(default, deserialize_with = "lenient")]
    pub recommended_strategy: Option<HealingStrategy>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub additional_context: String,
}

/// `None` for a missing, empty or off-vocabulary value
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Text-generation repair backend.
///
/// Implementations make a single round trip per call and never retry; the
/// orchestrator owns the attempt budget.
#[async_trait]
pub trait RepairBackend: Send + Sync {
    /// Propose a replacement for a broken selector
    async fn repair(&self, request: &SelectorRepairRequest) -> Result<SelectorRepairResponse>;

    /// Produce the full patched test source using `repair`
    async fn generate_fix(
        &self,
        request: &HealingRequest,
        repair: &SelectorRepairResponse,
    ) -> Result<String>;

    /// Root-cause and flakiness analysis of a failure
    async fn analyze_failure(&self, request: &HealingRequest) -> Result<FailureAnalysis>;
}
