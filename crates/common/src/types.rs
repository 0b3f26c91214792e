//! Core healing types for SelfHeal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

/// Category of a test failure, derived from the error text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Selector,
    Timeout,
    Assertion,
    Navigation,
    Visual,
    Network,
    Unknown,
}

impl Default for FailureType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl FailureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::Selector => "selector",
            FailureType::Timeout => "timeout",
            FailureType::Assertion => "assertion",
            FailureType::Navigation => "navigation",
            FailureType::Visual => "visual",
            FailureType::Network => "network",
            FailureType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "selector" => Ok(Self::Selector),
            "timeout" => Ok(Self::Timeout),
            "assertion" => Ok(Self::Assertion),
            "navigation" => Ok(Self::Navigation),
            "visual" => Ok(Self::Visual),
            "network" => Ok(Self::Network),
            "unknown" => Ok(Self::Unknown),
            other => Err(crate::Error::InvalidRequest(format!(
                "unknown failure type: {}",
                other
            ))),
        }
    }
}

/// How a failure is going to be healed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingStrategy {
    SelectorRepair,
    VisualLocator,
    WaitAdjustment,
    Retry,
    Skip,
}

impl HealingStrategy {
    pub const ALL: [HealingStrategy; 5] = [
        HealingStrategy::SelectorRepair,
        HealingStrategy::VisualLocator,
        HealingStrategy::WaitAdjustment,
        HealingStrategy::Retry,
        HealingStrategy::Skip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HealingStrategy::SelectorRepair => "selector_repair",
            HealingStrategy::VisualLocator => "visual_locator",
            HealingStrategy::WaitAdjustment => "wait_adjustment",
            HealingStrategy::Retry => "retry",
            HealingStrategy::Skip => "skip",
        }
    }
}

impl std::fmt::Display for HealingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Healing lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Skipped,
}

impl Default for HealingStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl HealingStatus {
    /// Terminal states close the state machine and are the only ones a
    /// returned result may carry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HealingStatus::Success | HealingStatus::Failed | HealingStatus::Skipped
        )
    }
}

impl std::fmt::Display for HealingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealingStatus::Pending => write!(f, "pending"),
            HealingStatus::InProgress => write!(f, "in_progress"),
            HealingStatus::Success => write!(f, "success"),
            HealingStatus::Failed => write!(f, "failed"),
            HealingStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A request to heal one failed test step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealingRequest {
    #[serde(default)]
    pub test_run_id: Uuid,
    #[serde(default)]
    pub tenant_id: Uuid,
    #[serde(default)]
    pub project_id: Uuid,
    #[serde(default)]
    pub test_name: String,
    #[serde(default)]
    pub test_file: String,

    /// Left empty to have the engine classify the error text
    #[serde(default)]
    pub failure_type: Option<FailureType>,
    pub error_message: String,
    #[serde(default)]
    pub failed_step: String,
    #[serde(default)]
    pub failed_line: u32,

    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub page_html: String,
    #[serde(default)]
    pub page_url: String,
    #[serde(default)]
    pub screenshot_uri: Option<String>,
    #[serde(default)]
    pub baseline_uri: Option<String>,

    #[serde(default)]
    pub test_code: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl HealingRequest {
    pub fn new(test_name: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            error_message: error_message.into(),
            ..Default::default()
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    /// Broken locator, if one was supplied and is non-blank
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn baseline(&self) -> Option<&str> {
        self.baseline_uri.as_deref().filter(|s| !s.is_empty())
    }

    pub fn screenshot(&self) -> Option<&str> {
        self.screenshot_uri.as_deref().filter(|s| !s.is_empty())
    }
}

/// One alternative fix attached to a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingSuggestion {
    pub strategy: HealingStrategy,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Outcome of one healing request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingResult {
    pub request_id: Uuid,
    pub test_run_id: Uuid,
    pub status: HealingStatus,
    pub strategy: HealingStrategy,
    pub original_error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healed_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healed_selector: Option<String>,
    pub explanation: String,
    pub confidence: f64,
    pub validated: bool,
    #[serde(default)]
    pub validation_score: f64,
    pub attempts: u32,
    #[serde(with = "duration_ms", rename = "duration_ms")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<HealingSuggestion>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl HealingResult {
    /// Fresh in-progress result for `request`
    pub fn begin(request: &HealingRequest, strategy: HealingStrategy) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            test_run_id: request.test_run_id,
            status: HealingStatus::InProgress,
            strategy,
            original_error: request.error_message.clone(),
            healed_code: None,
            healed_selector: None,
            explanation: String::new(),
            confidence: 0.0,
            validated: false,
            validation_score: 0.0,
            attempts: 0,
            duration: Duration::ZERO,
            suggestions: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn is_healed(&self) -> bool {
        self.status == HealingStatus::Success
    }
}

/// Audit record of one strategy execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingAttempt {
    pub id: Uuid,
    pub request_id: Uuid,
    pub attempt: u32,
    pub strategy: HealingStrategy,
    pub input: String,
    pub output: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(with = "duration_ms", rename = "duration_ms")]
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counts over a run's healing results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealingSummary {
    pub total: usize,
    pub healed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub validated: usize,
    pub mean_confidence: f64,
}

impl HealingSummary {
    pub fn from_results(results: &[HealingResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Default::default()
        };

        let mut confidence_sum = 0.0;
        for result in results {
            match result.status {
                HealingStatus::Success => {
                    summary.healed += 1;
                    confidence_sum += result.confidence;
                }
                HealingStatus::Failed => summary.failed += 1,
                HealingStatus::Skipped => summary.skipped += 1,
                HealingStatus::Pending | HealingStatus::InProgress => {}
            }
            if result.validated {
                summary.validated += 1;
            }
        }

        if summary.healed > 0 {
            summary.mean_confidence = confidence_sum / summary.healed as f64;
        }
        summary
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(status: HealingStatus, confidence: f64) -> HealingResult {
        let mut r = HealingResult::begin(
            &HealingRequest::new("t", "boom"),
            HealingStrategy::SelectorRepair,
        );
        r.status = status;
        r.confidence = confidence;
        r
    }

    #[test]
    fn test_status_terminal() {
        assert!(!HealingStatus::Pending.is_terminal());
        assert!(!HealingStatus::InProgress.is_terminal());
        assert!(HealingStatus::Success.is_terminal());
        assert!(HealingStatus::Failed.is_terminal());
        assert!(HealingStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&HealingStrategy::SelectorRepair).unwrap(),
            "\"selector_repair\""
        );
        assert_eq!(
            serde_json::to_string(&HealingStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        for strategy in HealingStrategy::ALL {
            let json = serde_json::to_string(&strategy).unwrap();
            assert_eq!(json.trim_matches('"'), strategy.as_str());
        }
    }

    #[test]
    fn test_failure_type_parse() {
        assert_eq!("Timeout".parse::<FailureType>().unwrap(), FailureType::Timeout);
        assert!("flaky".parse::<FailureType>().is_err());
    }

    #[test]
    fn test_request_from_minimal_json() {
        let req: HealingRequest = serde_json::from_str(
            r#"{"test_name": "login", "error_message": "element not found", "selector": "  "}"#,
        )
        .unwrap();
        assert_eq!(req.failure_type, None);
        assert_eq!(req.selector(), None);
        assert!(req.baseline().is_none());
    }

    #[test]
    fn test_result_serializes_duration_as_millis() {
        let mut r = result_with(HealingStatus::Success, 0.9);
        r.duration = Duration::from_millis(1500);
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["duration_ms"], 1500);
        assert!(value.get("suggestions").is_none());
    }

    #[test]
    fn test_summary_counts() {
        let results = vec![
            result_with(HealingStatus::Success, 0.8),
            result_with(HealingStatus::Success, 0.6),
            result_with(HealingStatus::Failed, 0.0),
            result_with(HealingStatus::Skipped, 0.0),
        ];
        let summary = HealingSummary::from_results(&results);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.healed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert!((summary.mean_confidence - 0.7).abs() < 1e-9);
    }
}
