//! Repair orchestrator
//!
//! Runs one healing request through the state machine
//! `in_progress -> {success, failed, skipped}`: classify, choose a strategy,
//! then invoke that strategy's handler up to `max_attempts` times.

use crate::audit::AuditQueue;
use crate::classifier;
use crate::config::HealingConfig;
use crate::context;
use crate::metrics::{HealingMetrics, NoopMetrics};
use crate::repair::{RepairBackend, SelectorRepairRequest, SelectorRepairResponse};
use crate::strategy::{self, StrategyFlags};
use crate::visual::{self, FrameRef, VisualAction, VisualBackend, VisualHealingRequest};
use chrono::Utc;
use selfheal_common::{
    Error, FailureType, HealingAttempt, HealingRequest, HealingResult, HealingStatus,
    HealingStrategy, HealingSuggestion, Result,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Floor applied to the confidence of any result that carries a healed selector
pub const MIN_REPORTED_CONFIDENCE: f64 = 0.01;

/// Executes healing strategies against the configured backends
pub struct Orchestrator {
    config: Arc<HealingConfig>,
    repair: Arc<dyn RepairBackend>,
    visual: Option<Arc<dyn VisualBackend>>,
    metrics: Arc<dyn HealingMetrics>,
    audit: Option<Arc<AuditQueue>>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<HealingConfig>,
        repair: Arc<dyn RepairBackend>,
        visual: Option<Arc<dyn VisualBackend>>,
    ) -> Self {
        Self {
            config,
            repair,
            visual,
            metrics: Arc::new(NoopMetrics),
            audit: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn HealingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditQueue>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &HealingConfig {
        &self.config
    }

    /// Visual healing is on only when enabled *and* a backend is present
    pub fn flags(&self) -> StrategyFlags {
        StrategyFlags {
            visual_healing: self.config.features.enable_visual_healing && self.visual.is_some(),
        }
    }

    fn visual_backend(&self) -> Option<&dyn VisualBackend> {
        if self.config.features.enable_visual_healing {
            self.visual.as_deref()
        } else {
            None
        }
    }

    /// Failure type (classified when the request leaves it open) and strategy
    pub fn plan(&self, request: &HealingRequest) -> (FailureType, HealingStrategy) {
        let failure_type = match request.failure_type {
            Some(t) if t != FailureType::Unknown => t,
            _ => {
                let detected = classifier::classify(&request.error_message);
                debug!("Auto-detected failure type: {}", detected);
                detected
            }
        };
        (failure_type, strategy::choose(request, failure_type, self.flags()))
    }

    /// Heal one request.
    ///
    /// Backend failures never escape as errors: once the attempt budget is
    /// spent the result is `failed`. The only error returned is
    /// `Error::Cancelled` when `cancel` fires.
    pub async fn heal(
        &self,
        request: &HealingRequest,
        cancel: &CancellationToken,
    ) -> Result<HealingResult> {
        let started = Instant::now();
        let (failure_type, strategy) = self.plan(request);
        let mut result = HealingResult::begin(request, strategy);
        result.set_meta("failure_type", failure_type.as_str());

        info!(
            "Healing {} ({}): failure_type={} strategy={}",
            request.test_name, result.request_id, failure_type, strategy
        );

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error: Option<Error> = None;

        for attempt in 1..=max_attempts {
            result.attempts = attempt;
            debug!("Healing attempt {}/{}", attempt, max_attempts);

            let attempt_started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                outcome = self.dispatch(strategy, request, &mut result) => outcome,
            };
            let elapsed = attempt_started.elapsed();

            self.metrics.record_attempt(strategy, outcome.is_ok(), elapsed);
            self.audit_attempt(request, &result, attempt, elapsed, &outcome);

            match outcome {
                Ok(()) => break,
                Err(Error::Cancelled) => {
                    info!("Healing {} cancelled on attempt {}", result.request_id, attempt);
                    return Err(Error::Cancelled);
                }
                Err(e) => {
                    warn!("Healing attempt {} failed: {}", attempt, e);
                    let retryable = e.is_retryable();
                    last_error = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        if result.status == HealingStatus::InProgress {
            result.status = HealingStatus::Failed;
            result.explanation = match &last_error {
                Some(e) => format!("Healing failed after {} attempts: {}", result.attempts, e),
                None => format!("Healing failed after {} attempts", result.attempts),
            };
        }
        ensure_reportable(&mut result);
        result.duration = started.elapsed();

        info!(
            "Healing {} completed: status={} confidence={:.2} attempts={} duration={:?}",
            result.request_id, result.status, result.confidence, result.attempts, result.duration
        );
        self.metrics.record_result(&result);

        Ok(result)
    }

    /// One handler per strategy
    async fn dispatch(
        &self,
        strategy: HealingStrategy,
        request: &HealingRequest,
        result: &mut HealingResult,
    ) -> Result<()> {
        match strategy {
            HealingStrategy::SelectorRepair => self.heal_selector(request, result).await,
            HealingStrategy::VisualLocator => self.heal_visual(request, result).await,
            HealingStrategy::WaitAdjustment => self.heal_wait(request, result).await,
            HealingStrategy::Retry => {
                result.status = HealingStatus::Skipped;
                result.explanation =
                    "Retry strategy - no code changes needed, recommend re-running the test"
                        .to_string();
                result.confidence = 0.5;
                Ok(())
            }
            HealingStrategy::Skip => {
                result.status = HealingStatus::Skipped;
                result.explanation = "Test cannot be automatically healed".to_string();
                result.confidence = 0.0;
                Ok(())
            }
        }
    }

    async fn heal_selector(&self, request: &HealingRequest, result: &mut HealingResult) -> Result<()> {
        let repair_request = self.repair_request(request);
        let repaired = self.repair.repair(&repair_request).await?;
        self.apply_repair(result, &repaired);

        if !request.test_code.is_empty() {
            match self.repair.generate_fix(request, &repaired).await {
                Ok(code) => result.healed_code = Some(code),
                Err(e) => warn!("Failed to generate fixed test code: {}", e),
            }
        }

        self.validate(request, result).await;
        result.status = HealingStatus::Success;
        Ok(())
    }

    async fn heal_visual(&self, request: &HealingRequest, result: &mut HealingResult) -> Result<()> {
        let backend = self
            .visual_backend()
            .ok_or_else(|| Error::ServiceUnavailable("visual backend not configured".into()))?;

        let (Some(baseline), Some(current)) = (request.baseline(), request.screenshot()) else {
            return Err(Error::InvalidRequest(
                "visual healing needs both a screenshot and a baseline".into(),
            ));
        };

        let located = visual::locate(
            backend,
            VisualHealingRequest {
                current: FrameRef::uri(current),
                baseline: FrameRef::uri(baseline),
                expected_region: None,
                context: "healing comparison".to_string(),
            },
        )
        .await?;

        let similarity = f64::from(located.similarity);
        let is_similar = located.action == VisualAction::WaitForElement;

        result.validation_score = similarity;
        result.set_meta("visual_similarity", similarity);
        result.set_meta("is_similar", is_similar);
        if located.changed_regions > 0 {
            result.set_meta("changed_regions_count", located.changed_regions);
            result.set_meta("change_analysis", located.analysis.clone());
        }
        if let (true, Some(region)) = (located.relocated, located.region) {
            result.set_meta("relocated_region", serde_json::to_value(region)?);
        }

        if is_similar {
            result.explanation =
                "Visual comparison shows page is similar to baseline, failure may be timing-related"
                    .to_string();
            result.confidence = similarity;
            result.suggestions.push(HealingSuggestion {
                strategy: HealingStrategy::WaitAdjustment,
                description: "Consider adding explicit wait".to_string(),
                code: None,
                selector: None,
                confidence: 0.7,
                reasoning: "Page appears visually correct, element may not be ready".to_string(),
            });
            result.status = HealingStatus::Success;
            return Ok(());
        }

        if request.selector().is_none() {
            result.explanation = format!(
                "Visual difference detected ({:.2}% similarity) but no selector to repair",
                similarity * 100.0
            );
            result.confidence = 0.0;
            result.status = HealingStatus::Skipped;
            return Ok(());
        }

        let visual_context = format!(
            "Visual comparison shows {:.2}% similarity (threshold: {:.2}%). Changed regions detected: {}",
            similarity * 100.0,
            self.config.similarity_threshold * 100.0,
            located.changed_regions
        );
        let repair_request = self.repair_request(request).with_hint(visual_context.clone());
        let repaired = self.repair.repair(&repair_request).await?;
        self.apply_repair(result, &repaired);

        let scaled = (repaired.confidence * similarity).clamp(MIN_REPORTED_CONFIDENCE, 1.0);
        if scaled < self.config.min_confidence {
            result.set_meta("visual_confidence_degraded", true);
        }
        result.confidence = scaled;
        result.explanation = format!("Visual analysis: {}. {}", visual_context, repaired.explanation);
        result.status = HealingStatus::Success;
        Ok(())
    }

    async fn heal_wait(&self, request: &HealingRequest, result: &mut HealingResult) -> Result<()> {
        let analysis = match self.repair.analyze_failure(request).await {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                warn!("Failure analysis failed: {}", e);
                None
            }
        };

        result.explanation = "Timeout detected - recommend adjusting wait strategies".to_string();
        result.confidence = 0.6;

        let mut suggestions = vec![
            HealingSuggestion {
                strategy: HealingStrategy::WaitAdjustment,
                description: "Add explicit waitForSelector".to_string(),
                code: request.selector().map(|s| {
                    format!(
                        "await page.waitForSelector('{}', {{ state: 'visible', timeout: 30000 }});",
                        s
                    )
                }),
                selector: request.selector().map(str::to_string),
                confidence: 0.7,
                reasoning: "Element may take longer to appear".to_string(),
            },
            HealingSuggestion {
                strategy: HealingStrategy::WaitAdjustment,
                description: "Add waitForLoadState".to_string(),
                code: Some("await page.waitForLoadState('networkidle');".to_string()),
                selector: None,
                confidence: 0.6,
                reasoning: "Page may have ongoing network requests".to_string(),
            },
            HealingSuggestion {
                strategy: HealingStrategy::WaitAdjustment,
                description: "Increase timeout".to_string(),
                code: Some("test.setTimeout(60000);".to_string()),
                selector: None,
                confidence: 0.5,
                reasoning: "Operation may legitimately take longer".to_string(),
            },
        ];

        if let Some(analysis) = analysis {
            if analysis.is_flaky {
                suggestions.push(HealingSuggestion {
                    strategy: HealingStrategy::Retry,
                    description: "Add retry logic".to_string(),
                    code: Some("test.describe.configure({ retries: 2 });".to_string()),
                    selector: None,
                    confidence: 0.65,
                    reasoning: analysis.flakiness_reason.clone(),
                });
            }
            result.set_meta("is_flaky", analysis.is_flaky);
            result.set_meta("root_cause", analysis.root_cause);
        }

        result.suggestions = suggestions;
        result.status = HealingStatus::Success;
        Ok(())
    }

    fn repair_request(&self, request: &HealingRequest) -> SelectorRepairRequest {
        let page_html = context::extract(
            &request.page_html,
            request.selector().unwrap_or_default(),
            self.config.max_html_size,
        );
        SelectorRepairRequest::from_healing(request, page_html)
    }

    fn apply_repair(&self, result: &mut HealingResult, repaired: &SelectorRepairResponse) {
        if repaired.confidence < self.config.min_confidence {
            warn!(
                "Repair confidence {:.2} below threshold {:.2}",
                repaired.confidence, self.config.min_confidence
            );
            result.set_meta("low_confidence", true);
        }

        result.healed_selector = Some(repaired.repaired_selector.clone());
        result.explanation = repaired.explanation.clone();
        result.confidence = repaired.confidence;
        result.set_meta("change_type", repaired.change_type.as_str());
        result.set_meta("root_cause", repaired.root_cause.clone());

        if self.config.features.enable_suggestions {
            result.suggestions = repaired
                .alternative_selectors
                .iter()
                .map(|alt| HealingSuggestion {
                    strategy: HealingStrategy::SelectorRepair,
                    description: format!("Alternative {} selector", alt.locator_type),
                    code: None,
                    selector: Some(alt.selector.clone()),
                    confidence: alt.confidence,
                    reasoning: alt.reasoning.clone(),
                })
                .collect();
        }
    }

    /// Cross-check a repair visually; silently skipped without frames
    async fn validate(&self, request: &HealingRequest, result: &mut HealingResult) {
        let (Some(backend), Some(baseline), Some(current)) =
            (self.visual_backend(), request.baseline(), request.screenshot())
        else {
            return;
        };

        match backend
            .compare(FrameRef::uri(baseline), FrameRef::uri(current), "validation", None)
            .await
        {
            Ok(compared) => {
                result.validated = compared.semantic_match;
                result.validation_score = f64::from(compared.similarity_score);
            }
            Err(e) => warn!("Visual validation failed: {}", e),
        }
    }

    fn audit_attempt(
        &self,
        request: &HealingRequest,
        result: &HealingResult,
        attempt: u32,
        duration: std::time::Duration,
        outcome: &Result<()>,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        audit.record(HealingAttempt {
            id: Uuid::new_v4(),
            request_id: result.request_id,
            attempt,
            strategy: result.strategy,
            input: request
                .selector()
                .unwrap_or(&request.error_message)
                .to_string(),
            output: result
                .healed_selector
                .clone()
                .unwrap_or_else(|| result.explanation.clone()),
            success: outcome.is_ok(),
            error: outcome.as_ref().err().map(|e| e.to_string()),
            duration,
            timestamp: Utc::now(),
        });
    }
}

/// A successful repair always carries a positive confidence and an explanation
fn ensure_reportable(result: &mut HealingResult) {
    if result.status != HealingStatus::Success {
        return;
    }
    if let Some(selector) = &result.healed_selector {
        if result.explanation.trim().is_empty() {
            result.explanation = format!("Selector repaired to {}", selector);
        }
        if result.confidence <= 0.0 {
            result.confidence = MIN_REPORTED_CONFIDENCE;
            result.set_meta("confidence_floored", true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repair::FailureAnalysis;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Replays canned repair outcomes and records what it was asked
    #[derive(Default)]
    struct ScriptedRepair {
        responses: Mutex<Vec<Result<SelectorRepairResponse>>>,
        requests: Mutex<Vec<SelectorRepairRequest>>,
        flaky: bool,
    }

    impl ScriptedRepair {
        fn returning(responses: Vec<Result<SelectorRepairResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RepairBackend for ScriptedRepair {
        async fn repair(&self, request: &SelectorRepairRequest) -> Result<SelectorRepairResponse> {
            self.requests.lock().push(request.clone());
            self.responses
                .lock()
                .pop()
                .unwrap_or_else(|| Err(Error::Backend("no more responses".into())))
        }

        async fn generate_fix(
            &self,
            _request: &HealingRequest,
            repair: &SelectorRepairResponse,
        ) -> Result<String> {
            Ok(format!("await page.click(\"{}\");", repair.repaired_selector))
        }

        async fn analyze_failure(&self, _request: &HealingRequest) -> Result<FailureAnalysis> {
            if self.flaky {
                Ok(FailureAnalysis {
                    is_flaky: true,
                    flakiness_reason: "race with XHR".into(),
                    root_cause: "slow API".into(),
                    ..Default::default()
                })
            } else {
                Err(Error::Backend("analysis unavailable".into()))
            }
        }
    }

    fn repaired(selector: &str, confidence: f64) -> SelectorRepairResponse {
        SelectorRepairResponse {
            repaired_selector: selector.into(),
            alternative_selectors: Vec::new(),
            explanation: "class renamed".into(),
            confidence,
            change_type: Default::default(),
            root_cause: String::new(),
        }
    }

    fn orchestrator(repair: ScriptedRepair) -> Orchestrator {
        let mut config = HealingConfig::default();
        config.features.enable_visual_healing = false;
        Orchestrator::new(Arc::new(config), Arc::new(repair), None)
    }

    #[tokio::test]
    async fn test_low_confidence_still_succeeds() {
        let orch = orchestrator(ScriptedRepair::returning(vec![Ok(repaired("#new", 0.3))]));
        let req = HealingRequest::new("t", "element not found").with_selector("#old");

        let result = orch.heal(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, HealingStatus::Success);
        assert_eq!(result.confidence, 0.3);
        assert_eq!(result.metadata["low_confidence"], true);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_error() {
        let orch = orchestrator(ScriptedRepair::returning(vec![
            Err(Error::Backend("503".into())),
            Ok(repaired("#new", 0.9)),
        ]));
        let req = HealingRequest::new("t", "element not found").with_selector("#old");

        let result = orch.heal(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, HealingStatus::Success);
        assert_eq!(result.attempts, 2);
        assert!(result.metadata.get("low_confidence").is_none());
    }

    #[tokio::test]
    async fn test_empty_explanation_and_zero_confidence_are_filled() {
        let mut resp = repaired("[data-testid='x']", 0.0);
        resp.explanation.clear();
        let orch = orchestrator(ScriptedRepair::returning(vec![Ok(resp)]));
        let req = HealingRequest::new("t", "element not found").with_selector("#old");

        let result = orch.heal(&req, &CancellationToken::new()).await.unwrap();
        assert!(result.confidence > 0.0);
        assert!(!result.explanation.is_empty());
    }

    #[tokio::test]
    async fn test_wait_adjustment_menu() {
        let repair = ScriptedRepair {
            flaky: true,
            ..Default::default()
        };
        let orch = orchestrator(repair);
        let req = HealingRequest::new("t", "Timeout 30000ms exceeded").with_selector("#spinner");

        let result = orch.heal(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.strategy, HealingStrategy::WaitAdjustment);
        assert_eq!(result.status, HealingStatus::Success);
        assert_eq!(result.suggestions.len(), 4);
        assert_eq!(result.suggestions[3].strategy, HealingStrategy::Retry);
        assert_eq!(result.suggestions[3].reasoning, "race with XHR");
        assert!(result.suggestions[0]
            .code
            .as_deref()
            .unwrap()
            .contains("waitForSelector('#spinner'"));
    }

    #[tokio::test]
    async fn test_wait_adjustment_survives_analysis_failure() {
        let orch = orchestrator(ScriptedRepair::default());
        let req = HealingRequest::new("t", "Timeout 5000ms exceeded");

        let result = orch.heal(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, HealingStatus::Success);
        assert_eq!(result.suggestions.len(), 3);
        assert!(result.suggestions[0].code.is_none());
        assert!(result.metadata.get("is_flaky").is_none());
    }

    #[tokio::test]
    async fn test_visual_locator_without_backend_fails_fast() {
        let orch = orchestrator(ScriptedRepair::default());
        let req = HealingRequest {
            failure_type: Some(FailureType::Visual),
            ..HealingRequest::new("t", "screenshot mismatch")
        };
        // Visual healing disabled: a visual failure is skipped, not attempted.
        let result = orch.heal(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.strategy, HealingStrategy::Skip);

        let mut result = HealingResult::begin(&req, HealingStrategy::VisualLocator);
        let err = orch.heal_visual(&req, &mut result).await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let orch = orchestrator(ScriptedRepair::returning(vec![Ok(repaired("#new", 0.9))]));
        let req = HealingRequest::new("t", "element not found").with_selector("#old");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orch.heal(&req, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_ensure_reportable_ignores_non_success() {
        let mut result = HealingResult::begin(
            &HealingRequest::new("t", "e"),
            HealingStrategy::SelectorRepair,
        );
        result.status = HealingStatus::Failed;
        result.healed_selector = Some("#x".into());
        ensure_reportable(&mut result);
        assert_eq!(result.confidence, 0.0);
    }
}
