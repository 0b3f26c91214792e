//! End-to-end healing against in-process backends

use async_trait::async_trait;
use parking_lot::Mutex;
use selfheal_common::{
    Error, FailureType, HealingRequest, HealingStatus, HealingStrategy, HealingSummary, Result,
};
use selfheal_engine::repair::{
    FailureAnalysis, RepairBackend, SelectorRepairRequest, SelectorRepairResponse,
};
use selfheal_engine::visual::{
    ChangeAnalysis, CompareResult, EmbeddingResult, FrameRef, HealthStatus, StabilityResult,
    VisualBackend,
};
use selfheal_engine::{HealingConfig, HealingService, InMemoryMetrics};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const LOGIN_ERROR: &str = "Timeout 30000ms exceeded.\n=========================== logs ===========================\nwaiting for selector \"button.btn-primary.login-btn\"";

const LOGIN_HTML: &str = r#"<html><body>
<form id="login-form">
  <input type="email" name="email" data-testid="login-email">
  <input type="password" name="password" data-testid="login-password">
  <button type="submit" class="btn btn-primary submit-button" data-testid="login-submit">Sign in</button>
</form>
</body></html>"#;

/// Repair backend answering `<failed>-fixed` unless a fixed response is set
#[derive(Default)]
struct StubRepair {
    fixed: Option<SelectorRepairResponse>,
    fail_with: Option<fn() -> Error>,
    delays: HashMap<String, Duration>,
    calls: AtomicU32,
    requests: Mutex<Vec<SelectorRepairRequest>>,
}

impl StubRepair {
    fn answering(selector: &str, confidence: f64) -> Self {
        Self {
            fixed: Some(SelectorRepairResponse {
                repaired_selector: selector.to_string(),
                alternative_selectors: serde_json::from_str(
                    r#"[{"selector": "button:has-text('Sign in')", "type": "text", "confidence": 0.8, "reasoning": "visible label"}]"#,
                )
                .unwrap(),
                explanation: "The login button classes were renamed".to_string(),
                confidence,
                change_type: Default::default(),
                root_cause: "CSS refactor".to_string(),
            }),
            ..Default::default()
        }
    }

    fn failing(err: fn() -> Error) -> Self {
        Self {
            fail_with: Some(err),
            ..Default::default()
        }
    }
}

#[async_trait]
impl RepairBackend for StubRepair {
    async fn repair(&self, request: &SelectorRepairRequest) -> Result<SelectorRepairResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        if let Some(delay) = self.delays.get(&request.failed_selector) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(err) = self.fail_with {
            return Err(err());
        }
        Ok(self.fixed.clone().unwrap_or_else(|| SelectorRepairResponse {
            repaired_selector: format!("{}-fixed", request.failed_selector),
            alternative_selectors: Vec::new(),
            explanation: "renamed".to_string(),
            confidence: 0.9,
            change_type: Default::default(),
            root_cause: String::new(),
        }))
    }

    async fn generate_fix(
        &self,
        _request: &HealingRequest,
        repair: &SelectorRepairResponse,
    ) -> Result<String> {
        Ok(format!("await page.click(\"{}\");", repair.repaired_selector))
    }

    async fn analyze_failure(&self, _request: &HealingRequest) -> Result<FailureAnalysis> {
        Ok(FailureAnalysis::default())
    }
}

/// Visual backend returning one canned comparison
struct StubVisual {
    compare: Result<CompareResult>,
    healthy: bool,
    calls: AtomicU32,
}

impl StubVisual {
    fn comparing(similarity: f32, semantic_match: bool) -> Self {
        Self {
            compare: Ok(CompareResult {
                similarity_score: similarity,
                semantic_match,
                confidence: 0.9,
                analysis: "header moved".to_string(),
                changed_regions: Vec::new(),
            }),
            healthy: true,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl VisualBackend for StubVisual {
    async fn compare(
        &self,
        _baseline: FrameRef,
        _actual: FrameRef,
        _context: &str,
        _threshold: Option<f32>,
    ) -> Result<CompareResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.compare {
            Ok(result) => Ok(result.clone()),
            Err(_) => Err(Error::ServiceUnavailable("visual backend down".into())),
        }
    }

    async fn detect_stability(&self, _frames: Vec<FrameRef>) -> Result<StabilityResult> {
        Ok(StabilityResult::default())
    }

    async fn generate_embedding(&self, _image: FrameRef, _normalize: bool) -> Result<EmbeddingResult> {
        Ok(EmbeddingResult::default())
    }

    async fn analyze_change(
        &self,
        _before: FrameRef,
        _after: FrameRef,
        _action: &str,
    ) -> Result<ChangeAnalysis> {
        Ok(ChangeAnalysis::default())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        Ok(HealthStatus {
            healthy: self.healthy,
            model_loaded: "vjepa2-vitl".to_string(),
            device: "cpu".to_string(),
            ..Default::default()
        })
    }
}

fn config_without_visual() -> HealingConfig {
    let mut config = HealingConfig::default();
    config.features.enable_visual_healing = false;
    config
}

async fn service(config: HealingConfig, repair: Arc<StubRepair>) -> HealingService {
    HealingService::builder(config)
        .repair_backend(repair)
        .visual_backend(None)
        .build()
        .await
        .unwrap()
}

async fn visual_service(repair: Arc<StubRepair>, visual: Arc<StubVisual>) -> HealingService {
    HealingService::builder(HealingConfig::default())
        .repair_backend(repair)
        .visual_backend(Some(visual as Arc<dyn VisualBackend>))
        .build()
        .await
        .unwrap()
}

fn frames(request: HealingRequest) -> HealingRequest {
    HealingRequest {
        screenshot_uri: Some("s3://frames/run-1/step-4.png".to_string()),
        baseline_uri: Some("s3://baselines/login/step-4.png".to_string()),
        ..request
    }
}

#[tokio::test]
async fn login_selector_is_repaired() {
    let repair = Arc::new(StubRepair::answering("[data-testid='login-submit']", 0.9));
    let svc = service(config_without_visual(), Arc::clone(&repair)).await;

    let request = HealingRequest {
        page_html: LOGIN_HTML.to_string(),
        page_url: "https://app.example.com/login".to_string(),
        test_code: "await page.click('button.btn-primary.login-btn');".to_string(),
        ..HealingRequest::new("user can log in", LOGIN_ERROR)
    }
    .with_selector("button.btn-primary.login-btn");

    let result = svc.heal(&request).await.unwrap();

    assert_eq!(result.metadata["failure_type"], "selector");
    assert_eq!(result.strategy, HealingStrategy::SelectorRepair);
    assert_eq!(result.status, HealingStatus::Success);
    assert_eq!(
        result.healed_selector.as_deref(),
        Some("[data-testid='login-submit']")
    );
    assert!(result.confidence > 0.0);
    assert!(!result.explanation.is_empty());
    assert_eq!(result.attempts, 1);
    assert_eq!(
        result.healed_code.as_deref(),
        Some("await page.click(\"[data-testid='login-submit']\");")
    );
    assert_eq!(result.suggestions.len(), 1);
    assert_eq!(result.suggestions[0].description, "Alternative text selector");
    assert!(!result.validated);

    let sent = repair.requests.lock();
    assert_eq!(sent[0].failed_selector, "button.btn-primary.login-btn");
    assert!(sent[0].page_html.contains("login-submit"));

    drop(sent);
    svc.close().await;
}

#[tokio::test]
async fn backend_errors_exhaust_attempts() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let repair = Arc::new(StubRepair::failing(|| Error::Backend("HTTP 500".into())));
    let svc = HealingService::builder(config_without_visual())
        .repair_backend(Arc::clone(&repair) as Arc<dyn RepairBackend>)
        .visual_backend(None)
        .metrics(Arc::clone(&metrics) as Arc<dyn selfheal_engine::HealingMetrics>)
        .build()
        .await
        .unwrap();

    let request = HealingRequest::new("checkout", "element not found").with_selector("#pay");
    let result = svc.heal(&request).await.unwrap();

    assert_eq!(result.status, HealingStatus::Failed);
    assert_eq!(result.attempts, 3);
    assert!(result.explanation.starts_with("Healing failed after 3 attempts"));
    assert!(result.explanation.contains("HTTP 500"));
    assert_eq!(repair.calls.load(Ordering::SeqCst), 3);

    let snap = metrics.snapshot();
    assert_eq!(snap.attempts_for(HealingStrategy::SelectorRepair), 3);
    assert_eq!(snap.results_with(HealingStatus::Failed), 1);
}

#[tokio::test]
async fn navigation_and_network_failures_are_retried_by_caller() {
    let repair = Arc::new(StubRepair::default());
    let svc = service(config_without_visual(), Arc::clone(&repair)).await;

    for message in [
        "page.goto: net::ERR_NAME_NOT_RESOLVED at https://app.example.com",
        "fetch failed: ECONNREFUSED 127.0.0.1:3000",
    ] {
        let result = svc
            .heal(&HealingRequest::new("landing", message).with_selector("#hero"))
            .await
            .unwrap();
        assert_eq!(result.status, HealingStatus::Skipped, "{}", message);
        assert_eq!(result.strategy, HealingStrategy::Retry);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.confidence, 0.5);
    }

    let forced = HealingRequest {
        failure_type: Some(FailureType::Navigation),
        ..HealingRequest::new("landing", "something odd")
    };
    let result = svc.heal(&forced).await.unwrap();
    assert_eq!(result.strategy, HealingStrategy::Retry);
    assert_eq!(repair.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unhealable_failure_is_skipped() {
    let svc = service(config_without_visual(), Arc::new(StubRepair::default())).await;
    let result = svc
        .heal(&HealingRequest::new("t", "expect(received).toBe(expected)"))
        .await
        .unwrap();
    assert_eq!(result.strategy, HealingStrategy::Skip);
    assert_eq!(result.status, HealingStatus::Skipped);
    assert_eq!(result.confidence, 0.0);
}

#[tokio::test]
async fn batch_preserves_input_order() {
    let count = 6;
    let mut repair = StubRepair::default();
    for i in 0..count {
        // Earlier items finish last.
        repair
            .delays
            .insert(format!("#item-{}", i), Duration::from_millis(20 * (count - i) as u64));
    }
    let svc = service(config_without_visual(), Arc::new(repair)).await;

    let requests: Vec<HealingRequest> = (0..count)
        .map(|i| {
            HealingRequest::new(format!("test {}", i), "element not found")
                .with_selector(format!("#item-{}", i))
        })
        .collect();

    let outcome = svc.batch_heal(requests).await;
    assert!(outcome.first_error.is_none());
    assert_eq!(outcome.results.len(), count);
    for (i, result) in outcome.results.iter().enumerate() {
        assert_eq!(
            result.healed_selector.as_deref(),
            Some(format!("#item-{}-fixed", i).as_str())
        );
    }

    let summary = HealingSummary::from_results(&outcome.results);
    assert_eq!(summary.healed, count);
}

#[tokio::test]
async fn batch_respects_concurrency_bound() {
    let mut config = config_without_visual();
    config.max_concurrency = 2;

    let mut repair = StubRepair::default();
    for i in 0..4 {
        repair
            .delays
            .insert(format!("#slow-{}", i), Duration::from_millis(100));
    }
    let svc = service(config, Arc::new(repair)).await;

    let requests = (0..4)
        .map(|i| HealingRequest::new("t", "element not found").with_selector(format!("#slow-{}", i)))
        .collect();

    let started = Instant::now();
    let outcome = svc.batch_heal(requests).await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.results.len(), 4);
    // Two waves of two.
    assert!(elapsed >= Duration::from_millis(200), "elapsed {:?}", elapsed);
}

#[tokio::test]
async fn batch_mixes_statuses_without_error() {
    let svc = service(config_without_visual(), Arc::new(StubRepair::default())).await;
    let outcome = svc
        .batch_heal(vec![
            HealingRequest::new("a", "element not found").with_selector("#a"),
            HealingRequest::new("b", "net::ERR_CONNECTION_RESET"),
            HealingRequest::new("c", "something unexpected happened"),
        ])
        .await;

    let statuses: Vec<HealingStatus> = outcome.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            HealingStatus::Success,
            HealingStatus::Skipped,
            HealingStatus::Skipped
        ]
    );
    assert!(outcome.into_result().is_ok());
}

#[tokio::test]
async fn cancellation_aborts_promptly() {
    let mut repair = StubRepair::default();
    repair.delays.insert("#hang".to_string(), Duration::from_secs(30));
    let svc = service(config_without_visual(), Arc::new(repair)).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let request = HealingRequest::new("t", "element not found").with_selector("#hang");
    let err = svc.heal_with_cancel(&request, &cancel).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn cancelled_batch_still_returns_every_item() {
    let mut repair = StubRepair::default();
    repair.delays.insert("#hang".to_string(), Duration::from_secs(30));
    let svc = service(config_without_visual(), Arc::new(repair)).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = svc
        .batch_heal_with_cancel(
            vec![
                HealingRequest::new("quick", "net::ERR_CONNECTION_RESET"),
                HealingRequest::new("slow", "element not found").with_selector("#hang"),
            ],
            &cancel,
        )
        .await;

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.results[0].status, HealingStatus::Skipped);
    assert_eq!(outcome.results[1].status, HealingStatus::Failed);
    assert_eq!(outcome.results[1].metadata["aborted"], true);
    assert!(matches!(outcome.first_error, Some(Error::Cancelled)));
}

#[tokio::test]
async fn visual_difference_scales_repair_confidence() {
    let repair = Arc::new(StubRepair::answering("[data-testid='login-submit']", 0.9));
    let visual = Arc::new(StubVisual::comparing(0.5, false));
    let svc = visual_service(Arc::clone(&repair), Arc::clone(&visual)).await;

    let request = frames(HealingRequest::new("login", LOGIN_ERROR).with_selector("button.login-btn"));
    let result = svc.heal(&request).await.unwrap();

    assert_eq!(result.strategy, HealingStrategy::VisualLocator);
    assert_eq!(result.status, HealingStatus::Success);
    assert!((result.confidence - 0.45).abs() < 1e-6);
    assert!(result.explanation.starts_with("Visual analysis: Visual comparison shows 50.00% similarity"));
    assert_eq!(result.metadata["visual_confidence_degraded"], true);
    assert_eq!(result.metadata["is_similar"], false);

    let sent = repair.requests.lock();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].hints[0].contains("threshold: 85.00%"));
}

#[tokio::test]
async fn visually_similar_page_points_at_timing() {
    let repair = Arc::new(StubRepair::default());
    let visual = Arc::new(StubVisual::comparing(0.97, true));
    let svc = visual_service(Arc::clone(&repair), visual).await;

    let request = frames(HealingRequest::new("login", "element not found").with_selector("#login"));
    let result = svc.heal(&request).await.unwrap();

    assert_eq!(result.status, HealingStatus::Success);
    assert!((result.confidence - 0.97).abs() < 1e-6);
    assert_eq!(result.healed_selector, None);
    assert_eq!(result.suggestions[0].strategy, HealingStrategy::WaitAdjustment);
    assert_eq!(repair.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unavailable_visual_backend_fails_without_retry() {
    let visual = Arc::new(StubVisual {
        compare: Err(Error::ServiceUnavailable("down".into())),
        healthy: false,
        calls: AtomicU32::new(0),
    });
    let svc = visual_service(Arc::new(StubRepair::default()), Arc::clone(&visual)).await;

    let request = frames(HealingRequest::new("login", "element not found").with_selector("#login"));
    let result = svc.heal(&request).await.unwrap();

    assert_eq!(result.status, HealingStatus::Failed);
    assert_eq!(result.attempts, 1);
    assert_eq!(visual.calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        svc.health_check().await,
        Err(Error::ServiceUnavailable(_))
    ));
}

#[tokio::test]
async fn repaired_assertion_is_validated_visually() {
    let repair = Arc::new(StubRepair::answering("[data-testid='total']", 0.85));
    let visual = Arc::new(StubVisual::comparing(0.93, true));
    let svc = visual_service(repair, Arc::clone(&visual)).await;

    let request = frames(
        HealingRequest::new("cart total", "expect(received).toHaveText(expected)")
            .with_selector(".cart-total"),
    );
    let result = svc.heal(&request).await.unwrap();

    assert_eq!(result.strategy, HealingStrategy::SelectorRepair);
    assert!(result.validated);
    assert!((result.validation_score - 0.93).abs() < 1e-6);
    assert_eq!(visual.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn healed_results_are_explainable() {
    let mut repair = StubRepair::answering("#new", 0.0);
    if let Some(fixed) = repair.fixed.as_mut() {
        fixed.explanation.clear();
    }
    let svc = service(config_without_visual(), Arc::new(repair)).await;

    let result = svc
        .heal(&HealingRequest::new("t", "element not found").with_selector("#old"))
        .await
        .unwrap();
    assert_eq!(result.status, HealingStatus::Success);
    assert!(result.confidence > 0.0);
    assert!(!result.explanation.is_empty());
}

#[tokio::test]
async fn attempts_stay_within_budget() {
    for max_attempts in 1..=4 {
        let mut config = config_without_visual();
        config.max_attempts = max_attempts;
        let svc = service(
            config,
            Arc::new(StubRepair::failing(|| Error::Timeout { seconds: 1 })),
        )
        .await;

        for message in ["element not found", "Timeout 100ms exceeded", "net::ERR_FAILED", "weird"] {
            let result = svc
                .heal(&HealingRequest::new("t", message).with_selector("#x"))
                .await
                .unwrap();
            assert!(result.status.is_terminal());
            assert!(
                (1..=max_attempts).contains(&result.attempts),
                "{} attempts for {:?} with budget {}",
                result.attempts,
                message,
                max_attempts
            );
        }
    }
}

#[tokio::test]
async fn health_check_reports_backends() {
    let svc = visual_service(
        Arc::new(StubRepair::default()),
        Arc::new(StubVisual::comparing(1.0, true)),
    )
    .await;
    let status = svc.health_check().await.unwrap().unwrap();
    assert!(status.healthy);
    assert_eq!(status.model_loaded, "vjepa2-vitl");

    // HTTP repair client without an API key.
    let svc = HealingService::new(config_without_visual()).await.unwrap();
    assert!(matches!(
        svc.health_check().await,
        Err(Error::InvalidConfig(ref m)) if m.contains("API key")
    ));
}

#[tokio::test]
async fn attempts_are_audited_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("attempts.jsonl");

    let svc = HealingService::builder(config_without_visual())
        .repair_backend(Arc::new(StubRepair::failing(|| Error::Backend("boom".into()))))
        .visual_backend(None)
        .audit_file(&path)
        .build()
        .await
        .unwrap();

    svc.heal(&HealingRequest::new("t", "element not found").with_selector("#x"))
        .await
        .unwrap();
    svc.close().await;

    let content = std::fs::read_to_string(&path).unwrap();
    let records: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2]["attempt"], 3);
    assert_eq!(records[0]["success"], false);
    assert_eq!(records[0]["strategy"], "selector_repair");
}
