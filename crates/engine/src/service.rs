//! Healing service
//!
//! Owns the backend connections, the audit queue and the orchestrator.

use crate::audit::{AuditQueue, JsonlAuditSink, TracingAuditSink};
use crate::batch::{self, BatchOutcome};
use crate::config::HealingConfig;
use crate::metrics::{HealingMetrics, NoopMetrics};
use crate::orchestrator::Orchestrator;
use crate::repair::{RepairBackend, RepairClient};
use crate::visual::{HealthStatus, VisualBackend, VisualClient};
use selfheal_common::{Error, HealingRequest, HealingResult, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Assembles a [`HealingService`]; unset backends come from the config
pub struct ServiceBuilder {
    config: HealingConfig,
    repair: Option<Arc<dyn RepairBackend>>,
    visual: Option<Option<Arc<dyn VisualBackend>>>,
    metrics: Arc<dyn HealingMetrics>,
    audit_file: Option<PathBuf>,
}

impl ServiceBuilder {
    pub fn repair_backend(mut self, backend: Arc<dyn RepairBackend>) -> Self {
        self.repair = Some(backend);
        self
    }

    /// Use `backend` for visual calls; `None` runs without one
    pub fn visual_backend(mut self, backend: Option<Arc<dyn VisualBackend>>) -> Self {
        self.visual = Some(backend);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn HealingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Write attempt records to a JSON Lines file instead of the log
    pub fn audit_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_file = Some(path.into());
        self
    }

    /// Build the service. Must run inside a tokio runtime.
    pub async fn build(self) -> Result<HealingService> {
        self.config.validate()?;

        let (repair, remote_repair): (Arc<dyn RepairBackend>, bool) = match self.repair {
            Some(backend) => (backend, false),
            None => (Arc::new(RepairClient::new(&self.config)?), true),
        };

        let visual = match self.visual {
            Some(backend) => backend,
            None if self.config.features.enable_visual_healing => {
                match VisualClient::connect(&self.config) {
                    Ok(client) => Some(Arc::new(client) as Arc<dyn VisualBackend>),
                    Err(e) => {
                        warn!("Failed to create visual client, visual healing disabled: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        let audit = match &self.audit_file {
            Some(path) => AuditQueue::start(
                JsonlAuditSink::open(path).await?,
                self.config.audit_queue_capacity,
            ),
            None => AuditQueue::start(TracingAuditSink, self.config.audit_queue_capacity),
        };
        let audit = Arc::new(audit);

        let config = Arc::new(self.config);
        let orchestrator = Orchestrator::new(Arc::clone(&config), repair, visual.clone())
            .with_metrics(self.metrics)
            .with_audit(Arc::clone(&audit));

        info!(
            "Healing service ready (visual healing: {})",
            orchestrator.flags().visual_healing
        );

        Ok(HealingService {
            config,
            orchestrator: Arc::new(orchestrator),
            visual,
            audit,
            remote_repair,
            shutdown: CancellationToken::new(),
        })
    }
}

/// Entry point for healing failed tests
pub struct HealingService {
    config: Arc<HealingConfig>,
    orchestrator: Arc<Orchestrator>,
    visual: Option<Arc<dyn VisualBackend>>,
    audit: Arc<AuditQueue>,
    remote_repair: bool,
    shutdown: CancellationToken,
}

impl HealingService {
    pub fn builder(config: HealingConfig) -> ServiceBuilder {
        ServiceBuilder {
            config,
            repair: None,
            visual: None,
            metrics: Arc::new(NoopMetrics),
            audit_file: None,
        }
    }

    /// Service with the HTTP repair client and, when enabled, the gRPC
    /// visual client. A visual client that cannot be created only disables
    /// visual healing.
    pub async fn new(config: HealingConfig) -> Result<Self> {
        Self::builder(config).build().await
    }

    pub fn config(&self) -> &HealingConfig {
        &self.config
    }

    pub fn visual_enabled(&self) -> bool {
        self.orchestrator.flags().visual_healing
    }

    pub async fn heal(&self, request: &HealingRequest) -> Result<HealingResult> {
        self.orchestrator.heal(request, &self.shutdown).await
    }

    /// Heal, aborting promptly once `cancel` fires
    pub async fn heal_with_cancel(
        &self,
        request: &HealingRequest,
        cancel: &CancellationToken,
    ) -> Result<HealingResult> {
        let token = link(&self.shutdown, cancel);
        let _guard = token.clone().drop_guard();
        self.orchestrator.heal(request, &token).await
    }

    pub async fn batch_heal(&self, requests: Vec<HealingRequest>) -> BatchOutcome {
        self.batch_heal_with_cancel(requests, &CancellationToken::new())
            .await
    }

    pub async fn batch_heal_with_cancel(
        &self,
        requests: Vec<HealingRequest>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let token = link(&self.shutdown, cancel);
        let _guard = token.clone().drop_guard();
        batch::heal_all(
            Arc::clone(&self.orchestrator),
            requests,
            self.config.max_concurrency,
            &token,
        )
        .await
    }

    /// Fails when the visual backend (if enabled) is unreachable or the
    /// repair backend has no credentials.
    pub async fn health_check(&self) -> Result<Option<HealthStatus>> {
        let mut visual_status = None;
        if self.config.features.enable_visual_healing {
            if let Some(visual) = &self.visual {
                let status = visual.health_check().await.map_err(|e| {
                    Error::ServiceUnavailable(format!("visual backend health check failed: {}", e))
                })?;
                if !status.healthy {
                    return Err(Error::ServiceUnavailable(
                        "visual backend reports unhealthy".into(),
                    ));
                }
                visual_status = Some(status);
            }
        }

        if self.remote_repair && !self.config.has_repair_credentials() {
            return Err(Error::InvalidConfig(
                "repair backend API key not configured".into(),
            ));
        }

        Ok(visual_status)
    }

    /// Attempt records dropped by a full audit queue
    pub fn audit_dropped(&self) -> u64 {
        self.audit.dropped()
    }

    /// Cancel in-flight heals, drain the audit queue and release both
    /// backend connections.
    pub async fn close(self) {
        self.shutdown.cancel();
        self.audit.shutdown().await;
        drop(self.orchestrator);
        drop(self.visual);
        info!("Healing service closed");
    }
}

/// Token cancelled by either `a` or `b`. Cancel it when done to stop the
/// watcher task.
fn link(a: &CancellationToken, b: &CancellationToken) -> CancellationToken {
    let token = a.child_token();
    let linked = token.clone();
    let b = b.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = b.cancelled() => linked.cancel(),
            _ = linked.cancelled() => {}
        }
    });
    token
}
