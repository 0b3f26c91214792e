//! Visual similarity backend
//!
//! Frame comparison, stability detection and change analysis against the
//! gRPC visual service. The orchestrator only talks to [`VisualBackend`];
//! [`VisualClient`] is the tonic implementation.

pub mod client;
pub mod proto;

use async_trait::async_trait;
use selfheal_common::Result;
use serde::{Deserialize, Serialize};

pub use client::VisualClient;

/// A frame given either inline or by storage reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRef {
    Data(Vec<u8>),
    Uri(String),
}

impl FrameRef {
    pub fn uri(uri: impl Into<String>) -> Self {
        FrameRef::Uri(uri.into())
    }

    /// Split into the (bytes, uri) pair used on the wire
    pub(crate) fn into_parts(self) -> (Vec<u8>, String) {
        match self {
            FrameRef::Data(data) => (data, String::new()),
            FrameRef::Uri(uri) => (Vec::new(), uri),
        }
    }
}

/// Bounding box in screenshot pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn intersects(&self, other: &Region) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

impl From<proto::Region> for Region {
    fn from(r: proto::Region) -> Self {
        Self {
            x: r.x,
            y: r.y,
            width: r.width,
            height: r.height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedRegion {
    pub region: Region,
    pub change_type: String,
    pub significance: f32,
    pub description: String,
}

/// Result of comparing two frames
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompareResult {
    pub similarity_score: f32,
    pub semantic_match: bool,
    pub confidence: f32,
    pub analysis: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_regions: Vec<ChangedRegion>,
}

impl CompareResult {
    /// Most significant changed region, preferring ones overlapping `near`
    pub fn most_significant_region(&self, near: Option<&Region>) -> Option<&ChangedRegion> {
        let by_significance = |a: &&ChangedRegion, b: &&ChangedRegion| {
            a.significance.total_cmp(&b.significance)
        };

        if let Some(near) = near {
            let overlapping = self
                .changed_regions
                .iter()
                .filter(|c| c.region.intersects(near))
                .max_by(by_significance);
            if overlapping.is_some() {
                return overlapping;
            }
        }
        self.changed_regions.iter().max_by(by_significance)
    }
}

impl From<proto::CompareFramesResponse> for CompareResult {
    fn from(resp: proto::CompareFramesResponse) -> Self {
        Self {
            similarity_score: resp.similarity_score,
            semantic_match: resp.semantic_match,
            confidence: resp.confidence,
            analysis: resp.analysis,
            changed_regions: resp
                .changed_regions
                .into_iter()
                .map(|c| ChangedRegion {
                    region: c.region.map(Region::from).unwrap_or_default(),
                    change_type: c.change_type,
                    significance: c.significance,
                    description: c.description,
                })
                .collect(),
        }
    }
}

/// Multi-frame stability verdict
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilityResult {
    pub is_stable: bool,
    /// First frame after which the UI stopped changing; `None` when unstable
    pub stable_frame_index: Option<usize>,
    pub stability_score: f32,
    pub analysis: String,
}

impl From<proto::DetectStabilityResponse> for StabilityResult {
    fn from(resp: proto::DetectStabilityResponse) -> Self {
        let stable_frame_index = if resp.is_stable {
            usize::try_from(resp.stable_frame_index).ok()
        } else {
            None
        };
        Self {
            is_stable: resp.is_stable,
            stable_frame_index,
            stability_score: resp.stability_score,
            analysis: resp.analysis,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    /// Little-endian f32 values
    pub embedding: Vec<u8>,
    pub embedding_dim: usize,
    pub model_version: String,
}

impl EmbeddingResult {
    pub fn values(&self) -> Vec<f32> {
        self.embedding
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}

/// One pair in a batch comparison
#[derive(Debug, Clone, PartialEq)]
pub struct FramePair {
    pub pair_id: String,
    pub baseline: FrameRef,
    pub actual: FrameRef,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairCompareResult {
    pub pair_id: String,
    pub result: CompareResult,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchCompareResult {
    pub results: Vec<PairCompareResult>,
    pub average_similarity: f32,
    pub matches: usize,
    pub mismatches: usize,
}

impl BatchCompareResult {
    /// Aggregate counts computed from per-pair results
    pub fn from_pairs(results: Vec<PairCompareResult>) -> Self {
        let matches = results.iter().filter(|r| r.result.semantic_match).count();
        let average_similarity = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.result.similarity_score).sum::<f32>() / results.len() as f32
        };
        Self {
            mismatches: results.len() - matches,
            matches,
            average_similarity,
            results,
        }
    }
}

/// Whether a before/after change matched the performed action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeAnalysis {
    pub description: String,
    pub changes: Vec<String>,
    pub expected_change: bool,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub model_loaded: String,
    pub device: String,
    pub memory_used_mb: i64,
    pub memory_total_mb: i64,
    pub avg_inference_ms: f32,
}

impl From<proto::HealthCheckResponse> for HealthStatus {
    fn from(resp: proto::HealthCheckResponse) -> Self {
        Self {
            healthy: resp.healthy,
            model_loaded: resp.model_loaded,
            device: resp.device,
            memory_used_mb: resp.memory_used_mb,
            memory_total_mb: resp.memory_total_mb,
            avg_inference_ms: resp.avg_inference_ms,
        }
    }
}

/// Visual-similarity backend.
///
/// Every call is a single round trip; connection failures surface as
/// `Error::ServiceUnavailable`.
#[async_trait]
pub trait VisualBackend: Send + Sync {
    /// Compare two frames; `threshold` overrides the configured similarity threshold
    async fn compare(
        &self,
        baseline: FrameRef,
        actual: FrameRef,
        context: &str,
        threshold: Option<f32>,
    ) -> Result<CompareResult>;

    async fn detect_stability(&self, frames: Vec<FrameRef>) -> Result<StabilityResult>;

    async fn generate_embedding(&self, image: FrameRef, normalize: bool) -> Result<EmbeddingResult>;

    async fn analyze_change(
        &self,
        before: FrameRef,
        after: FrameRef,
        action: &str,
    ) -> Result<ChangeAnalysis>;

    async fn health_check(&self) -> Result<HealthStatus>;

    /// Compare many pairs. The default runs them one by one through [`compare`](Self::compare).
    async fn batch_compare(&self, pairs: Vec<FramePair>) -> Result<BatchCompareResult> {
        let mut results = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let result = self
                .compare(pair.baseline, pair.actual, &pair.context, None)
                .await?;
            results.push(PairCompareResult {
                pair_id: pair.pair_id,
                result,
            });
        }
        Ok(BatchCompareResult::from_pairs(results))
    }
}

/// Input for locating an element visually
#[derive(Debug, Clone, PartialEq)]
pub struct VisualHealingRequest {
    pub current: FrameRef,
    pub baseline: FrameRef,
    /// Where the element used to be, if known
    pub expected_region: Option<Region>,
    pub context: String,
}

/// What the caller should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualAction {
    /// Page matches the baseline; the element was probably not ready yet
    WaitForElement,
    /// Element moved to `region`
    RelocateElement,
    /// Page changed but no region could be attributed; repair the selector
    RepairSelector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualHealingResponse {
    pub relocated: bool,
    pub region: Option<Region>,
    pub similarity: f32,
    pub action: VisualAction,
    pub analysis: String,
    /// Number of regions the backend reported as changed
    pub changed_regions: usize,
}

/// Compare current and baseline frames and decide where the element went
pub async fn locate(
    backend: &dyn VisualBackend,
    request: VisualHealingRequest,
) -> Result<VisualHealingResponse> {
    let compared = backend
        .compare(request.baseline, request.current, &request.context, None)
        .await?;
    let changed_regions = compared.changed_regions.len();

    let response = if compared.semantic_match {
        VisualHealingResponse {
            relocated: false,
            region: request.expected_region,
            similarity: compared.similarity_score,
            action: VisualAction::WaitForElement,
            analysis: compared.analysis,
            changed_regions,
        }
    } else {
        match compared
            .most_significant_region(request.expected_region.as_ref())
            .map(|c| c.region)
        {
            Some(region) => VisualHealingResponse {
                relocated: true,
                region: Some(region),
                similarity: compared.similarity_score,
                action: VisualAction::RelocateElement,
                analysis: compared.analysis,
                changed_regions,
            },
            None => VisualHealingResponse {
                relocated: false,
                region: None,
                similarity: compared.similarity_score,
                action: VisualAction::RepairSelector,
                analysis: compared.analysis,
                changed_regions,
            },
        }
    };
    Ok(response)
}
