//! gRPC client for the visual backend

use super::proto::visual_service_client::VisualServiceClient;
use super::proto::{self, CompareSettings};
use super::{
    BatchCompareResult, ChangeAnalysis, CompareResult, EmbeddingResult, FramePair, FrameRef,
    HealthStatus, PairCompareResult, StabilityResult, VisualBackend,
};
use crate::config::HealingConfig;
use async_trait::async_trait;
use selfheal_common::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

/// Visual backend reached over gRPC
///
/// The underlying channel is multiplexed; clones share one connection and
/// are safe to use from many concurrent heals.
#[derive(Debug, Clone)]
pub struct VisualClient {
    inner: VisualServiceClient<Channel>,
    endpoint: String,
    timeout: Duration,
    similarity_threshold: f32,
    stability_threshold: f32,
    min_stable_frames: u32,
}

impl VisualClient {
    /// Build a client for the configured endpoint.
    ///
    /// The connection is established lazily on the first call, so an
    /// unreachable backend only fails once it is actually used.
    pub fn connect(config: &HealingConfig) -> Result<Self> {
        let endpoint = Endpoint::from_shared(config.visual.endpoint.clone())
            .map_err(|e| {
                Error::InvalidConfig(format!(
                    "visual endpoint {}: {}",
                    config.visual.endpoint, e
                ))
            })?
            .connect_timeout(config.timeout());

        let channel = endpoint.connect_lazy();
        let inner = VisualServiceClient::new(channel)
            .max_decoding_message_size(config.visual.max_message_bytes)
            .max_encoding_message_size(config.visual.max_message_bytes);

        info!("Visual backend client created for {}", config.visual.endpoint);

        Ok(Self {
            inner,
            endpoint: config.visual.endpoint.clone(),
            timeout: config.timeout(),
            similarity_threshold: config.similarity_threshold as f32,
            stability_threshold: config.visual.stability_threshold,
            min_stable_frames: config.visual.min_stable_frames,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Release the connection
    pub fn close(self) {
        debug!("Closing visual backend connection to {}", self.endpoint);
        drop(self.inner);
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(self.timeout);
        request
    }

    /// Await one RPC, bounded by the configured timeout
    async fn call<T, F>(&self, method: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => {
                debug!("{} failed: {}", method, status);
                Err(match Error::from(status) {
                    Error::Timeout { .. } => Error::Timeout {
                        seconds: self.timeout.as_secs(),
                    },
                    other => other,
                })
            }
            Err(_) => Err(Error::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    fn settings(&self, threshold: Option<f32>) -> Option<CompareSettings> {
        Some(CompareSettings {
            similarity_threshold: threshold.unwrap_or(self.similarity_threshold),
        })
    }

    pub async fn compare_frames(
        &self,
        baseline: Vec<u8>,
        actual: Vec<u8>,
        context: &str,
    ) -> Result<CompareResult> {
        self.compare(FrameRef::Data(baseline), FrameRef::Data(actual), context, None)
            .await
    }

    pub async fn compare_frames_by_uri(
        &self,
        baseline_uri: &str,
        actual_uri: &str,
        context: &str,
    ) -> Result<CompareResult> {
        self.compare(
            FrameRef::uri(baseline_uri),
            FrameRef::uri(actual_uri),
            context,
            None,
        )
        .await
    }

    pub async fn compare_frames_with_threshold(
        &self,
        baseline: Vec<u8>,
        actual: Vec<u8>,
        threshold: f32,
        context: &str,
    ) -> Result<CompareResult> {
        self.compare(
            FrameRef::Data(baseline),
            FrameRef::Data(actual),
            context,
            Some(threshold),
        )
        .await
    }

    pub async fn detect_stability_by_uris(&self, frame_uris: Vec<String>) -> Result<StabilityResult> {
        self.detect_stability(frame_uris.into_iter().map(FrameRef::Uri).collect())
            .await
    }
}

#[async_trait]
impl VisualBackend for VisualClient {
    async fn compare(
        &self,
        baseline: FrameRef,
        actual: FrameRef,
        context: &str,
        threshold: Option<f32>,
    ) -> Result<CompareResult> {
        let (baseline_data, baseline_uri) = baseline.into_parts();
        let (actual_data, actual_uri) = actual.into_parts();
        let message = proto::CompareFramesRequest {
            baseline_data,
            baseline_uri,
            actual_data,
            actual_uri,
            context: context.to_string(),
            settings: self.settings(threshold),
        };

        let mut client = self.inner.clone();
        let resp = self
            .call("CompareFrames", client.compare_frames(self.request(message)))
            .await?;

        debug!(
            "CompareFrames completed: similarity={:.3} match={} regions={}",
            resp.similarity_score,
            resp.semantic_match,
            resp.changed_regions.len()
        );
        Ok(resp.into())
    }

    async fn detect_stability(&self, frames: Vec<FrameRef>) -> Result<StabilityResult> {
        let mut message = proto::DetectStabilityRequest {
            stability_threshold: self.stability_threshold,
            min_stable_frames: self.min_stable_frames as i32,
            ..Default::default()
        };
        for frame in frames {
            match frame {
                FrameRef::Data(data) => message.frames.push(data),
                FrameRef::Uri(uri) => message.frame_uris.push(uri),
            }
        }

        let mut client = self.inner.clone();
        let resp = self
            .call("DetectStability", client.detect_stability(self.request(message)))
            .await?;

        debug!(
            "DetectStability completed: stable={} stable_frame={}",
            resp.is_stable, resp.stable_frame_index
        );
        Ok(resp.into())
    }

    async fn generate_embedding(&self, image: FrameRef, normalize: bool) -> Result<EmbeddingResult> {
        let (image_data, image_uri) = image.into_parts();
        let message = proto::GenerateEmbeddingRequest {
            image_data,
            image_uri,
            normalize,
        };

        let mut client = self.inner.clone();
        let resp = self
            .call("GenerateEmbedding", client.generate_embedding(self.request(message)))
            .await?;

        Ok(EmbeddingResult {
            embedding: resp.embedding,
            embedding_dim: usize::try_from(resp.embedding_dim).unwrap_or(0),
            model_version: resp.model_version,
        })
    }

    async fn analyze_change(
        &self,
        before: FrameRef,
        after: FrameRef,
        action: &str,
    ) -> Result<ChangeAnalysis> {
        let (before_data, before_uri) = before.into_parts();
        let (after_data, after_uri) = after.into_parts();
        let message = proto::AnalyzeChangeRequest {
            before_data,
            before_uri,
            after_data,
            after_uri,
            action_performed: action.to_string(),
        };

        let mut client = self.inner.clone();
        let resp = self
            .call("AnalyzeChange", client.analyze_change(self.request(message)))
            .await?;

        debug!(
            "AnalyzeChange completed: action={} expected={}",
            action, resp.expected_change
        );
        Ok(ChangeAnalysis {
            description: resp.description,
            changes: resp.changes,
            expected_change: resp.expected_change,
            confidence: resp.confidence,
        })
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let mut client = self.inner.clone();
        let resp = self
            .call(
                "HealthCheck",
                client.health_check(self.request(proto::HealthCheckRequest {})),
            )
            .await?;
        Ok(resp.into())
    }

    async fn batch_compare(&self, pairs: Vec<FramePair>) -> Result<BatchCompareResult> {
        let count = pairs.len();
        let message = proto::BatchCompareRequest {
            pairs: pairs
                .into_iter()
                .map(|pair| {
                    let (baseline_data, baseline_uri) = pair.baseline.into_parts();
                    let (actual_data, actual_uri) = pair.actual.into_parts();
                    proto::FramePair {
                        pair_id: pair.pair_id,
                        baseline_data,
                        baseline_uri,
                        actual_data,
                        actual_uri,
                        context: pair.context,
                    }
                })
                .collect(),
            settings: self.settings(None),
        };

        let mut client = self.inner.clone();
        let resp = self
            .call("BatchCompare", client.batch_compare(self.request(message)))
            .await?;

        debug!(
            "BatchCompare completed: pairs={} avg_similarity={:.3} matches={}",
            count, resp.average_similarity, resp.matches
        );

        Ok(BatchCompareResult {
            results: resp
                .results
                .into_iter()
                .map(|r| PairCompareResult {
                    pair_id: r.pair_id,
                    result: r.result.map(CompareResult::from).unwrap_or_default(),
                })
                .collect(),
            average_similarity: resp.average_similarity,
            matches: usize::try_from(resp.matches).unwrap_or(0),
            mismatches: usize::try_from(resp.mismatches).unwrap_or(0),
        })
    }
}
