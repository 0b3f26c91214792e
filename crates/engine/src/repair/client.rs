//! HTTP client for the repair backend (messages API)

use super::prompt::{self, ANALYSIS_SYSTEM_PROMPT, FIX_SYSTEM_PROMPT, REPAIR_SYSTEM_PROMPT};
use super::{FailureAnalysis, RepairBackend, SelectorRepairRequest, SelectorRepairResponse};
use crate::config::HealingConfig;
use async_trait::async_trait;
use reqwest::Client;
use selfheal_common::{Error, HealingRequest, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

/// Repair backend reached over HTTP
pub struct RepairClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    api_version: String,
    timeout_secs: u64,
}

impl RepairClient {
    pub fn new(config: &HealingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::InvalidConfig(format!("repair HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.repair.endpoint.clone(),
            api_key: config.repair.api_key.clone(),
            model: config.repair.model.clone(),
            max_tokens: config.repair.max_tokens,
            api_version: config.repair.api_version.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    /// One completion round trip; returns the first text block
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: user,
            }],
        };

        debug!("Calling repair backend: model={} prompt_len={}", self.model, user.len());

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!("Repair backend returned {}: {}", status, text);
            return Err(Error::Backend(format!(
                "repair backend returned status {}: {}",
                status, text
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(format!("messages envelope: {}", e)))?;

        debug!(
            "Repair backend response: input_tokens={} output_tokens={} stop_reason={:?}",
            parsed.usage.input_tokens, parsed.usage.output_tokens, parsed.stop_reason
        );

        parsed
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| Error::MalformedResponse("empty response from repair backend".into()))
    }

    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout {
                seconds: self.timeout_secs,
            }
        } else {
            Error::Backend(format!("repair backend request failed: {}", e))
        }
    }
}

#[async_trait]
impl RepairBackend for RepairClient {
    async fn repair(&self, request: &SelectorRepairRequest) -> Result<SelectorRepairResponse> {
        let text = self
            .complete(REPAIR_SYSTEM_PROMPT, &prompt::repair_prompt(request))
            .await?;
        prompt::parse_repair_response(&text)
    }

    async fn generate_fix(
        &self,
        request: &HealingRequest,
        repair: &SelectorRepairResponse,
    ) -> Result<String> {
        let text = self
            .complete(FIX_SYSTEM_PROMPT, &prompt::fix_prompt(request, repair))
            .await?;
        Ok(prompt::strip_code_fence(&text).to_string())
    }

    async fn analyze_failure(&self, request: &HealingRequest) -> Result<FailureAnalysis> {
        let text = self
            .complete(ANALYSIS_SYSTEM_PROMPT, &prompt::analysis_prompt(request))
            .await?;
        prompt::parse_analysis(&text)
    }
}
