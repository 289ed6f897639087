use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use tracing::debug;

use crate::agent::{AgentError, ResponseService};
use crate::computer::Environment;
use crate::items::Item;

#[derive(Clone)]
pub struct CuaConfig {
    pub api_base: String, // e.g. "https://api.openai.com/v1"
    pub api_key: String,  // env OPENAI_API_KEY
}

impl Default for CuaConfig {
    fn default() -> Self {
        Self {
            api_base: env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
        }
    }
}

/// Tools advertised to the service on every round-trip.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSchema {
    ComputerUsePreview {
        display_width: u32,
        display_height: u32,
        environment: Environment,
    },
    Function {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        parameters: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        strict: Option<bool>,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Truncation {
    #[default]
    Auto,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResponseRequest {
    pub model: String,
    pub input: Vec<Item>,
    pub tools: Vec<ToolSchema>,
    pub truncation: Truncation,
}

/// The part of a Responses API reply the loop consumes. `output` stays `None` when the
/// service omitted it.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ResponseBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub output: Option<Vec<Item>>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Clone)]
pub struct CuaClient {
    http: Client,
    cfg: CuaConfig,
}

impl CuaClient {
    pub fn new(cfg: CuaConfig) -> Result<Self> {
        if cfg.api_key.is_empty() {
            bail!("OPENAI_API_KEY missing");
        }
        Ok(Self {
            http: Client::new(),
            cfg,
        })
    }

    pub async fn create(&self, request: &ResponseRequest) -> Result<ResponseBody> {
        let url = format!("{}/responses", self.cfg.api_base);
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.cfg.api_key)
            .json(request)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            bail!("OpenAI error {}: {}", status, text);
        }
        let body: ResponseBody =
            serde_json::from_str(&text).context("failed to parse OpenAI response JSON")?;
        debug!(response_id = ?body.id, items = body.output.as_ref().map(Vec::len), "response decoded");
        Ok(body)
    }
}

#[async_trait]
impl ResponseService for CuaClient {
    async fn create_response(&self, request: &ResponseRequest) -> Result<ResponseBody, AgentError> {
        self.create(request)
            .await
            .map_err(|e| AgentError::Service(format!("{:#}", e)))
    }
}
