use async_trait::async_trait;
use chrono::Utc;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::agent::AgentError;
use crate::items::{Action, MessageContent, PageMetadata, Role, SummaryPart};

/// One processed item, as handed to the logger.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub prompt_id: Option<String>,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_metadata: Option<PageMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Vec<SummaryPart>>,
    /// Seconds spent dispatching the item.
    pub duration: f64,
}

impl StepRecord {
    pub fn new(prompt_id: Option<&str>, item_type: &str) -> Self {
        Self {
            prompt_id: prompt_id.map(str::to_string),
            item_type: item_type.to_string(),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait StepLogger: Send + Sync {
    /// Record a user prompt and hand back the id that correlates its steps.
    async fn new_prompt(&self, text: &str) -> Result<String, AgentError>;
    async fn log_step(&self, record: &StepRecord) -> Result<(), AgentError>;
    async fn log_browser_state(&self, event: &str, metadata: &PageMetadata) -> Result<(), AgentError>;
}

#[derive(Serialize)]
struct LogLine<'a, T: Serialize> {
    agent_id: &'a str,
    timestamp: String,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Serialize)]
struct UserPrompt<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    prompt_id: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct BrowserState<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    event: &'a str,
    metadata: &'a PageMetadata,
}

/// Append-only JSON Lines stream at `{log_dir}/{agent_id}/log.jsonl`.
pub struct JsonlLogger {
    agent_id: String,
    path: PathBuf,
    file: Mutex<async_fs::File>,
}

impl JsonlLogger {
    pub async fn create<P: AsRef<Path>>(log_dir: P) -> Result<Self, AgentError> {
        let agent_id = format!("{}_{}", Utc::now().format("%Y%m%dT%H%M%S"), nanoid!());
        let dir = log_dir.as_ref().join(&agent_id);
        async_fs::create_dir_all(&dir)
            .await
            .map_err(|e| AgentError::Logging(format!("create_dir: {}", e)))?;
        let path = dir.join("log.jsonl");
        let file = async_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| AgentError::Logging(format!("open {}: {}", path.display(), e)))?;
        debug!(agent_id = %agent_id, path = %path.display(), "step log opened");
        Ok(Self { agent_id, path, file: Mutex::new(file) })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append<T: Serialize>(&self, body: &T) -> Result<(), AgentError> {
        let line = LogLine {
            agent_id: &self.agent_id,
            timestamp: Utc::now().to_rfc3339(),
            body,
        };
        let mut buf = serde_json::to_vec(&line)
            .map_err(|e| AgentError::Logging(format!("serialize: {}", e)))?;
        buf.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&buf)
            .await
            .map_err(|e| AgentError::Logging(format!("write: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| AgentError::Logging(format!("flush: {}", e)))
    }
}

#[async_trait]
impl StepLogger for JsonlLogger {
    async fn new_prompt(&self, text: &str) -> Result<String, AgentError> {
        let prompt_id = nanoid!();
        self.append(&UserPrompt { kind: "user_prompt", prompt_id: &prompt_id, content: text })
            .await?;
        Ok(prompt_id)
    }

    async fn log_step(&self, record: &StepRecord) -> Result<(), AgentError> {
        self.append(record).await
    }

    async fn log_browser_state(&self, event: &str, metadata: &PageMetadata) -> Result<(), AgentError> {
        self.append(&BrowserState { kind: "browser_state", event, metadata }).await
    }
}
