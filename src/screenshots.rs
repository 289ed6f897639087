use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;

use crate::agent::AgentError;

/// Optional sink for the screenshots captured after each computer call.
#[async_trait]
pub trait ScreenshotStore: Send + Sync {
    async fn save(&self, prompt_id: Option<&str>, call_id: &str, image_base64: &str) -> Result<(), AgentError>;
}

pub struct DiskScreenshotStore {
    base_dir: PathBuf,
}

impl DiskScreenshotStore {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self { base_dir: base.as_ref().to_path_buf() }
    }

    pub fn path_for(&self, prompt_id: Option<&str>, call_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}_{}.png", prompt_id.unwrap_or("session"), call_id))
    }
}

#[async_trait]
impl ScreenshotStore for DiskScreenshotStore {
    async fn save(&self, prompt_id: Option<&str>, call_id: &str, image_base64: &str) -> Result<(), AgentError> {
        async_fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| AgentError::Logging(format!("create_dir: {}", e)))?;
        let png = B64
            .decode(image_base64)
            .map_err(|e| AgentError::Logging(format!("b64 decode: {}", e)))?;
        async_fs::write(self.path_for(prompt_id, call_id), &png)
            .await
            .map_err(|e| AgentError::Logging(format!("write: {}", e)))?;
        Ok(())
    }
}
