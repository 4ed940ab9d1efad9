//! External super-resolution tool (realesrgan-ncnn-vulkan)
//!
//! The binary and the model's `.param`/`.bin` pair must both be on disk
//! before a run is attempted. Each run writes to its own reserved output
//! path and is killed if it exceeds the configured timeout.

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};

use super::{Method, UpscaleError, UpscaleRequest, UpscaleResult, UpscaleStrategy};
use crate::config::{Config, SCALE_FACTOR};
use crate::state::{Category, ContentStore};

/// Output format requested from the tool
const OUTPUT_FORMAT: &str = "png";

/// Stderr characters kept in failure messages
const STDERR_EXCERPT: usize = 200;

/// Availability of the external tool, as reported by the status endpoint
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolStatus {
    pub available: bool,
    pub executable: bool,
    pub models_available: bool,
    pub message: String,
}

pub struct RealEsrganTool {
    config: Arc<Config>,
    store: Arc<ContentStore>,
}

impl RealEsrganTool {
    pub fn new(config: Arc<Config>, store: Arc<ContentStore>) -> Self {
        Self { config, store }
    }
}

/// Probe the binary and the default model's assets
pub fn check_status(config: &Config) -> ToolStatus {
    if !config.tool_present() {
        return ToolStatus {
            available: false,
            executable: false,
            models_available: false,
            message: "Real-ESRGAN not found".to_string(),
        };
    }

    let models_available = config.model_available(&config.default_model);
    ToolStatus {
        available: models_available,
        executable: true,
        models_available,
        message: if models_available {
            "Real-ESRGAN available".to_string()
        } else {
            "Real-ESRGAN available, but models are missing".to_string()
        },
    }
}

#[async_trait]
impl UpscaleStrategy for RealEsrganTool {
    fn method(&self) -> Method {
        Method::PrimaryTool
    }

    async fn upscale(&self, request: &UpscaleRequest) -> Result<UpscaleResult, UpscaleError> {
        let config = &self.config;

        if !config.tool_present() {
            return Err(UpscaleError::Unavailable(format!(
                "tool not found at {}",
                config.tool_path.display()
            )));
        }
        if !config.model_available(&request.model) {
            return Err(UpscaleError::Unavailable(format!(
                "model {} not found in {}",
                request.model,
                config.models_dir.display()
            )));
        }

        // Dropping this without a commit removes any partial output
        let pending = self.store.reserve(Category::Upscaled, "upscaled", OUTPUT_FORMAT);

        let mut command = Command::new(&config.tool_path);
        command
            .arg("-i")
            .arg(&request.input)
            .arg("-o")
            .arg(pending.path())
            .arg("-n")
            .arg(&request.model)
            .arg("-s")
            .arg(SCALE_FACTOR.to_string())
            .arg("-f")
            .arg(OUTPUT_FORMAT)
            .arg("-m")
            .arg(&config.models_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            tool = %config.tool_path.display(),
            model = %request.model,
            output = %pending.id(),
            "starting external upscaler"
        );

        let child = command
            .spawn()
            .map_err(|e| UpscaleError::ToolFailed(format!("Spawn failed: {}", e)))?;

        // On timeout the child is dropped with the future, which kills it
        let output = match tokio::time::timeout(config.upscale_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(UpscaleError::ToolFailed(format!("Exec failed: {}", e))),
            Err(_) => {
                warn!(timeout_secs = config.upscale_timeout.as_secs(), "external upscaler timed out");
                return Err(UpscaleError::Timeout(config.upscale_timeout));
            }
        };

        if !output.status.success() {
            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .chars()
                .take(STDERR_EXCERPT)
                .collect();
            return Err(UpscaleError::ToolFailed(format!(
                "Exit {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        if !pending.path().is_file() {
            return Err(UpscaleError::ToolFailed(
                "tool exited successfully but wrote no output".to_string(),
            ));
        }

        let store = Arc::clone(&self.store);
        let stored = tokio::task::spawn_blocking(move || store.commit(pending))
            .await
            .map_err(|e| UpscaleError::ToolFailed(format!("Task join error: {}", e)))??;

        if stored.width == 0 || stored.height == 0 {
            // Not a readable image; don't keep it around
            if let Err(e) = self.store.delete(&stored.id) {
                warn!(id = %stored.id, error = %e, "failed to remove unreadable tool output");
            }
            return Err(UpscaleError::ToolFailed("tool output is not a readable image".to_string()));
        }

        info!(
            id = %stored.id,
            width = stored.width,
            height = stored.height,
            "external upscaler finished"
        );

        Ok(UpscaleResult {
            output: stored,
            method: Method::PrimaryTool,
            scale_factor: SCALE_FACTOR,
        })
    }
}
