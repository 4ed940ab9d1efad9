//! 4x upscaling
//!
//! Two strategies behind one trait:
//! - `RealEsrganTool` runs the external super-resolution binary (tool.rs)
//! - `EnhancedFallback` resizes and filters in-process (fallback.rs)
//!
//! `UpscaleExecutor` tries the tool first and falls back on any failure,
//! except a timeout, which is reported as is.

pub mod fallback;
pub mod filters;
pub mod tool;

pub use fallback::EnhancedFallback;
pub use tool::RealEsrganTool;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::decode::DecodeError;
use crate::state::{ContentStore, StoreError, StoredFile};

/// Which strategy produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    PrimaryTool,
    Fallback,
}

impl Method {
    /// Name reported to API clients
    pub fn api_name(&self) -> &'static str {
        match self {
            Method::PrimaryTool => "real_esrgan",
            Method::Fallback => "enhanced_fallback",
        }
    }
}

/// One upscale call. Lives only for the duration of the request.
#[derive(Debug, Clone)]
pub struct UpscaleRequest {
    /// Validated input image inside the store
    pub input: PathBuf,
    /// Super-resolution model name (only the external tool uses it)
    pub model: String,
}

/// A successful upscale
#[derive(Debug, Clone)]
pub struct UpscaleResult {
    pub output: StoredFile,
    pub method: Method,
    pub scale_factor: u32,
}

#[derive(Error, Debug)]
pub enum UpscaleError {
    /// The strategy can't run at all (binary or model assets missing)
    #[error("Upscaler unavailable: {0}")]
    Unavailable(String),

    /// The external tool ran but didn't produce a usable result
    #[error("External tool failed: {0}")]
    ToolFailed(String),

    /// The external tool exceeded its wall-clock budget
    #[error("Processing timed out ({}s)", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The 4x output would exceed the configured pixel budget
    #[error("Image too large to upscale: {width}x{height} would exceed {limit} output pixels")]
    TooLarge { width: u32, height: u32, limit: u64 },

    #[error("Fallback upscaling failed: {0}")]
    Processing(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Something that can turn an input image into a stored 4x result
#[async_trait]
pub trait UpscaleStrategy: Send + Sync {
    fn method(&self) -> Method;

    async fn upscale(&self, request: &UpscaleRequest) -> Result<UpscaleResult, UpscaleError>;
}

/// Primary-then-fallback coordinator
pub struct UpscaleExecutor {
    primary: Box<dyn UpscaleStrategy>,
    fallback: Box<dyn UpscaleStrategy>,
}

impl UpscaleExecutor {
    pub fn new(primary: Box<dyn UpscaleStrategy>, fallback: Box<dyn UpscaleStrategy>) -> Self {
        Self { primary, fallback }
    }

    /// The production pairing: external tool first, in-process fallback second
    pub fn from_config(config: Arc<Config>, store: Arc<ContentStore>) -> Self {
        Self::new(
            Box::new(RealEsrganTool::new(Arc::clone(&config), Arc::clone(&store))),
            Box::new(EnhancedFallback::new(store, config.max_upscale_pixels)),
        )
    }

    pub async fn upscale(&self, request: &UpscaleRequest) -> Result<UpscaleResult, UpscaleError> {
        match self.primary.upscale(request).await {
            Ok(result) => return Ok(result),
            // Terminal: the caller learns about it, no second attempt
            Err(e @ UpscaleError::Timeout(_)) => {
                warn!(method = ?self.primary.method(), error = %e, "upscale timed out");
                return Err(e);
            }
            Err(UpscaleError::Unavailable(reason)) => {
                info!(reason = %reason, "primary upscaler unavailable, using fallback");
            }
            Err(e) => {
                warn!(error = %e, "primary upscaler failed, using fallback");
            }
        }

        self.fallback.upscale(request).await
    }
}
