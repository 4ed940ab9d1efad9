//! Service configuration
//!
//! Every tunable (folders, limits, tool location, timers) lives in one
//! `Config` built at startup and handed to components by reference.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Default super-resolution model used by the status check and by uploads
/// that don't name one
pub const DEFAULT_MODEL: &str = "realesrgan-x4plus";

/// Upscale factor of both the external tool and the fallback pipeline
pub const SCALE_FACTOR: u32 = 4;

#[cfg(windows)]
const DEFAULT_TOOL: &str = "realesrgan-ncnn-vulkan.exe";
#[cfg(not(windows))]
const DEFAULT_TOOL: &str = "realesrgan-ncnn-vulkan";

/// Command line / environment arguments
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Working directory for uploads and generated files
    #[arg(long, env = "UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Directory holding `{model}.param` + `{model}.bin` pairs
    #[arg(long, env = "MODELS_DIR", default_value = "models")]
    pub models_dir: PathBuf,

    /// Directory served at `/`
    #[arg(long, env = "STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// SQLite file recording each stored file's category
    #[arg(long, env = "CATALOG_PATH", default_value = "catalog.db")]
    pub catalog_path: PathBuf,

    /// Path to the external super-resolution binary
    #[arg(long, env = "REALESRGAN_PATH", default_value = DEFAULT_TOOL)]
    pub tool_path: PathBuf,

    /// Maximum accepted upload size in MiB
    #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = 20)]
    pub max_upload_mb: u64,

    /// Largest fallback upscale output, in megapixels
    #[arg(long, env = "MAX_UPSCALE_MEGAPIXELS", default_value_t = 40)]
    pub max_upscale_megapixels: u64,

    /// Wall-clock budget for one external tool run, in seconds
    #[arg(long, env = "UPSCALE_TIMEOUT_SECS", default_value_t = 300)]
    pub upscale_timeout_secs: u64,

    /// Files older than this many hours are swept
    #[arg(long, env = "RETENTION_HOURS", default_value_t = 24)]
    pub retention_hours: u64,

    /// Minutes between two sweeper passes
    #[arg(long, env = "SWEEP_INTERVAL_MINS", default_value_t = 60)]
    pub sweep_interval_mins: u64,

    /// Log filter (overridden by RUST_LOG)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Resolved configuration shared by every component
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub models_dir: PathBuf,
    pub static_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub tool_path: PathBuf,
    pub default_model: String,
    pub max_upload_bytes: usize,
    /// Output pixel budget of the in-process fallback
    pub max_upscale_pixels: u64,
    pub upscale_timeout: Duration,
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            upload_dir: PathBuf::from("uploads"),
            models_dir: PathBuf::from("models"),
            static_dir: PathBuf::from("static"),
            catalog_path: PathBuf::from("catalog.db"),
            tool_path: PathBuf::from(DEFAULT_TOOL),
            default_model: DEFAULT_MODEL.to_string(),
            max_upload_bytes: 20 * 1024 * 1024,
            max_upscale_pixels: 40_000_000,
            upscale_timeout: Duration::from_secs(300),
            retention: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            log_level: "info".to_string(),
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            upload_dir: args.upload_dir,
            models_dir: args.models_dir,
            static_dir: args.static_dir,
            catalog_path: args.catalog_path,
            tool_path: args.tool_path,
            default_model: DEFAULT_MODEL.to_string(),
            max_upload_bytes: usize::try_from(args.max_upload_mb.saturating_mul(1024 * 1024))
                .unwrap_or(usize::MAX),
            max_upscale_pixels: args.max_upscale_megapixels.saturating_mul(1_000_000),
            upscale_timeout: Duration::from_secs(args.upscale_timeout_secs),
            retention: Duration::from_secs(args.retention_hours.saturating_mul(60 * 60)),
            sweep_interval: Duration::from_secs(args.sweep_interval_mins.saturating_mul(60)),
            log_level: args.log_level,
        }
    }
}

impl Config {
    /// Create the working directories if they don't exist yet
    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(&self.models_dir)?;
        if let Some(parent) = self.catalog_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Configuration rooted in a scratch directory (tests)
    #[cfg(test)]
    pub fn rooted_at(root: &std::path::Path) -> Self {
        Self {
            upload_dir: root.join("uploads"),
            models_dir: root.join("models"),
            static_dir: root.join("static"),
            catalog_path: root.join("catalog.db"),
            tool_path: root.join("no-such-tool"),
            ..Self::default()
        }
    }

    /// Upload cap in whole MiB, for error messages
    pub fn max_upload_mb(&self) -> usize {
        self.max_upload_bytes / 1024 / 1024
    }

    /// The `.param` and `.bin` asset paths for a model name
    pub fn model_assets(&self, model: &str) -> (PathBuf, PathBuf) {
        (
            self.models_dir.join(format!("{}.param", model)),
            self.models_dir.join(format!("{}.bin", model)),
        )
    }

    /// Whether both asset files of a model are present
    pub fn model_available(&self, model: &str) -> bool {
        let (param, bin) = self.model_assets(model);
        param.is_file() && bin.is_file()
    }

    /// Whether the external tool binary is present on disk
    pub fn tool_present(&self) -> bool {
        self.tool_path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_args_defaults() {
        let args = Args::parse_from(["pixel-forge"]);
        let config = Config::from(args);
        let default = Config::default();

        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.upscale_timeout, Duration::from_secs(300));
        assert_eq!(config.retention, default.retention);
        assert_eq!(config.sweep_interval, default.sweep_interval);
        assert_eq!(config.max_upscale_pixels, default.max_upscale_pixels);
    }

    #[test]
    fn test_static_dir_is_not_the_working_dir() {
        let config = Config::default();
        assert_eq!(config.static_dir, PathBuf::from("static"));
        assert_ne!(config.static_dir, config.upload_dir);
    }

    #[test]
    fn test_huge_values_saturate() {
        let max = u64::MAX.to_string();
        let args = Args::parse_from([
            "pixel-forge",
            "--max-upload-mb",
            max.as_str(),
            "--max-upscale-megapixels",
            max.as_str(),
            "--retention-hours",
            max.as_str(),
            "--sweep-interval-mins",
            max.as_str(),
        ]);

        let config = Config::from(args);

        assert!(config.max_upload_bytes >= 20 * 1024 * 1024);
        assert_eq!(config.max_upscale_pixels, u64::MAX);
        assert_eq!(config.retention, Duration::from_secs(u64::MAX));
        assert_eq!(config.sweep_interval, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_model_requires_both_assets() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        config.prepare().unwrap();

        assert!(!config.model_available(DEFAULT_MODEL));

        let (param, bin) = config.model_assets(DEFAULT_MODEL);
        std::fs::write(&param, b"param").unwrap();
        assert!(!config.model_available(DEFAULT_MODEL));

        std::fs::write(&bin, b"weights").unwrap();
        assert!(config.model_available(DEFAULT_MODEL));
    }
}
