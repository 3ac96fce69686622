//! Validated runtime configuration built from [`Args`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Args;
use crate::error::ConfigError;

/// Connection settings for the hosted detection service.
#[derive(Clone)]
pub struct InferenceConfig {
    pub api_url: String,
    pub api_key: String,
    pub model_id: String,
    pub confidence: f32,
    pub timeout: Duration,
}

// Keeps the API key out of logs.
impl fmt::Debug for InferenceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("model_id", &self.model_id)
            .field("confidence", &self.confidence)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub results_dir: PathBuf,
    pub inference: InferenceConfig,
    pub iou_threshold: f32,
    pub worker_threads: usize,
    pub max_inflight_jobs: usize,
    pub job_ttl: Duration,
    pub sweep_interval: Duration,
    pub max_upload_bytes: usize,
    pub label_font: Option<PathBuf>,
}

impl Args {
    /// Validate the parsed arguments. A missing API key is reported here,
    /// before the server accepts any request.
    pub fn into_config(self) -> Result<AppConfig, ConfigError> {
        let api_key = self
            .api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        unit_range("confidence", self.confidence)?;
        unit_range("iou_threshold", self.iou_threshold)?;
        non_zero("worker_threads", self.worker_threads)?;
        non_zero("max_inflight_jobs", self.max_inflight_jobs)?;
        non_zero("max_upload_mb", self.max_upload_mb)?;
        non_zero("sweep_interval_secs", self.sweep_interval_secs as usize)?;

        Ok(AppConfig {
            host: self.host,
            port: self.port,
            upload_dir: self.upload_dir,
            results_dir: self.results_dir,
            inference: InferenceConfig {
                api_url: self.api_url.trim_end_matches('/').to_string(),
                api_key,
                model_id: self.model_id,
                confidence: self.confidence,
                timeout: Duration::from_secs(self.inference_timeout_secs),
            },
            iou_threshold: self.iou_threshold,
            worker_threads: self.worker_threads,
            // Never fewer slots than workers.
            max_inflight_jobs: self.max_inflight_jobs.max(self.worker_threads),
            job_ttl: Duration::from_secs(self.job_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            max_upload_bytes: self.max_upload_mb * 1024 * 1024,
            label_font: self.label_font,
        })
    }
}

impl AppConfig {
    /// Create the upload and result directories if needed.
    pub fn prepare_dirs(&self) -> Result<(), ConfigError> {
        for dir in [&self.upload_dir, &self.results_dir] {
            ensure_dir(dir)?;
        }
        Ok(())
    }
}

fn ensure_dir(dir: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(dir).map_err(|source| ConfigError::Directory {
        path: dir.display().to_string(),
        source,
    })
}

fn unit_range(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfUnitRange { name, value })
    }
}

fn non_zero(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 { Err(ConfigError::Zero(name)) } else { Ok(()) }
}
