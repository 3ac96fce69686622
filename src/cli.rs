use std::path::PathBuf;

use clap::Parser;


#[derive(Parser, Clone)]
#[command(author, version, about = "Grades corn kernel images against USDA damage rules", long_about = None)]
pub struct Args {
    /// Address to bind
    #[arg(long, env = "CORN_GRADER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Directory for raw uploads
    #[arg(long, env = "CORN_GRADER_UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Directory for annotated results
    #[arg(long, env = "CORN_GRADER_RESULTS_DIR", default_value = "results")]
    pub results_dir: PathBuf,

    /// API key of the hosted detection service
    #[arg(long, env = "ROBOFLOW_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of the hosted detection service
    #[arg(long, env = "CORN_GRADER_API_URL", default_value = "https://detect.roboflow.com")]
    pub api_url: String,

    /// Detection model, as `project/version`
    #[arg(long, env = "CORN_GRADER_MODEL_ID", default_value = "corn-hub/4")]
    pub model_id: String,

    /// Minimum confidence requested from the detector
    #[arg(long, default_value_t = 0.10)]
    pub confidence: f32,

    /// Overlap at which non-max suppression drops a box
    #[arg(long, default_value_t = 0.3)]
    pub iou_threshold: f32,

    #[arg(long, default_value_t = 120)]
    pub inference_timeout_secs: u64,

    /// Jobs processed at the same time
    #[arg(long, default_value_t = 4)]
    pub worker_threads: usize,

    /// Jobs accepted (running + queued) before submissions are refused
    #[arg(long, default_value_t = 32)]
    pub max_inflight_jobs: usize,

    /// Seconds a finished job is kept before it is swept
    #[arg(long, default_value_t = 3600)]
    pub job_ttl_secs: u64,

    #[arg(long, default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Largest accepted upload, in MB
    #[arg(long, default_value_t = 25)]
    pub max_upload_mb: usize,

    /// TTF/OTF font used to label boxes; boxes are drawn unlabeled without it
    #[arg(long, env = "CORN_GRADER_LABEL_FONT")]
    pub label_font: Option<PathBuf>,
}
