pub mod cli;
pub mod config;
pub mod detection;
pub mod error;
pub mod grading;
pub mod helpers;
pub mod mapping;
pub mod model;
pub mod postprocess;
pub mod preprocess;
pub mod progress;
pub mod routes;
pub mod service;
pub mod sweeper;

pub use crate::cli::Args;
pub use crate::config::{AppConfig, InferenceConfig};
pub use crate::detection::{BBox, Corners, Detection};
pub use crate::error::{ConfigError, InferenceError, PipelineError, ServiceBusy};
pub use crate::grading::{SampleStats, classify_grade};
pub use crate::helpers::Annotator;
pub use crate::model::{HostedModel, InferenceGateway, InferenceOutput};
pub use crate::postprocess::{compute_iou, non_maximum_suppression};
pub use crate::preprocess::{CompressConfig, Compressor};
pub use crate::progress::{JobId, JobSnapshot, JobStatus, ProgressStore};
pub use crate::routes::{AppState, router};
pub use crate::service::{GradeReport, GradingService, JobRunner, Submission};
pub use crate::sweeper::spawn_sweeper;
