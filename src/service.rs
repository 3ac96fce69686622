use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::detection::Detection;
use crate::error::{InferenceError, PipelineError, PipelineResult, ServiceBusy};
use crate::grading::{SampleStats, classify_grade, count_labels};
use crate::helpers::Annotator;
use crate::model::{InferenceGateway, InferenceOutput};
use crate::postprocess::non_maximum_suppression;
use crate::preprocess::{CompressOutcome, Compressor};
use crate::progress::{JobId, ProgressStore};

// Progress milestones of a grading job.
const PICKED_UP: u8 = 5;
const COMPRESS_END: u8 = 40;
const RETRY_COMPRESS_END: u8 = 55;
const INFERRED: u8 = 70;
const SUPPRESSED: u8 = 75;
const GRADED: u8 = 80;
const ANNOTATED: u8 = 90;

/// Final result of a grading job, as returned by `/progress`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeReport {
    pub grade: String,
    #[serde(flatten)]
    pub stats: SampleStats,
    pub counts: BTreeMap<String, u32>,
    /// File name of the annotated image, served under `/results/`.
    pub annotated_image: String,
    /// Detections left after suppression.
    pub detections: Vec<Detection>,
    /// Detections as the detector returned them.
    pub raw_detections: Vec<Detection>,
    pub raw_response: serde_json::Value,
    pub moisture: f64,
    pub weight: f64,
    pub compressed_size_mb: f64,
}

/// An accepted upload waiting to be graded.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: JobId,
    pub image_path: PathBuf,
    pub moisture: f64,
    pub weight: f64,
}

impl Submission {
    pub fn annotated_name(&self) -> String {
        format!("{}.jpg", self.id)
    }
}

fn scaled(start: u8, end: u8, fraction: f32) -> u8 {
    let span = end.saturating_sub(start) as f32;
    start + (span * fraction.clamp(0.0, 1.0)).round() as u8
}

/// Runs one grading job from upload to annotated result.
///
/// Every stage is blocking (codec, HTTP, disk), so `run` is meant for a
/// blocking thread.
pub struct JobRunner {
    gateway: Arc<dyn InferenceGateway>,
    compressor: Compressor,
    annotator: Annotator,
    store: Arc<ProgressStore>,
    results_dir: PathBuf,
    iou_threshold: f32,
}

impl JobRunner {
    pub fn new(
        gateway: Arc<dyn InferenceGateway>,
        compressor: Compressor,
        annotator: Annotator,
        store: Arc<ProgressStore>,
        results_dir: PathBuf,
        iou_threshold: f32,
    ) -> Self {
        Self {
            gateway,
            compressor,
            annotator,
            store,
            results_dir,
            iou_threshold,
        }
    }

    /// Execute the job and publish its terminal state. Errors end here.
    pub fn run(&self, submission: &Submission) {
        let id = submission.id;
        match self.execute(submission) {
            Ok(report) => {
                info!(job_id = %id, grade = %report.grade, kernels = report.stats.total_kernels, "job completed");
                self.store.complete(&id, report);
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "job failed");
                self.store.fail(&id, e.to_string());
            }
        }
    }

    fn execute(&self, submission: &Submission) -> PipelineResult<GradeReport> {
        let id = submission.id;
        self.store.update(&id, PICKED_UP);

        let (output, compressed) = self.detect(submission)?;
        self.store.update(&id, INFERRED);

        let kept = non_maximum_suppression(&output.detections, self.iou_threshold);
        self.store.update(&id, SUPPRESSED);

        let stats = SampleStats::from_detections(&kept);
        let grade = classify_grade(&stats);
        self.store.update(&id, GRADED);

        let annotated_image = submission.annotated_name();
        self.annotator
            .annotate(&compressed.path, &kept, &self.results_dir.join(&annotated_image))?;
        self.store.update(&id, ANNOTATED);

        Ok(GradeReport {
            grade: grade.to_string(),
            stats,
            counts: count_labels(&kept),
            annotated_image,
            detections: kept,
            raw_detections: output.detections,
            raw_response: output.raw,
            moisture: submission.moisture,
            weight: submission.weight,
            compressed_size_mb: compressed.size_mb(),
        })
    }

    /// Compress and send the image, shrinking it once more if the detector
    /// refuses it for size.
    fn detect(&self, submission: &Submission) -> PipelineResult<(InferenceOutput, CompressOutcome)> {
        let id = submission.id;
        let cfg = &self.compressor.config;
        let passes = [
            (cfg.max_size_mb, PICKED_UP, COMPRESS_END),
            (cfg.retry_size_mb, COMPRESS_END, RETRY_COMPRESS_END),
        ];

        let mut image = submission.image_path.clone();
        for (pass, (budget_mb, start, end)) in passes.into_iter().enumerate() {
            let sink = |fraction: f32| self.store.update(&id, scaled(start, end, fraction));
            let outcome = self.compressor.compress(&image, budget_mb, &sink)?;
            image = outcome.path.clone();
            info!(
                job_id = %id,
                budget_mb,
                size_mb = outcome.size_mb(),
                quality = outcome.quality,
                resized = outcome.resized,
                "compressed upload"
            );

            match self.gateway.infer(&image) {
                Ok(output) => return Ok((output, outcome)),
                Err(InferenceError::PayloadTooLarge) => {
                    warn!(job_id = %id, pass, "detector refused payload size");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(PipelineError::ImageTooLarge)
    }
}

/// Slot granted by [`GradingService::try_admit`]; held until the job ends.
pub struct Admission {
    _permit: OwnedSemaphorePermit,
}

/// Accepts grading jobs and runs them on tokio's blocking pool.
///
/// `max_inflight` bounds accepted jobs (running and queued); `workers`
/// bounds the ones executing at once.
pub struct GradingService {
    runner: Arc<JobRunner>,
    store: Arc<ProgressStore>,
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    max_inflight: usize,
}

impl GradingService {
    pub fn new(runner: JobRunner, store: Arc<ProgressStore>, max_inflight: usize, workers: usize) -> Self {
        Self {
            runner: Arc::new(runner),
            store,
            admission: Arc::new(Semaphore::new(max_inflight)),
            workers: Arc::new(Semaphore::new(workers)),
            max_inflight,
        }
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    pub fn new_job_id() -> JobId {
        Uuid::new_v4()
    }

    /// Reserve a job slot, or refuse right away when all are taken.
    pub fn try_admit(&self) -> Result<Admission, ServiceBusy> {
        self.admission
            .clone()
            .try_acquire_owned()
            .map(|permit| Admission { _permit: permit })
            .map_err(|_| ServiceBusy {
                limit: self.max_inflight,
            })
    }

    /// Register the job and start it in the background. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, admission: Admission, submission: Submission) -> JobId {
        let id = submission.id;
        self.store.create(id);
        info!(job_id = %id, path = %submission.image_path.display(), "job submitted");

        let runner = self.runner.clone();
        let store = self.store.clone();
        let workers = self.workers.clone();
        tokio::spawn(async move {
            let _admission = admission;
            let Ok(_worker) = workers.acquire_owned().await else {
                store.fail(&id, PipelineError::Worker("worker pool closed".into()).to_string());
                return;
            };
            info!(job_id = %id, "job started");
            let joined = tokio::task::spawn_blocking(move || runner.run(&submission)).await;
            if let Err(e) = joined {
                error!(job_id = %id, error = %e, "job worker panicked");
                store.fail(&id, PipelineError::Worker(e.to_string()).to_string());
            }
        });
        id
    }
}
