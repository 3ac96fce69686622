use thiserror::Error;

/// Startup configuration problems. These stop the process before it serves.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing inference API key (set ROBOFLOW_API_KEY or pass --api-key)")]
    MissingApiKey,

    #[error("{name} must be within [0, 1], got {value}")]
    OutOfUnitRange { name: &'static str, value: f32 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("failed to load label font {path}: {reason}")]
    Font { path: String, reason: String },

    #[error("failed to prepare directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a failed call to the detection backend.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// The backend refused the upload because of its size. Carries no data.
    #[error("payload too large for inference backend")]
    PayloadTooLarge,

    #[error("inference failed: {0}")]
    Failed(String),
}

/// Anything that ends a grading job in the error state.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Image too large: please upload a smaller image file")]
    ImageTooLarge,

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("resize error: {0}")]
    Resize(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job worker failed: {0}")]
    Worker(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Submission refused because every job slot is taken.
#[derive(Debug, Error)]
#[error("server busy: {limit} jobs already in flight, try again later")]
pub struct ServiceBusy {
    pub limit: usize,
}
