use std::time::Duration;

use headliner_contracts::config::OutputFormat;
use headliner_contracts::content::ContentId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("API key not configured")]
    MissingApiKey,
    #[error("no usable image model: {0}")]
    NoModel(String),
}

/// Failures talking to the remote generation API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{message}")]
    RequestFailed { status: Option<u16>, message: String },
    #[error("malformed API response: {0}")]
    MalformedResponse(String),
    #[error("image generation failed (task {task_id})")]
    JobFailed { task_id: String },
    #[error("generation timed out after {} seconds", format_seconds(.waited))]
    Timeout {
        task_id: String,
        attempts: u32,
        waited: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestionError {
    #[error("failed to download image: {0}")]
    DownloadFailed(String),
    #[error("invalid image data: {0}")]
    InvalidImage(String),
    #[error("{format} output is not supported on this host")]
    FormatUnsupported { format: OutputFormat },
    #[error("image conversion failed: {0}")]
    TranscodeFailed(String),
    #[error("failed to save image: {0}")]
    PersistFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("content item {0} not found")]
    NotFound(ContentId),
    #[error("{0}")]
    Backend(String),
}

/// Everything a pipeline invocation can return to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(ConfigError),
    #[error("content item {0} not found")]
    NotFound(ContentId),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Generation(GenerationError),
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error("content host error: {0}")]
    Host(String),
    #[error("generation worker stopped: {0}")]
    Worker(String),
}

impl PipelineError {
    /// Short machine-readable code for request layers.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config_error",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::Generation(GenerationError::Timeout { .. }) => "timeout",
            PipelineError::Generation(GenerationError::JobFailed { .. }) => "job_failed",
            PipelineError::Generation(_) => "api_failed",
            PipelineError::Ingestion(_) => "ingestion_failed",
            PipelineError::Host(_) => "host_failed",
            PipelineError::Worker(_) => "worker_failed",
        }
    }

    /// HTTP-equivalent status for the same error.
    pub fn status(&self) -> u16 {
        match self {
            PipelineError::NotFound(_) => 404,
            PipelineError::InvalidRequest(_) => 400,
            _ => 500,
        }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::Config(err)
    }
}

impl From<GenerationError> for PipelineError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Config(inner) => PipelineError::Config(inner),
            other => PipelineError::Generation(other),
        }
    }
}

impl From<HostError> for PipelineError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::NotFound(id) => PipelineError::NotFound(id),
            HostError::Backend(message) => PipelineError::Host(message),
        }
    }
}

fn format_seconds(duration: &Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.1}", duration.as_secs_f64())
    }
}
