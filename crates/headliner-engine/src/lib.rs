//! Featured-image generation: style selection, prompt rendering, the remote
//! job protocol, image ingestion and the orchestrator that ties them to a
//! content host.

pub mod client;
pub mod error;
pub mod host;
pub mod ingest;
pub mod pipeline;
pub mod prompt;
pub mod style;
pub mod transport;
pub mod worker;

pub use client::{ConnectionCheck, GenerationClient, GenerationJob, ImageReference, PollPolicy};
pub use error::{ConfigError, GenerationError, HostError, IngestionError, PipelineError};
pub use host::{AssetStore, ContentHost, LibraryHost, StoredAsset};
pub use ingest::{CodecSupport, GeneratedAsset, ImageIngestor};
pub use pipeline::{
    CustomImage, GenerateOutcome, GenerateRequest, GeneratedImage, Orchestrator, PromptPreview,
    PublishEvent, PublishOutcome,
};
pub use prompt::{PromptBuilder, PromptContext};
pub use transport::{HttpTransport, ReqwestTransport};
pub use worker::{spawn_generation, PendingGeneration};
