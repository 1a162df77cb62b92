use std::sync::Arc;

use headliner_contracts::config::GenerationConfig;
use headliner_contracts::content::{ContentId, ContentRecord, ContentStatus};
use headliner_contracts::events::{ActivityLog, EventPayload};
use headliner_contracts::provenance::ProvenanceRecord;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::client::{ConnectionCheck, GenerationClient, ImageReference};
use crate::error::{ConfigError, PipelineError};
use crate::host::{AssetStore, ContentHost, StoredAsset};
use crate::ingest::{persist_asset, ImageIngestor};
use crate::prompt::PromptContext;
use crate::style::{self, StyleSelection};
use crate::transport::HttpTransport;

pub const ALREADY_HAS_IMAGE: &str =
    "Content already has a featured image. Use force to regenerate.";
pub const PREVIOUSLY_GENERATED: &str = "a featured image was generated for this item before";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    StyleResolved,
    PromptBuilt,
    Submitted,
    Polling,
    Ingesting,
    Attached,
    Failed,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::StyleResolved => "style_resolved",
            PipelineStage::PromptBuilt => "prompt_built",
            PipelineStage::Submitted => "submitted",
            PipelineStage::Polling => "polling",
            PipelineStage::Ingesting => "ingesting",
            PipelineStage::Attached => "attached",
            PipelineStage::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub content_id: ContentId,
    pub force: bool,
    /// Style key to use instead of the category's; empty or `auto` is ignored.
    pub style_override: Option<String>,
}

impl GenerateRequest {
    pub fn new(content_id: ContentId) -> Self {
        Self {
            content_id,
            force: false,
            style_override: None,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_style(mut self, style_key: impl Into<String>) -> Self {
        self.style_override = Some(style_key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedImage {
    pub content_id: ContentId,
    pub asset_id: String,
    pub asset_url: String,
    pub prompt: String,
    pub category: String,
    pub style_key: String,
    pub model: String,
    pub task_id: String,
    pub mime_type: String,
    /// Why the configured output format was not produced, if it was not.
    pub transcode_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateOutcome {
    Generated(GeneratedImage),
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomImage {
    pub prompt: String,
    pub task_id: String,
    /// Only set when the service answered with a URL.
    pub image_url: Option<String>,
    #[serde(skip)]
    pub reference: ImageReference,
    pub asset: Option<StoredAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptPreview {
    pub content_id: ContentId,
    pub prompt: String,
    pub category: String,
    pub category_name: String,
    pub style_key: String,
}

/// A content item changed status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishEvent {
    pub content_id: ContentId,
    pub content_type: String,
    /// `None` when the item was created directly in `status`.
    pub previous_status: Option<ContentStatus>,
    pub status: ContentStatus,
}

impl PublishEvent {
    fn is_first_publish(&self) -> bool {
        self.status == ContentStatus::Published
            && self.previous_status != Some(ContentStatus::Published)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Generated(GeneratedImage),
    Skipped(String),
}

/// Runs the style, prompt, generate, ingest and attach stages for one item.
pub struct Orchestrator {
    config: Arc<GenerationConfig>,
    host: Arc<dyn ContentHost>,
    assets: Arc<dyn AssetStore>,
    client: GenerationClient,
    ingestor: ImageIngestor,
    activity: Option<ActivityLog>,
}

impl Orchestrator {
    pub fn new(
        config: GenerationConfig,
        host: Arc<dyn ContentHost>,
        assets: Arc<dyn AssetStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            host,
            assets,
            client: GenerationClient::new(transport.clone()),
            ingestor: ImageIngestor::new(transport),
            activity: None,
        }
    }

    pub fn with_client(mut self, client: GenerationClient) -> Self {
        self.client = client;
        self
    }

    pub fn with_ingestor(mut self, ingestor: ImageIngestor) -> Self {
        self.ingestor = ingestor;
        self
    }

    pub fn with_activity_log(mut self, activity: ActivityLog) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// The prompt `generate` would send, without touching the network.
    pub fn preview_prompt(
        &self,
        content_id: ContentId,
        style_override: Option<&str>,
    ) -> Result<PromptPreview, PipelineError> {
        let record = self.host.load(content_id)?;
        let (selection, prompt) = self.compose(&record, style_override);
        Ok(PromptPreview {
            content_id,
            prompt,
            category: record.category_slug().to_string(),
            category_name: record.category_name().to_string(),
            style_key: selection.style_key,
        })
    }

    pub fn generate(&self, request: &GenerateRequest) -> Result<GenerateOutcome, PipelineError> {
        let record = self.host.load(request.content_id)?;
        if !request.force && record.has_featured_asset() {
            info!(content_id = record.id, "featured image present; skipping");
            self.record_event(
                "skipped",
                record.id,
                json!({"reason": ALREADY_HAS_IMAGE}),
            );
            return Ok(GenerateOutcome::Skipped {
                reason: ALREADY_HAS_IMAGE.to_string(),
            });
        }

        let mut run = Run::new(self, record.id);
        match self.run_generation(&mut run, &record, request.style_override.as_deref()) {
            Ok(image) => Ok(GenerateOutcome::Generated(image)),
            Err(err) => {
                run.fail(&err);
                Err(err)
            }
        }
    }

    /// Generates from a caller-supplied prompt. With a content id the image is
    /// stored as that item's asset but not attached.
    pub fn generate_custom(
        &self,
        prompt: &str,
        content_id: Option<ContentId>,
    ) -> Result<CustomImage, PipelineError> {
        if let Some(id) = content_id {
            self.host.load(id)?;
        }
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(PipelineError::InvalidRequest("prompt is required".to_string()));
        }

        let mut job = self.client.submit(prompt, &self.config)?;
        let reference = self.client.wait(&mut job, &self.config.api_key)?;
        let asset = content_id.and_then(|id| match self.store_unattached(&reference, id) {
            Ok(stored) => Some(stored),
            Err(err) => {
                warn!(content_id = id, error = %err, "custom image not saved");
                None
            }
        });

        Ok(CustomImage {
            prompt: prompt.to_string(),
            task_id: job.task_id,
            image_url: reference.as_url().map(str::to_string),
            reference,
            asset,
        })
    }

    /// Generates on an item's first publish. Republishing an item that once
    /// had a generated image does not generate again, even after the image
    /// was removed; use `generate` with `force` for that.
    pub fn on_publish(&self, event: &PublishEvent) -> Result<PublishOutcome, PipelineError> {
        let skip = |reason: &str| Ok(PublishOutcome::Skipped(reason.to_string()));
        if !self.config.auto_generate {
            return skip("auto-generate is disabled");
        }
        if !self.config.is_eligible_content_type(&event.content_type) {
            return skip("content type is not enabled");
        }
        if !event.is_first_publish() {
            return skip("not a first publish");
        }
        let record = self.host.load(event.content_id)?;
        if !record.has_featured_asset() && self.host.load_provenance(record.id)?.is_some() {
            info!(content_id = record.id, "image generated before; skipping republish");
            self.record_event("skipped", record.id, json!({"reason": PREVIOUSLY_GENERATED}));
            return skip(PREVIOUSLY_GENERATED);
        }

        match self.generate(&GenerateRequest::new(event.content_id))? {
            GenerateOutcome::Generated(image) => Ok(PublishOutcome::Generated(image)),
            GenerateOutcome::Skipped { reason } => Ok(PublishOutcome::Skipped(reason)),
        }
    }

    /// Checks `api_key`, or the configured key when none is given.
    pub fn test_connection(&self, api_key: Option<&str>) -> ConnectionCheck {
        let key = api_key.unwrap_or(&self.config.api_key);
        self.client.test_connection(key, &self.config.api_base)
    }

    fn compose(
        &self,
        record: &ContentRecord,
        style_override: Option<&str>,
    ) -> (StyleSelection, String) {
        let selection = style::select(record.category_slug(), style_override, &self.config.styles);
        let prompt = PromptContext::from_record(record, selection.style.clone())
            .render(&self.config.prompt_template);
        (selection, prompt)
    }

    fn run_generation(
        &self,
        run: &mut Run<'_>,
        record: &ContentRecord,
        style_override: Option<&str>,
    ) -> Result<GeneratedImage, PipelineError> {
        if !self.config.has_api_key() {
            return Err(ConfigError::MissingApiKey.into());
        }

        let (selection, prompt) = self.compose(record, style_override);
        run.advance(
            PipelineStage::StyleResolved,
            json!({"style": selection.style.key, "style_key": selection.style_key}),
        );
        run.advance(PipelineStage::PromptBuilt, json!({"prompt": prompt}));

        let mut job = self.client.submit(&prompt, &self.config)?;
        run.advance(
            PipelineStage::Submitted,
            json!({"task_id": job.task_id, "model": job.model_id}),
        );
        run.advance(PipelineStage::Polling, json!({"task_id": job.task_id}));
        let reference = self.client.wait(&mut job, &self.config.api_key)?;

        run.advance(
            PipelineStage::Ingesting,
            json!({"task_id": job.task_id, "attempts": job.attempts}),
        );
        let asset = self.ingestor.ingest(
            &reference,
            record.id,
            self.config.output_format,
            self.config.output_quality,
        )?;
        let stored = persist_asset(self.assets.as_ref(), &asset)?;

        let category = record.category_slug().to_string();
        let provenance = ProvenanceRecord::new(&prompt, &category, &selection.style_key)
            .with_model(&job.model_id)
            .with_task_id(&job.task_id);
        self.attach(record, &stored, &provenance)?;
        run.advance(
            PipelineStage::Attached,
            json!({"asset_id": stored.id, "asset_url": stored.url, "mime_type": asset.mime_type}),
        );

        Ok(GeneratedImage {
            content_id: record.id,
            asset_id: stored.id,
            asset_url: stored.url,
            prompt,
            category,
            style_key: selection.style_key,
            model: job.model_id,
            task_id: job.task_id,
            mime_type: asset.mime_type,
            transcode_error: asset.transcode_error.map(|err| err.to_string()),
        })
    }

    // Either both writes land or the item is left as it was and the stored
    // asset is removed.
    fn attach(
        &self,
        record: &ContentRecord,
        stored: &StoredAsset,
        provenance: &ProvenanceRecord,
    ) -> Result<(), PipelineError> {
        let attached = self
            .host
            .set_featured_asset(record.id, Some(&stored.id))
            .and_then(|()| {
                self.host
                    .write_provenance(record.id, provenance)
                    .inspect_err(|_| {
                        if let Err(err) = self
                            .host
                            .set_featured_asset(record.id, record.featured_asset.as_deref())
                        {
                            warn!(content_id = record.id, error = %err, "failed to restore featured image");
                        }
                    })
            });
        if let Err(err) = attached {
            if let Err(discard_err) = self.assets.discard(&stored.id) {
                warn!(asset_id = %stored.id, error = %discard_err, "failed to discard unattached asset");
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn store_unattached(
        &self,
        reference: &ImageReference,
        owner: ContentId,
    ) -> Result<StoredAsset, PipelineError> {
        let asset = self.ingestor.ingest(
            reference,
            owner,
            self.config.output_format,
            self.config.output_quality,
        )?;
        Ok(persist_asset(self.assets.as_ref(), &asset)?)
    }

    fn record_event(&self, event_type: &str, content_id: ContentId, payload: Value) {
        let Some(activity) = &self.activity else {
            return;
        };
        let details = match payload {
            Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        if let Err(err) = activity.record(event_type, Some(content_id), details) {
            warn!(error = %err, "failed to append activity event");
        }
    }
}

/// Stage tracking for one `generate` call.
struct Run<'a> {
    orchestrator: &'a Orchestrator,
    content_id: ContentId,
    stage: PipelineStage,
}

impl<'a> Run<'a> {
    fn new(orchestrator: &'a Orchestrator, content_id: ContentId) -> Self {
        Self {
            orchestrator,
            content_id,
            stage: PipelineStage::Idle,
        }
    }

    fn advance(&mut self, stage: PipelineStage, payload: Value) {
        info!(content_id = self.content_id, from = self.stage.as_str(), to = stage.as_str(), "pipeline stage");
        self.stage = stage;
        self.orchestrator
            .record_event(stage.as_str(), self.content_id, payload);
    }

    fn fail(&mut self, err: &PipelineError) {
        warn!(
            content_id = self.content_id,
            stage = self.stage.as_str(),
            error = %err,
            "generation failed"
        );
        let failed_at = self.stage;
        self.stage = PipelineStage::Failed;
        self.orchestrator.record_event(
            PipelineStage::Failed.as_str(),
            self.content_id,
            json!({"error": err.to_string(), "code": err.code(), "stage": failed_at.as_str()}),
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use headliner_contracts::config::{GenerationConfig, OutputFormat};
    use headliner_contracts::content::{CategoryRef, ContentId, ContentRecord};
    use headliner_contracts::provenance::ProvenanceRecord;
    use serde_json::json;

    use super::Orchestrator;
    use crate::client::GenerationClient;
    use crate::error::HostError;
    use crate::host::{AssetStore, ContentHost, StoredAsset};
    use crate::ingest::testing::sample_png;
    use crate::transport::testing::{RecordingSleeper, ScriptedTransport};
    use crate::transport::HttpReply;

    #[derive(Default)]
    pub struct MemoryHost {
        items: Mutex<HashMap<ContentId, (ContentRecord, Option<ProvenanceRecord>)>>,
        pub reject_provenance: AtomicBool,
    }

    impl MemoryHost {
        pub fn insert(&self, record: ContentRecord) {
            self.items
                .lock()
                .expect("host lock")
                .insert(record.id, (record, None));
        }

        pub fn record(&self, id: ContentId) -> ContentRecord {
            self.items.lock().expect("host lock")[&id].0.clone()
        }

        pub fn provenance(&self, id: ContentId) -> Option<ProvenanceRecord> {
            self.items.lock().expect("host lock")[&id].1.clone()
        }
    }

    impl ContentHost for MemoryHost {
        fn load(&self, id: ContentId) -> Result<ContentRecord, HostError> {
            self.items
                .lock()
                .expect("host lock")
                .get(&id)
                .map(|(record, _)| record.clone())
                .ok_or(HostError::NotFound(id))
        }

        fn set_featured_asset(&self, id: ContentId, asset_id: Option<&str>) -> Result<(), HostError> {
            let mut items = self.items.lock().expect("host lock");
            let (record, _) = items.get_mut(&id).ok_or(HostError::NotFound(id))?;
            record.featured_asset = asset_id.map(str::to_string);
            Ok(())
        }

        fn write_provenance(&self, id: ContentId, provenance: &ProvenanceRecord) -> Result<(), HostError> {
            if self.reject_provenance.load(Ordering::SeqCst) {
                return Err(HostError::Backend("metadata write refused".to_string()));
            }
            let mut items = self.items.lock().expect("host lock");
            let (_, slot) = items.get_mut(&id).ok_or(HostError::NotFound(id))?;
            *slot = Some(provenance.clone());
            Ok(())
        }

        fn load_provenance(&self, id: ContentId) -> Result<Option<ProvenanceRecord>, HostError> {
            let items = self.items.lock().expect("host lock");
            let (_, slot) = items.get(&id).ok_or(HostError::NotFound(id))?;
            Ok(slot.clone())
        }
    }

    #[derive(Default)]
    pub struct MemoryAssets {
        stored: Mutex<Vec<(StoredAsset, String)>>,
        pub reject_writes: AtomicBool,
    }

    impl MemoryAssets {
        pub fn ids(&self) -> Vec<String> {
            self.stored
                .lock()
                .expect("assets lock")
                .iter()
                .map(|(asset, _)| asset.id.clone())
                .collect()
        }

        pub fn filenames(&self) -> Vec<String> {
            self.stored
                .lock()
                .expect("assets lock")
                .iter()
                .map(|(_, filename)| filename.clone())
                .collect()
        }
    }

    impl AssetStore for MemoryAssets {
        fn store(
            &self,
            owner: ContentId,
            filename: &str,
            _mime_type: &str,
            _bytes: &[u8],
        ) -> Result<StoredAsset, HostError> {
            if self.reject_writes.load(Ordering::SeqCst) {
                return Err(HostError::Backend("disk full".to_string()));
            }
            let mut stored = self.stored.lock().expect("assets lock");
            let asset = StoredAsset {
                id: format!("asset-{owner}-{}", stored.len() + 1),
                url: format!("https://media.test/{filename}"),
            };
            stored.push((asset.clone(), filename.to_string()));
            Ok(asset)
        }

        fn discard(&self, asset_id: &str) -> Result<(), HostError> {
            self.stored
                .lock()
                .expect("assets lock")
                .retain(|(asset, _)| asset.id != asset_id);
            Ok(())
        }
    }

    pub struct Harness {
        pub transport: Arc<ScriptedTransport>,
        pub host: Arc<MemoryHost>,
        pub assets: Arc<MemoryAssets>,
        pub orchestrator: Orchestrator,
    }

    pub fn config() -> GenerationConfig {
        GenerationConfig {
            api_key: "test-key".to_string(),
            api_base: "https://api.test/v1".to_string(),
            output_format: OutputFormat::Original,
            ..GenerationConfig::default()
        }
    }

    pub fn harness(config: GenerationConfig) -> Harness {
        let transport = Arc::new(ScriptedTransport::new());
        let host = Arc::new(MemoryHost::default());
        let assets = Arc::new(MemoryAssets::default());
        let client = GenerationClient::new(transport.clone())
            .with_sleeper(Arc::new(RecordingSleeper::default()));
        let orchestrator = Orchestrator::new(config, host.clone(), assets.clone(), transport.clone())
            .with_client(client);
        Harness {
            transport,
            host,
            assets,
            orchestrator,
        }
    }

    pub fn news_item(id: ContentId) -> ContentRecord {
        let mut record = ContentRecord::new(id, "Spring product launch");
        record.body = "<p>We are shipping three new dashboards this spring.</p>".to_string();
        record.category = Some(CategoryRef {
            slug: "news".to_string(),
            name: "News".to_string(),
        });
        record
    }

    /// Submit, one pending poll, completion, then the image download.
    pub fn script_success(transport: &ScriptedTransport, task_id: &str) {
        transport.push_json(200, json!({"data": {"task_id": task_id, "status": "CREATED"}}));
        transport.push_json(200, json!({"data": {"status": "IN_PROGRESS"}}));
        transport.push_json(
            200,
            json!({"data": {"status": "COMPLETED", "generated": ["https://cdn.test/out.png"]}}),
        );
        transport.push(Ok(HttpReply::new(200, sample_png())));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use headliner_contracts::content::{ContentRecord, ContentStatus};
    use headliner_contracts::events::ActivityLog;
    use serde_json::json;

    use super::testing::{config, harness, news_item, script_success};
    use super::{
        GenerateOutcome, GenerateRequest, PublishEvent, PublishOutcome, ALREADY_HAS_IMAGE,
        PREVIOUSLY_GENERATED,
    };
    use crate::error::{ConfigError, GenerationError, IngestionError, PipelineError};
    use crate::host::ContentHost;
    use crate::transport::HttpReply;

    #[test]
    fn generate_attaches_asset_and_writes_provenance() -> anyhow::Result<()> {
        let h = harness(config());
        h.host.insert(news_item(1));
        script_success(&h.transport, "task-7");

        let outcome = h.orchestrator.generate(&GenerateRequest::new(1))?;
        let GenerateOutcome::Generated(image) = outcome else {
            panic!("expected a generated image");
        };
        assert_eq!(image.category, "news");
        assert_eq!(image.style_key, "auto");
        assert_eq!(image.task_id, "task-7");
        assert!(image.prompt.contains("'Spring product launch'"));
        assert!(image.prompt.contains("purple and violet tones"));
        assert!(image.asset_url.ends_with(".png"));

        let record = h.host.record(1);
        assert_eq!(record.featured_asset.as_deref(), Some(image.asset_id.as_str()));
        let provenance = h.host.provenance(1).expect("provenance written");
        assert!(provenance.generated);
        assert_eq!(provenance.prompt, image.prompt);
        assert_eq!(provenance.category, "news");
        assert_eq!(provenance.model.as_deref(), Some("mystic"));
        assert_eq!(provenance.task_id.as_deref(), Some("task-7"));
        assert_eq!(h.transport.count("POST"), 1);
        Ok(())
    }

    #[test]
    fn explicit_style_is_recorded() -> anyhow::Result<()> {
        let h = harness(config());
        h.host.insert(news_item(2));
        script_success(&h.transport, "task-8");

        let request = GenerateRequest::new(2).with_style("taxes");
        let GenerateOutcome::Generated(image) = h.orchestrator.generate(&request)? else {
            panic!("expected a generated image");
        };
        assert_eq!(image.style_key, "taxes");
        assert!(image.prompt.contains("warm amber and gold tones"));
        assert_eq!(h.host.provenance(2).map(|p| p.style_key), Some("taxes".to_string()));
        Ok(())
    }

    #[test]
    fn existing_image_without_force_is_skipped_offline() -> anyhow::Result<()> {
        let h = harness(config());
        let mut record = news_item(3);
        record.featured_asset = Some("hand-picked".to_string());
        h.host.insert(record);

        let outcome = h.orchestrator.generate(&GenerateRequest::new(3))?;
        assert_eq!(
            outcome,
            GenerateOutcome::Skipped {
                reason: ALREADY_HAS_IMAGE.to_string()
            }
        );
        assert!(h.transport.requests().is_empty());
        assert_eq!(h.host.record(3).featured_asset.as_deref(), Some("hand-picked"));
        Ok(())
    }

    #[test]
    fn force_replaces_existing_image() -> anyhow::Result<()> {
        let h = harness(config());
        let mut record = news_item(4);
        record.featured_asset = Some("hand-picked".to_string());
        h.host.insert(record);
        script_success(&h.transport, "task-4");

        let outcome = h.orchestrator.generate(&GenerateRequest::new(4).force(true))?;
        assert!(matches!(outcome, GenerateOutcome::Generated(_)));
        assert_ne!(h.host.record(4).featured_asset.as_deref(), Some("hand-picked"));
        Ok(())
    }

    #[test]
    fn unknown_item_is_not_found() {
        let h = harness(config());
        let err = h.orchestrator.generate(&GenerateRequest::new(404)).unwrap_err();
        assert_eq!(err, PipelineError::NotFound(404));
        assert!(h.transport.requests().is_empty());
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let mut keyless = config();
        keyless.api_key.clear();
        let h = harness(keyless);
        h.host.insert(news_item(5));
        let err = h.orchestrator.generate(&GenerateRequest::new(5)).unwrap_err();
        assert_eq!(err, PipelineError::Config(ConfigError::MissingApiKey));
        assert!(h.transport.requests().is_empty());
    }

    #[test]
    fn ingestion_failure_leaves_item_untouched() {
        let h = harness(config());
        h.host.insert(news_item(6));
        h.transport.push_json(200, json!({"data": {"task_id": "t"}}));
        h.transport.push_json(
            200,
            json!({"data": {"status": "COMPLETED", "generated": ["https://cdn.test/out.png"]}}),
        );
        h.transport.push(Ok(HttpReply::new(200, vec![1u8; 20])));

        let err = h.orchestrator.generate(&GenerateRequest::new(6)).unwrap_err();
        assert!(matches!(err, PipelineError::Ingestion(IngestionError::InvalidImage(_))));
        assert!(h.host.record(6).featured_asset.is_none());
        assert!(h.host.provenance(6).is_none());
        assert!(h.assets.ids().is_empty());
    }

    #[test]
    fn persist_failure_is_reported() {
        let h = harness(config());
        h.host.insert(news_item(7));
        h.assets.reject_writes.store(true, Ordering::SeqCst);
        script_success(&h.transport, "t");

        let err = h.orchestrator.generate(&GenerateRequest::new(7)).unwrap_err();
        assert!(matches!(err, PipelineError::Ingestion(IngestionError::PersistFailed(_))));
        assert!(h.host.record(7).featured_asset.is_none());
    }

    #[test]
    fn rejected_provenance_rolls_back_attachment() {
        let h = harness(config());
        h.host.insert(news_item(8));
        h.host.reject_provenance.store(true, Ordering::SeqCst);
        script_success(&h.transport, "t");

        let err = h.orchestrator.generate(&GenerateRequest::new(8)).unwrap_err();
        assert!(matches!(err, PipelineError::Host(_)));
        assert!(h.host.record(8).featured_asset.is_none());
        assert!(h.assets.ids().is_empty());
    }

    #[test]
    fn generation_errors_surface_unchanged() {
        let h = harness(config());
        h.host.insert(news_item(9));
        h.transport.push_json(200, json!({"data": {"task_id": "t-9"}}));
        h.transport.push_json(200, json!({"data": {"status": "FAILED"}}));

        let err = h.orchestrator.generate(&GenerateRequest::new(9)).unwrap_err();
        assert_eq!(
            err,
            PipelineError::Generation(GenerationError::JobFailed {
                task_id: "t-9".to_string()
            })
        );
        assert_eq!(err.code(), "job_failed");
    }

    #[test]
    fn stages_are_written_to_activity_log() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let mut h = harness(config());
        h.orchestrator = h
            .orchestrator
            .with_activity_log(ActivityLog::new(&events_path, "run-1"));
        h.host.insert(news_item(10));
        script_success(&h.transport, "t");
        h.orchestrator.generate(&GenerateRequest::new(10))?;

        let events = ActivityLog::read_events(&events_path)?;
        let kinds: Vec<&str> = events.iter().map(|event| event.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["style_resolved", "prompt_built", "submitted", "polling", "ingesting", "attached"]
        );
        assert!(events
            .iter()
            .all(|event| event.run_id == "run-1" && event.content_id == Some(10)));
        assert_eq!(events[2].details["task_id"], json!("t"));
        Ok(())
    }

    #[test]
    fn custom_prompt_saves_without_attaching() -> anyhow::Result<()> {
        let h = harness(config());
        h.host.insert(news_item(11));
        script_success(&h.transport, "t-11");

        let custom = h
            .orchestrator
            .generate_custom("  a lighthouse at dawn ", Some(11))?;
        assert_eq!(custom.prompt, "a lighthouse at dawn");
        assert_eq!(custom.image_url.as_deref(), Some("https://cdn.test/out.png"));
        assert!(custom.asset.is_some());
        assert_eq!(h.assets.ids().len(), 1);
        assert!(h.assets.filenames()[0].starts_with("headliner-post-11-"));
        assert!(h.host.record(11).featured_asset.is_none());
        assert!(h.host.provenance(11).is_none());

        let body = h.transport.requests()[0].body.clone().unwrap_or_default();
        assert_eq!(body["prompt"], "a lighthouse at dawn");
        Ok(())
    }

    #[test]
    fn custom_prompt_checks_item_before_network() {
        let h = harness(config());
        let err = h.orchestrator.generate_custom("anything", Some(99)).unwrap_err();
        assert_eq!(err, PipelineError::NotFound(99));
        assert!(h.transport.requests().is_empty());

        let empty = h.orchestrator.generate_custom("   ", None).unwrap_err();
        assert!(matches!(empty, PipelineError::InvalidRequest(_)));
        assert_eq!(empty.status(), 400);
    }

    #[test]
    fn custom_prompt_survives_failed_save() -> anyhow::Result<()> {
        let h = harness(config());
        h.host.insert(news_item(12));
        h.assets.reject_writes.store(true, Ordering::SeqCst);
        script_success(&h.transport, "t");

        let custom = h.orchestrator.generate_custom("harbor", Some(12))?;
        assert!(custom.asset.is_none());
        assert!(custom.image_url.is_some());
        Ok(())
    }

    fn publish(id: u64, previous: Option<ContentStatus>) -> PublishEvent {
        PublishEvent {
            content_id: id,
            content_type: "post".to_string(),
            previous_status: previous,
            status: ContentStatus::Published,
        }
    }

    #[test]
    fn publish_trigger_respects_settings_and_history() -> anyhow::Result<()> {
        let disabled = harness(config());
        disabled.host.insert(news_item(20));
        assert!(matches!(
            disabled.orchestrator.on_publish(&publish(20, Some(ContentStatus::Draft)))?,
            PublishOutcome::Skipped(_)
        ));

        let mut enabled = config();
        enabled.auto_generate = true;
        let h = harness(enabled);
        h.host.insert(news_item(21));
        let mut page = ContentRecord::new(22, "About us");
        page.content_type = "page".to_string();
        h.host.insert(page);

        let mut page_event = publish(22, Some(ContentStatus::Draft));
        page_event.content_type = "page".to_string();
        assert!(matches!(h.orchestrator.on_publish(&page_event)?, PublishOutcome::Skipped(_)));

        let update = publish(21, Some(ContentStatus::Published));
        assert!(matches!(h.orchestrator.on_publish(&update)?, PublishOutcome::Skipped(_)));

        let mut draft_save = publish(21, None);
        draft_save.status = ContentStatus::Draft;
        assert!(matches!(h.orchestrator.on_publish(&draft_save)?, PublishOutcome::Skipped(_)));
        assert!(h.transport.requests().is_empty());

        script_success(&h.transport, "t-21");
        let outcome = h.orchestrator.on_publish(&publish(21, Some(ContentStatus::Draft)))?;
        assert!(matches!(outcome, PublishOutcome::Generated(_)));
        assert!(h.host.record(21).has_featured_asset());

        let again = h.orchestrator.on_publish(&publish(21, None))?;
        assert_eq!(again, PublishOutcome::Skipped(ALREADY_HAS_IMAGE.to_string()));
        Ok(())
    }

    #[test]
    fn republish_after_removing_generated_image_does_not_regenerate() -> anyhow::Result<()> {
        let mut enabled = config();
        enabled.auto_generate = true;
        let h = harness(enabled);
        h.host.insert(news_item(23));

        script_success(&h.transport, "t-23");
        let first = h.orchestrator.on_publish(&publish(23, Some(ContentStatus::Draft)))?;
        assert!(matches!(first, PublishOutcome::Generated(_)));
        let calls = h.transport.requests().len();

        ContentHost::set_featured_asset(&*h.host, 23, None)?;
        let republish = h.orchestrator.on_publish(&publish(23, Some(ContentStatus::Draft)))?;
        assert_eq!(republish, PublishOutcome::Skipped(PREVIOUSLY_GENERATED.to_string()));
        assert_eq!(h.transport.requests().len(), calls);
        assert!(!h.host.record(23).has_featured_asset());

        script_success(&h.transport, "t-23b");
        let forced = h.orchestrator.generate(&GenerateRequest::new(23).force(true))?;
        assert!(matches!(forced, GenerateOutcome::Generated(_)));
        Ok(())
    }

    #[test]
    fn preview_builds_prompt_offline() -> anyhow::Result<()> {
        let h = harness(config());
        h.host.insert(news_item(30));
        let preview = h.orchestrator.preview_prompt(30, Some("technology"))?;
        assert_eq!(preview.style_key, "technology");
        assert_eq!(preview.category_name, "News");
        assert!(preview.prompt.contains("teal and cyan tones"));
        assert!(h.transport.requests().is_empty());
        Ok(())
    }

    #[test]
    fn connection_test_uses_configured_key_by_default() {
        let h = harness(config());
        h.transport.push(Ok(HttpReply::new(200, "{}")));
        let check = h.orchestrator.test_connection(None);
        assert!(check.success);
        let requests = h.transport.requests();
        assert_eq!(requests[0].headers[0].1, "test-key");
    }
}
