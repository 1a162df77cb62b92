use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use headliner_contracts::assets::DirectoryAssetStore;
use headliner_contracts::config::GenerationConfig;
use headliner_contracts::content::{ContentId, ContentLibrary, ContentStatus};
use headliner_contracts::events::ActivityLog;
use headliner_engine::prompt::unknown_placeholders;
use headliner_engine::{
    spawn_generation, GenerateOutcome, GenerateRequest, HttpTransport, LibraryHost, Orchestrator,
    PipelineError, PublishEvent, PublishOutcome, ReqwestTransport,
};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "headliner", version, about = "Generate featured images for content items")]
struct Cli {
    /// Settings JSON; defaults apply when the file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, default_value = "content.json")]
    library: PathBuf,
    #[arg(long, global = true, default_value = "assets")]
    assets: PathBuf,
    /// Public URL prefix for stored assets.
    #[arg(long, global = true)]
    asset_base_url: Option<String>,
    /// Append pipeline events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Custom(CustomArgs),
    Publish(PublishArgs),
    Prompt(PromptArgs),
    Styles,
    TestConnection(TestConnectionArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    id: ContentId,
    #[arg(long)]
    force: bool,
    #[arg(long)]
    style: Option<String>,
    /// Stop waiting after this many seconds; the remote job is not cancelled.
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Debug, Parser)]
struct CustomArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    id: Option<ContentId>,
}

#[derive(Debug, Parser)]
struct PublishArgs {
    #[arg(long)]
    id: ContentId,
}

#[derive(Debug, Parser)]
struct PromptArgs {
    #[arg(long)]
    id: ContentId,
    #[arg(long)]
    style: Option<String>,
}

#[derive(Debug, Parser)]
struct TestConnectionArgs {
    /// Key to check instead of the configured one.
    #[arg(long)]
    api_key: Option<String>,
}

struct Output {
    body: Value,
    code: i32,
}

impl Output {
    fn ok(body: Value) -> Self {
        Self { body, code: 0 }
    }

    fn failure(err: &PipelineError) -> Self {
        Self {
            body: json!({
                "success": false,
                "error": err.to_string(),
                "code": err.code(),
                "status": err.status(),
            }),
            code: 1,
        }
    }
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("headliner error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("headliner=info,warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = GenerationConfig::load(cli.config.as_deref())?;
    for warning in config.unrecognized_values() {
        warn!("{warning}; sending it unchanged");
    }
    let output = execute(&cli, config)?;
    println!("{}", serde_json::to_string_pretty(&output.body)?);
    Ok(output.code)
}

fn execute(cli: &Cli, config: GenerationConfig) -> Result<Output> {
    match &cli.command {
        Command::Styles => Ok(Output::ok(styles_json(&config))),
        Command::TestConnection(args) => {
            let orchestrator = build_orchestrator(cli, config)?;
            let check = orchestrator.test_connection(args.api_key.as_deref());
            let code = if check.success { 0 } else { 1 };
            Ok(Output {
                body: serde_json::to_value(check)?,
                code,
            })
        }
        Command::Prompt(args) => {
            let unknown = unknown_placeholders(&config.prompt_template);
            let orchestrator = build_orchestrator(cli, config)?;
            Ok(
                match orchestrator.preview_prompt(args.id, args.style.as_deref()) {
                    Ok(preview) => {
                        let mut body = serde_json::to_value(preview)?;
                        body["unknown_placeholders"] = json!(unknown);
                        Output::ok(body)
                    }
                    Err(err) => Output::failure(&err),
                },
            )
        }
        Command::Generate(args) => {
            let orchestrator = build_orchestrator(cli, config)?;
            let mut request = GenerateRequest::new(args.id).force(args.force);
            if let Some(style) = &args.style {
                request = request.with_style(style);
            }
            let result = match args.timeout {
                Some(seconds) => {
                    let pending = spawn_generation(Arc::new(orchestrator), request)
                        .context("failed to start generation worker")?;
                    match pending.wait_timeout(Duration::from_secs(seconds)) {
                        Some(result) => result,
                        None => {
                            return Ok(Output {
                                body: json!({
                                    "success": false,
                                    "error": format!("no result after {seconds} seconds"),
                                    "code": "timeout",
                                }),
                                code: 2,
                            })
                        }
                    }
                }
                None => orchestrator.generate(&request),
            };
            Ok(match result {
                Ok(outcome) => generate_outcome_json(outcome),
                Err(err) => Output::failure(&err),
            })
        }
        Command::Custom(args) => {
            let orchestrator = build_orchestrator(cli, config)?;
            Ok(match orchestrator.generate_custom(&args.prompt, args.id) {
                Ok(image) => {
                    let mut body = json!({
                        "success": true,
                        "image_url": image.image_url,
                        "prompt": image.prompt,
                        "task_id": image.task_id,
                    });
                    if let Some(asset) = image.asset {
                        body["asset_id"] = json!(asset.id);
                        body["asset_url"] = json!(asset.url);
                    }
                    Output::ok(body)
                }
                Err(err) => Output::failure(&err),
            })
        }
        Command::Publish(args) => {
            let mut library = ContentLibrary::open(cli.library.clone())?;
            let content_type = library
                .get(args.id)
                .map(|entry| entry.record.content_type.clone())
                .with_context(|| format!("content item {} not found", args.id))?;
            let previous = library.set_status(args.id, ContentStatus::Published)?;
            info!(content_id = args.id, ?previous, "content published");

            let orchestrator = build_orchestrator(cli, config)?;
            let event = PublishEvent {
                content_id: args.id,
                content_type,
                previous_status: Some(previous),
                status: ContentStatus::Published,
            };
            Ok(match orchestrator.on_publish(&event) {
                Ok(PublishOutcome::Generated(image)) => {
                    generate_outcome_json(GenerateOutcome::Generated(image))
                }
                Ok(PublishOutcome::Skipped(reason)) => Output::ok(json!({
                    "success": true,
                    "generated": false,
                    "message": reason,
                })),
                Err(err) => Output::failure(&err),
            })
        }
    }
}

fn build_orchestrator(cli: &Cli, config: GenerationConfig) -> Result<Orchestrator> {
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new());
    let host = LibraryHost::open(cli.library.clone())
        .with_context(|| format!("failed to open {}", cli.library.display()))?;
    let assets = DirectoryAssetStore::with_base_url(cli.assets.clone(), cli.asset_base_url.clone());
    let mut orchestrator = Orchestrator::new(config, Arc::new(host), Arc::new(assets), transport);
    if let Some(path) = &cli.events {
        orchestrator =
            orchestrator.with_activity_log(ActivityLog::new(path.clone(), Uuid::new_v4().to_string()));
    }
    Ok(orchestrator)
}

fn generate_outcome_json(outcome: GenerateOutcome) -> Output {
    match outcome {
        GenerateOutcome::Generated(image) => Output::ok(json!({
            "success": true,
            "asset_id": image.asset_id,
            "asset_url": image.asset_url,
            "prompt": image.prompt,
            "category": image.category,
            "style_key": image.style_key,
            "task_id": image.task_id,
            "mime_type": image.mime_type,
            "transcode_error": image.transcode_error,
        })),
        GenerateOutcome::Skipped { reason } => Output::ok(json!({
            "success": false,
            "message": reason,
        })),
    }
}

fn styles_json(config: &GenerationConfig) -> Value {
    let styles: Vec<Value> = config
        .styles
        .iter()
        .map(|(key, style)| {
            json!({
                "key": key,
                "name": style.display_name,
                "colors": style.colors,
                "elements": style.elements,
                "mood": style.mood,
            })
        })
        .collect();
    json!({ "styles": styles })
}
