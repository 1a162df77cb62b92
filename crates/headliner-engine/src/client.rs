use std::sync::Arc;
use std::time::Duration;

use headliner_contracts::config::GenerationConfig;
use headliner_contracts::models::{ModelFamily, ModelSelector, ModelSpec};
use reqwest::Url;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, GenerationError};
use crate::transport::{HttpReply, HttpTransport, Sleeper, ThreadSleeper};

pub const API_KEY_HEADER: &str = "x-freepik-api-key";

/// Sent with every submission; the generated headers must be text-free.
pub const NEGATIVE_PROMPT: &str = "text, letters, words, numbers, typography, writing, captions, labels, signs, watermarks, logos, titles, headlines, subtitles, inscriptions, characters, fonts, alphabet";

pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(10);

const FALLBACK_ERROR_MESSAGE: &str = "API request failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Longest time the poll loop can spend sleeping.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
        }
    }
}

/// Family-specific fields layered over the common submission body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRequest {
    Mystic {
        sub_model: String,
        creative_detailing: u32,
    },
    FluxFamily,
}

impl ModelRequest {
    pub fn for_model(model: &ModelSpec, config: &GenerationConfig) -> Self {
        match model.family {
            ModelFamily::Mystic => ModelRequest::Mystic {
                sub_model: config.sub_model.clone(),
                creative_detailing: config.creative_detailing.min(100),
            },
            ModelFamily::Flux => ModelRequest::FluxFamily,
        }
    }

    pub fn extend(&self, body: &mut Map<String, Value>) {
        if let ModelRequest::Mystic {
            sub_model,
            creative_detailing,
        } = self
        {
            body.insert("model".to_string(), json!(sub_model));
            body.insert("creative_detailing".to_string(), json!(creative_detailing));
        }
    }
}

/// Where the generated image can be read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ImageReference {
    Url(String),
    /// Base64 payload, possibly wrapped in a `data:` URL.
    Inline(String),
}

impl ImageReference {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match Url::parse(trimmed) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                ImageReference::Url(trimmed.to_string())
            }
            _ => ImageReference::Inline(trimmed.to_string()),
        }
    }

    pub fn as_url(&self) -> Option<&str> {
        match self {
            ImageReference::Url(url) => Some(url),
            ImageReference::Inline(_) => None,
        }
    }

    /// The URL, or the inline payload as-is.
    pub fn as_str(&self) -> &str {
        match self {
            ImageReference::Url(value) | ImageReference::Inline(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    InProgress,
    Completed,
    Failed,
    TimedOut,
    /// Anything else the API reports, including unreadable replies.
    Unknown,
}

impl JobStatus {
    pub fn from_api(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CREATED" => JobStatus::Created,
            "IN_PROGRESS" => JobStatus::InProgress,
            "COMPLETED" => JobStatus::Completed,
            "FAILED" => JobStatus::Failed,
            _ => JobStatus::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub prompt: String,
    pub model: ModelSpec,
    pub fallback_reason: Option<String>,
    pub endpoint: String,
    pub body: Value,
}

/// One remote generation task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationJob {
    pub prompt: String,
    pub model_id: String,
    pub task_id: String,
    pub poll_url: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub result: Option<ImageReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionCheck {
    pub success: bool,
    pub message: String,
}

impl ConnectionCheck {
    fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct GenerationClient {
    transport: Arc<dyn HttpTransport>,
    sleeper: Arc<dyn Sleeper>,
    policy: PollPolicy,
    selector: ModelSelector,
}

impl GenerationClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            sleeper: Arc::new(ThreadSleeper),
            policy: PollPolicy::default(),
            selector: ModelSelector::default(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_selector(mut self, selector: ModelSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Picks the model and builds the submission body without sending it.
    pub fn prepare(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<SubmissionRequest, GenerationError> {
        let selection = self
            .selector
            .select(Some(&config.model))
            .map_err(ConfigError::NoModel)?;
        let mut body = Map::new();
        body.insert("prompt".to_string(), json!(prompt));
        body.insert("negative_prompt".to_string(), json!(NEGATIVE_PROMPT));
        body.insert("aspect_ratio".to_string(), json!(config.aspect_ratio));
        body.insert("resolution".to_string(), json!(config.resolution));
        ModelRequest::for_model(&selection.model, config).extend(&mut body);

        Ok(SubmissionRequest {
            prompt: prompt.to_string(),
            endpoint: selection.model.endpoint(&config.api_base),
            model: selection.model,
            fallback_reason: selection.fallback_reason,
            body: Value::Object(body),
        })
    }

    pub fn submit(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<GenerationJob, GenerationError> {
        if !config.has_api_key() {
            return Err(ConfigError::MissingApiKey.into());
        }
        let request = self.prepare(prompt, config)?;
        if let Some(reason) = request.fallback_reason.as_deref() {
            warn!(model = %config.model, "{reason}");
        }

        let reply = self
            .transport
            .post_json(
                &request.endpoint,
                &[(API_KEY_HEADER, config.api_key.as_str())],
                &request.body,
                SUBMIT_TIMEOUT,
            )
            .map_err(|err| GenerationError::RequestFailed {
                status: None,
                message: err.message,
            })?;
        let payload = expect_success(&reply)?;
        let task_id = payload
            .pointer("/data/task_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GenerationError::MalformedResponse("No task_id in response".to_string()))?;

        info!(task_id, model = %request.model.id, "generation task submitted");
        Ok(GenerationJob {
            prompt: request.prompt,
            model_id: request.model.id,
            task_id: task_id.to_string(),
            poll_url: format!("{}/{}", request.endpoint, task_id),
            status: JobStatus::Created,
            attempts: 0,
            result: None,
        })
    }

    /// Polls until the job is terminal or the attempt budget is spent.
    ///
    /// Transport errors on individual polls count as "not ready yet".
    pub fn wait(
        &self,
        job: &mut GenerationJob,
        api_key: &str,
    ) -> Result<ImageReference, GenerationError> {
        let headers = [(API_KEY_HEADER, api_key)];
        while job.attempts < self.policy.max_attempts {
            self.sleeper.sleep(self.policy.interval);
            job.attempts += 1;
            let attempt = job.attempts;

            let reply = match self
                .transport
                .get(&job.poll_url, &headers, POLL_REQUEST_TIMEOUT)
            {
                Ok(reply) => reply,
                Err(err) => {
                    debug!(task_id = %job.task_id, attempt, error = %err, "poll request failed");
                    continue;
                }
            };
            let Some(payload) = reply.parse_json() else {
                job.status = JobStatus::Unknown;
                debug!(task_id = %job.task_id, attempt, status = reply.status, "unreadable poll reply");
                continue;
            };
            let data = payload.get("data").unwrap_or(&Value::Null);
            job.status = data
                .get("status")
                .and_then(Value::as_str)
                .map(JobStatus::from_api)
                .unwrap_or(JobStatus::Unknown);
            debug!(task_id = %job.task_id, attempt, status = ?job.status, "polled generation task");

            match job.status {
                JobStatus::Completed => {
                    if let Some(reference) = first_generated(data) {
                        info!(task_id = %job.task_id, attempt, "generation completed");
                        job.result = Some(reference.clone());
                        return Ok(reference);
                    }
                }
                JobStatus::Failed => {
                    return Err(GenerationError::JobFailed {
                        task_id: job.task_id.clone(),
                    });
                }
                _ => {}
            }
        }

        job.status = JobStatus::TimedOut;
        Err(GenerationError::Timeout {
            task_id: job.task_id.clone(),
            attempts: job.attempts,
            waited: self.policy.interval * job.attempts,
        })
    }

    pub fn submit_and_wait(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<ImageReference, GenerationError> {
        let mut job = self.submit(prompt, config)?;
        self.wait(&mut job, &config.api_key)
    }

    pub fn test_connection(&self, api_key: &str, api_base: &str) -> ConnectionCheck {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return ConnectionCheck::new(false, ConfigError::MissingApiKey.to_string());
        }
        let url = format!("{}/resources", api_base.trim().trim_end_matches('/'));
        match self
            .transport
            .get(&url, &[(API_KEY_HEADER, api_key)], CONNECTION_TEST_TIMEOUT)
        {
            Ok(reply) if reply.status == 200 => ConnectionCheck::new(true, "Connection successful!"),
            Ok(reply) if reply.status == 401 => ConnectionCheck::new(false, "Invalid API key"),
            Ok(reply) => {
                ConnectionCheck::new(false, format!("API returned status {}", reply.status))
            }
            Err(err) => ConnectionCheck::new(false, err.message),
        }
    }
}

fn expect_success(reply: &HttpReply) -> Result<Value, GenerationError> {
    let payload = reply.parse_json();
    if !reply.is_success() {
        let message = payload
            .as_ref()
            .and_then(|value| value.get("message"))
            .and_then(Value::as_str)
            .filter(|message| !message.trim().is_empty())
            .unwrap_or(FALLBACK_ERROR_MESSAGE);
        return Err(GenerationError::RequestFailed {
            status: Some(reply.status),
            message: message.to_string(),
        });
    }
    payload.ok_or_else(|| {
        GenerationError::MalformedResponse(format!(
            "response is not JSON: {}",
            reply.text_snippet(200)
        ))
    })
}

fn first_generated(data: &Value) -> Option<ImageReference> {
    data.get("generated")?
        .as_array()?
        .iter()
        .find_map(|entry| entry.as_str().filter(|value| !value.trim().is_empty()))
        .map(ImageReference::parse)
}
