use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::content::ContentId;

pub type EventPayload = Map<String, Value>;

/// One line of `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub run_id: String,
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<ContentId>,
    /// Stage-specific fields, written inline next to the envelope.
    #[serde(flatten)]
    pub details: EventPayload,
}

/// Append-only pipeline activity log, one compact JSON object per line.
///
/// Envelope keys (`type`, `run_id`, `ts`, `content_id`) are reserved and are
/// dropped from caller details.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    inner: Arc<ActivityLogInner>,
}

#[derive(Debug)]
struct ActivityLogInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

const RESERVED_KEYS: &[&str] = &["type", "run_id", "ts", "content_id"];

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ActivityLogInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn record(
        &self,
        kind: &str,
        content_id: Option<ContentId>,
        mut details: EventPayload,
    ) -> anyhow::Result<ActivityEvent> {
        details.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
        let event = ActivityEvent {
            kind: kind.to_string(),
            run_id: self.inner.run_id.clone(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            content_id,
            details,
        };
        let line = serde_json::to_string(&event)?;

        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("activity log lock poisoned"))?;
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .with_context(|| format!("failed to open {}", self.inner.path.display()))?;
        writeln!(file, "{line}")?;
        Ok(event)
    }

    /// Every event in the file, across runs. A missing file reads as empty.
    pub fn read_events(path: &Path) -> anyhow::Result<Vec<ActivityEvent>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("invalid activity event on line {} of {}", idx + 1, path.display())
                })
            })
            .collect()
    }
}
