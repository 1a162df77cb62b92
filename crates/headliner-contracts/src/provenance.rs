use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Marks a featured image as generated and records what produced it.
///
/// Hosts keep this next to the content item so a generated image can be told
/// apart from one an editor set by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub generated: bool,
    pub prompt: String,
    pub category: String,
    pub style_key: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    pub generated_at: String,
}

impl ProvenanceRecord {
    pub fn new(
        prompt: impl Into<String>,
        category: impl Into<String>,
        style_key: impl Into<String>,
    ) -> Self {
        Self {
            generated: true,
            prompt: prompt.into(),
            category: category.into(),
            style_key: style_key.into(),
            model: None,
            task_id: None,
            generated_at: now_utc_iso(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
