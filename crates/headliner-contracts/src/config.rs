use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::styles::{builtin_styles, sanitize_key, StyleMap};

pub const DEFAULT_API_BASE: &str = "https://api.freepik.com/v1";
pub const DEFAULT_MODEL: &str = "mystic";

pub const KNOWN_SUB_MODELS: &[&str] = &["zen", "flexible", "fluid"];
pub const KNOWN_ASPECT_RATIOS: &[&str] = &[
    "square_1_1",
    "classic_4_3",
    "traditional_3_2",
    "horizontal_2_1",
    "widescreen_16_9",
    "panoramic_21_9",
    "social_story_9_16",
];
pub const KNOWN_RESOLUTIONS: &[&str] = &["1k", "2k"];

pub const DEFAULT_PROMPT_TEMPLATE: &str = concat!(
    "Create a professional blog header illustration for an article titled '{title}'. ",
    "Style: {style_description}. ",
    "Include visual elements: {elements}. ",
    "Mood: {mood}. ",
    "CRITICAL: Absolutely NO text, NO letters, NO words, NO numbers, NO typography, ",
    "NO writing, NO captions, NO labels, NO signs anywhere in the image - the image must ",
    "be completely text-free. ",
    "If currency symbols are used, use Euro (\u{20ac}) symbol, never US Dollar ($). ",
    "Clean simple background, professional corporate style. ",
    "High quality, sharp details, photorealistic rendering."
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Keep the bytes exactly as the API returned them.
    Original,
    #[serde(alias = "jpeg")]
    Jpg,
    Png,
    #[default]
    Webp,
    Avif,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Original => "original",
            OutputFormat::Jpg => "jpg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
        }
    }

    pub fn mime_type(self) -> Option<&'static str> {
        match self {
            OutputFormat::Original => None,
            OutputFormat::Jpg => Some("image/jpeg"),
            OutputFormat::Png => Some("image/png"),
            OutputFormat::Webp => Some("image/webp"),
            OutputFormat::Avif => Some("image/avif"),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(OutputFormat::Original),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            "png" => Ok(OutputFormat::Png),
            "webp" => Ok(OutputFormat::Webp),
            "avif" => Ok(OutputFormat::Avif),
            other => Err(format!("unknown output format '{other}'")),
        }
    }
}

/// Settings snapshot for one generation run.
///
/// Field names follow the settings document written by the admin screen, so
/// `system_prompt`, `category_styles` and `post_types` are accepted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub sub_model: String,
    pub aspect_ratio: String,
    pub resolution: String,
    pub creative_detailing: u32,
    pub output_format: OutputFormat,
    pub output_quality: u32,
    #[serde(rename = "system_prompt", alias = "prompt_template")]
    pub prompt_template: String,
    #[serde(rename = "category_styles", alias = "styles")]
    pub styles: StyleMap,
    #[serde(rename = "post_types", alias = "content_types")]
    pub content_types: Vec<String>,
    pub auto_generate: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            sub_model: "flexible".to_string(),
            aspect_ratio: "horizontal_2_1".to_string(),
            resolution: "1k".to_string(),
            creative_detailing: 50,
            output_format: OutputFormat::Webp,
            output_quality: 85,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            styles: builtin_styles(),
            content_types: vec!["post".to_string()],
            auto_generate: false,
        }
    }
}

impl GenerationConfig {
    /// Reads the settings file (defaults when it does not exist), applies the
    /// `FREEPIK_*` environment overrides and sanitizes the result.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed reading {}", path.display()))?;
                serde_json::from_str::<GenerationConfig>(&raw)
                    .with_context(|| format!("invalid settings JSON in {}", path.display()))?
            }
            _ => GenerationConfig::default(),
        };
        config.apply_env_overrides();
        Ok(config.sanitized())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = non_empty_env("FREEPIK_API_KEY") {
            self.api_key = key;
        }
        if let Some(base) = non_empty_env("FREEPIK_API_BASE") {
            self.api_base = base;
        }
    }

    pub fn sanitized(mut self) -> Self {
        self.api_key = self.api_key.trim().to_string();
        self.api_base = self.api_base.trim().trim_end_matches('/').to_string();
        if self.api_base.is_empty() {
            self.api_base = DEFAULT_API_BASE.to_string();
        }
        self.model = self.model.trim().to_ascii_lowercase();
        if self.model.is_empty() {
            self.model = DEFAULT_MODEL.to_string();
        }
        self.sub_model = self.sub_model.trim().to_string();
        self.aspect_ratio = self.aspect_ratio.trim().to_string();
        self.resolution = self.resolution.trim().to_string();
        self.creative_detailing = self.creative_detailing.min(100);
        self.output_quality = self.output_quality.min(100);
        if self.prompt_template.trim().is_empty() {
            self.prompt_template = DEFAULT_PROMPT_TEMPLATE.to_string();
        }

        let mut styles = StyleMap::new();
        for (raw_key, style) in std::mem::take(&mut self.styles) {
            let key = sanitize_key(&raw_key);
            if key.is_empty() {
                continue;
            }
            styles.insert(key.clone(), style.with_key(&key));
        }
        self.styles = if styles.is_empty() {
            builtin_styles()
        } else {
            styles
        };

        let mut content_types = Vec::new();
        for raw in &self.content_types {
            let key = sanitize_key(raw);
            if !key.is_empty() && !content_types.contains(&key) {
                content_types.push(key);
            }
        }
        self.content_types = content_types;
        self
    }

    /// Values the remote API is not known to accept. They are still sent.
    pub fn unrecognized_values(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let mut check = |field: &str, value: &str, known: &[&str]| {
            if !known.contains(&value) {
                warnings.push(format!("{field} '{value}' is not a known value"));
            }
        };
        check("sub_model", &self.sub_model, KNOWN_SUB_MODELS);
        check("aspect_ratio", &self.aspect_ratio, KNOWN_ASPECT_RATIOS);
        check("resolution", &self.resolution, KNOWN_RESOLUTIONS);
        warnings
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn is_eligible_content_type(&self, content_type: &str) -> bool {
        let key = sanitize_key(content_type);
        self.content_types.iter().any(|candidate| candidate == &key)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
