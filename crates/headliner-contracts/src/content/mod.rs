mod library;

use serde::{Deserialize, Serialize};

pub use library::{ContentEntry, ContentLibrary};

pub const FALLBACK_CATEGORY_SLUG: &str = "default";
pub const FALLBACK_CATEGORY_NAME: &str = "General";

pub type ContentId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    #[default]
    Draft,
    Pending,
    #[serde(alias = "publish")]
    Published,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub slug: String,
    pub name: String,
}

/// What the pipeline reads from the content host for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: ContentId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub status: ContentStatus,
    #[serde(default)]
    pub category: Option<CategoryRef>,
    #[serde(default)]
    pub featured_asset: Option<String>,
}

impl ContentRecord {
    pub fn new(id: ContentId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            body: String::new(),
            excerpt: String::new(),
            content_type: default_content_type(),
            status: ContentStatus::Draft,
            category: None,
            featured_asset: None,
        }
    }

    pub fn has_featured_asset(&self) -> bool {
        self.featured_asset
            .as_deref()
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn category_slug(&self) -> &str {
        self.category
            .as_ref()
            .map(|category| category.slug.as_str())
            .filter(|slug| !slug.is_empty())
            .unwrap_or(FALLBACK_CATEGORY_SLUG)
    }

    pub fn category_name(&self) -> &str {
        self.category
            .as_ref()
            .map(|category| category.name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(FALLBACK_CATEGORY_NAME)
    }

    /// The hand-written excerpt when there is one, otherwise the body.
    pub fn summary_source(&self) -> &str {
        if self.excerpt.trim().is_empty() {
            &self.body
        } else {
            &self.excerpt
        }
    }
}

fn default_content_type() -> String {
    "post".to_string()
}
