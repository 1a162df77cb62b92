use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const DEFAULT_STYLE_KEY: &str = "default";

/// Style key recorded when the style was picked from the content category.
pub const AUTO_STYLE_KEY: &str = "auto";

pub type StyleMap = IndexMap<String, StyleDescriptor>;

/// Visual hints used to steer prompt construction for one category.
///
/// Empty fields are treated as unset by the prompt builder, which substitutes
/// generic wording for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StyleDescriptor {
    #[serde(skip)]
    pub key: String,
    #[serde(rename = "name", default)]
    pub display_name: String,
    #[serde(default)]
    pub colors: String,
    #[serde(default)]
    pub elements: String,
    #[serde(default)]
    pub mood: String,
}

impl StyleDescriptor {
    pub fn new(key: &str, display_name: &str, colors: &str, elements: &str, mood: &str) -> Self {
        Self {
            key: key.to_string(),
            display_name: display_name.to_string(),
            colors: colors.to_string(),
            elements: elements.to_string(),
            mood: mood.to_string(),
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = key.to_string();
        self
    }
}

pub fn builtin_default_style() -> StyleDescriptor {
    StyleDescriptor::new(
        DEFAULT_STYLE_KEY,
        "Default",
        "teal and white tones",
        "financial charts, business elements",
        "professional and trustworthy",
    )
}

pub fn builtin_styles() -> StyleMap {
    let mut map = IndexMap::new();
    let mut insert = |style: StyleDescriptor| {
        map.insert(style.key.clone(), style);
    };

    insert(builtin_default_style());
    insert(StyleDescriptor::new(
        "taxes",
        "Taxes",
        "warm amber and gold tones",
        "calendar, documents, calculator, euro coins",
        "professional and organized",
    ));
    insert(StyleDescriptor::new(
        "invoicing",
        "Invoicing",
        "blue and white tones",
        "invoices, receipts, digital documents, laptop",
        "modern and efficient",
    ));
    insert(StyleDescriptor::new(
        "business",
        "Business Tips",
        "green and teal tones",
        "growth charts, lightbulb, business icons",
        "inspiring and helpful",
    ));
    insert(StyleDescriptor::new(
        "news",
        "News",
        "purple and violet tones",
        "newspaper, notifications, megaphone",
        "dynamic and informative",
    ));
    insert(StyleDescriptor::new(
        "technology",
        "Technology",
        "teal and cyan tones",
        "dashboard, integration icons, connected devices",
        "tech-forward and seamless",
    ));

    map
}

/// Lowercases a slug-like identifier and drops everything outside `[a-z0-9_-]`.
pub fn sanitize_key(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-')
        .collect()
}
