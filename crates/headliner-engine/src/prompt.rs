use std::sync::LazyLock;

use headliner_contracts::content::ContentRecord;
use headliner_contracts::styles::StyleDescriptor;
use regex::Regex;

pub const EXCERPT_WORD_LIMIT: usize = 20;
pub const ELLIPSIS: &str = "...";

const FALLBACK_COLORS: &str = "professional colors";
const FALLBACK_ELEMENTS: &str = "business elements";
const FALLBACK_MOOD: &str = "professional";

const PLACEHOLDERS: &[&str] = &[
    "title",
    "style_description",
    "elements",
    "mood",
    "category",
    "excerpt",
];

static SCRIPT_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("valid regex")
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("valid regex"));

/// Inputs derived from a content item before rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub title: String,
    pub category_name: String,
    pub category_slug: String,
    /// Plain text, already cut to [`EXCERPT_WORD_LIMIT`] words.
    pub excerpt: String,
    pub style: StyleDescriptor,
}

impl PromptContext {
    /// `category_slug` names the item's category, which may differ from
    /// `style.key` when a style override is in play.
    pub fn new(
        title: &str,
        raw_excerpt: &str,
        category_name: &str,
        category_slug: &str,
        style: StyleDescriptor,
    ) -> Self {
        Self {
            title: title.to_string(),
            category_name: category_name.to_string(),
            category_slug: category_slug.to_string(),
            excerpt: summarize(raw_excerpt),
            style,
        }
    }

    pub fn from_record(record: &ContentRecord, style: StyleDescriptor) -> Self {
        Self {
            title: record.title.clone(),
            category_name: record.category_name().to_string(),
            category_slug: record.category_slug().to_string(),
            excerpt: summarize(record.summary_source()),
            style,
        }
    }

    pub fn render(&self, template: &str) -> String {
        substitute(template, |name| match name {
            "title" => Some(self.title.as_str()),
            "style_description" => Some(or_fallback(&self.style.colors, FALLBACK_COLORS)),
            "elements" => Some(or_fallback(&self.style.elements, FALLBACK_ELEMENTS)),
            "mood" => Some(or_fallback(&self.style.mood, FALLBACK_MOOD)),
            "category" => Some(self.category_name.as_str()),
            "excerpt" => Some(self.excerpt.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: String,
}

impl PromptBuilder {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Renders from loose fields. No slug is known here and none is rendered.
    pub fn build(
        &self,
        content_title: &str,
        content_excerpt: &str,
        category_name: &str,
        style: &StyleDescriptor,
    ) -> String {
        PromptContext::new(content_title, content_excerpt, category_name, "", style.clone())
            .render(&self.template)
    }

    pub fn build_for(&self, record: &ContentRecord, style: &StyleDescriptor) -> String {
        PromptContext::from_record(record, style.clone()).render(&self.template)
    }
}

/// Placeholder-looking tokens in a template that the builder will leave as-is.
pub fn unknown_placeholders(template: &str) -> Vec<String> {
    let mut unknown = Vec::new();
    for captures in PLACEHOLDER_RE.captures_iter(template) {
        let name = &captures[1];
        if !PLACEHOLDERS.contains(&name) && !unknown.iter().any(|seen| seen == name) {
            unknown.push(name.to_string());
        }
    }
    unknown
}

/// Strips markup and keeps the first [`EXCERPT_WORD_LIMIT`] words.
pub fn summarize(raw: &str) -> String {
    trim_words(&strip_markup(raw), EXCERPT_WORD_LIMIT)
}

pub fn strip_markup(raw: &str) -> String {
    let without_blocks = SCRIPT_BLOCK_RE.replace_all(raw, " ");
    let without_tags = TAG_RE.replace_all(&without_blocks, " ");
    without_tags.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn trim_words(text: &str, limit: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= limit {
        return words.join(" ");
    }
    let mut trimmed = words[..limit].join(" ");
    trimmed.push_str(ELLIPSIS);
    trimmed
}

// Replacement values are appended verbatim, so a value containing `{title}`
// is never expanded again.
fn substitute<'a>(template: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replacement = after
            .find('}')
            .and_then(|close| lookup(&after[..close]).map(|value| (value, close)));
        match replacement {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn or_fallback<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use headliner_contracts::config::DEFAULT_PROMPT_TEMPLATE;
    use headliner_contracts::content::{CategoryRef, ContentRecord};
    use headliner_contracts::styles::{builtin_default_style, StyleDescriptor};

    use super::{strip_markup, summarize, unknown_placeholders, PromptBuilder, PromptContext};

    fn numbered_words(count: usize) -> String {
        (1..=count)
            .map(|n| format!("w{n}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn template_without_placeholders_is_unchanged() {
        let builder = PromptBuilder::new("A calm abstract header, no text.");
        let prompt = builder.build("Title", "Body", "News", &builtin_default_style());
        assert_eq!(prompt, "A calm abstract header, no text.");
    }

    #[test]
    fn all_placeholders_are_replaced() {
        let template = "{title}|{style_description}|{elements}|{mood}|{category}|{excerpt}";
        let style = StyleDescriptor::new("taxes", "Taxes", "amber", "calendar", "calm");
        let prompt = PromptBuilder::new(template).build("Q3 filing", "<p>Due soon</p>", "Taxes", &style);
        assert_eq!(prompt, "Q3 filing|amber|calendar|calm|Taxes|Due soon");
        for name in ["title", "style_description", "elements", "mood", "category", "excerpt"] {
            assert!(!prompt.contains(&format!("{{{name}}}")));
        }
    }

    #[test]
    fn substitution_is_single_pass() {
        let builder = PromptBuilder::new("{title} / {mood}");
        let prompt = builder.build("{mood}", "", "", &builtin_default_style());
        assert_eq!(prompt, "{mood} / professional and trustworthy");
    }

    #[test]
    fn unknown_and_unbalanced_braces_are_literal() {
        let builder = PromptBuilder::new("{{title}} {size} {title");
        let prompt = builder.build("Hello", "", "", &builtin_default_style());
        assert_eq!(prompt, "{Hello} {size} {title");
        assert_eq!(unknown_placeholders("{size} {title} {size}"), vec!["size"]);
    }

    #[test]
    fn missing_style_fields_use_generic_wording() {
        let style = StyleDescriptor::new("bare", "Bare", "", " ", "");
        let prompt = PromptBuilder::new("{style_description}; {elements}; {mood}")
            .build("t", "", "", &style);
        assert_eq!(prompt, "professional colors; business elements; professional");
    }

    #[test]
    fn long_body_is_cut_to_twenty_words() {
        let excerpt = summarize(&numbered_words(50));
        assert_eq!(excerpt, format!("{}...", numbered_words(20)));
        assert_eq!(excerpt.trim_end_matches("...").split_whitespace().count(), 20);

        let short = summarize(&numbered_words(5));
        assert_eq!(short, numbered_words(5));
        assert!(!short.ends_with("..."));

        assert_eq!(summarize(&numbered_words(20)), numbered_words(20));
    }

    #[test]
    fn markup_and_scripts_are_removed() {
        let html = "<p>Hello <b>world</b></p><script>alert('x')</script><style>p{}</style>\n again";
        assert_eq!(strip_markup(html), "Hello world again");
    }

    #[test]
    fn context_prefers_excerpt_and_defaults_category() {
        let mut record = ContentRecord::new(3, "Quarterly update");
        record.body = "Body words that should not appear".to_string();
        record.excerpt = "Short <em>summary</em>".to_string();
        let context = PromptContext::from_record(&record, builtin_default_style());
        assert_eq!(context.excerpt, "Short summary");
        assert_eq!(context.category_name, "General");
        assert_eq!(context.category_slug, "default");

        record.excerpt = "  ".to_string();
        record.category = Some(CategoryRef {
            slug: "news".to_string(),
            name: "News".to_string(),
        });
        let context = PromptContext::from_record(&record, builtin_default_style());
        assert_eq!(context.excerpt, "Body words that should not appear");
        assert_eq!(context.category_name, "News");
    }

    #[test]
    fn override_style_does_not_replace_category_slug() {
        let style = StyleDescriptor::new("tutorials", "Tutorials", "green", "laptop", "focused");
        let context = PromptContext::new("Title", "", "News", "news", style);
        assert_eq!(context.category_slug, "news");
        assert_eq!(context.style.key, "tutorials");

        let mut record = ContentRecord::new(4, "Title");
        record.category = Some(CategoryRef {
            slug: "news".to_string(),
            name: "News".to_string(),
        });
        let style = StyleDescriptor::new("tutorials", "Tutorials", "green", "laptop", "focused");
        assert_eq!(PromptContext::from_record(&record, style).category_slug, "news");
    }

    #[test]
    fn default_template_mentions_title_and_style() {
        let prompt = PromptBuilder::new(DEFAULT_PROMPT_TEMPLATE).build(
            "Invoices made easy",
            "",
            "Invoicing",
            &builtin_default_style(),
        );
        assert!(prompt.contains("titled 'Invoices made easy'"));
        assert!(prompt.contains("Style: teal and white tones."));
        assert!(!prompt.contains('{'));
    }
}
