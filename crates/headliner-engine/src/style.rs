use headliner_contracts::styles::{
    builtin_default_style, sanitize_key, StyleDescriptor, StyleMap, AUTO_STYLE_KEY,
    DEFAULT_STYLE_KEY,
};

/// The style a run will use and the key recorded in its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSelection {
    pub style: StyleDescriptor,
    pub style_key: String,
}

/// Looks up the style for a category. Unknown categories get `default`, and a
/// map without `default` gets the built-in descriptor.
pub fn resolve(category_slug: &str, styles: &StyleMap) -> StyleDescriptor {
    lookup(category_slug, styles)
}

/// Same fallback chain as [`resolve`], for callers naming a style directly.
pub fn resolve_explicit(style_key: &str, styles: &StyleMap) -> StyleDescriptor {
    lookup(style_key, styles)
}

/// An override that is empty or `auto` means "pick by category".
pub fn select(category_slug: &str, style_override: Option<&str>, styles: &StyleMap) -> StyleSelection {
    match style_override
        .map(str::trim)
        .filter(|key| !key.is_empty() && !key.eq_ignore_ascii_case(AUTO_STYLE_KEY))
    {
        Some(key) => StyleSelection {
            style: resolve_explicit(key, styles),
            style_key: key.to_string(),
        },
        None => StyleSelection {
            style: resolve(category_slug, styles),
            style_key: AUTO_STYLE_KEY.to_string(),
        },
    }
}

fn lookup(key: &str, styles: &StyleMap) -> StyleDescriptor {
    let key = sanitize_key(key);
    styles
        .get_key_value(key.as_str())
        .or_else(|| styles.get_key_value(DEFAULT_STYLE_KEY))
        .map(|(matched, style)| style.clone().with_key(matched))
        .unwrap_or_else(builtin_default_style)
}
