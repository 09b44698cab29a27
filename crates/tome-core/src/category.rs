//! Category and topic normalization.
//!
//! Categories map onto a small canonical set through an explicit synonym
//! table; anything unknown goes through [`slugify`]. Topic slugs become
//! document file names, so they are restricted to `[a-z0-9-]`, bounded in
//! length, and never empty.

use crate::util::now_millis;

pub const MAX_SLUG_LEN: usize = 64;
pub const FALLBACK_CATEGORY: &str = "general";

/// Canonical categories.
pub const CANONICAL_CATEGORIES: &[&str] = &[
    "architecture",
    "conventions",
    "debugging",
    "decisions",
    "dependencies",
    "gotchas",
    "patterns",
    "testing",
    "workflows",
];

static SYNONYMS: &[(&str, &str)] = &[
    ("arch", "architecture"),
    ("architecture", "architecture"),
    ("design", "architecture"),
    ("structure", "architecture"),
    ("convention", "conventions"),
    ("conventions", "conventions"),
    ("style", "conventions"),
    ("code-style", "conventions"),
    ("debug", "debugging"),
    ("debugging", "debugging"),
    ("bug", "debugging"),
    ("bugs", "debugging"),
    ("troubleshooting", "debugging"),
    ("adr", "decisions"),
    ("decision", "decisions"),
    ("decisions", "decisions"),
    ("dependency", "dependencies"),
    ("dependencies", "dependencies"),
    ("deps", "dependencies"),
    ("library", "dependencies"),
    ("libraries", "dependencies"),
    ("gotcha", "gotchas"),
    ("gotchas", "gotchas"),
    ("pitfall", "gotchas"),
    ("pitfalls", "gotchas"),
    ("caveat", "gotchas"),
    ("caveats", "gotchas"),
    ("pattern", "patterns"),
    ("patterns", "patterns"),
    ("idiom", "patterns"),
    ("idioms", "patterns"),
    ("test", "testing"),
    ("tests", "testing"),
    ("testing", "testing"),
    ("workflow", "workflows"),
    ("workflows", "workflows"),
    ("process", "workflows"),
    ("howto", "workflows"),
];

/// Lowercase ASCII slug: runs of anything but `[a-z0-9]` collapse to one `-`,
/// leading/trailing dashes are trimmed, length is capped at [`MAX_SLUG_LEN`].
/// May return an empty string.
pub fn slugify(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_SLUG_LEN));
    let mut pending_dash = false;
    for ch in raw.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_lowercase() || lower.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(lower);
        } else {
            pending_dash = true;
        }
        if out.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    out.truncate(MAX_SLUG_LEN);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Map a free-form category onto its canonical name.
pub fn normalize_category(raw: &str) -> String {
    let slug = slugify(raw);
    if slug.is_empty() {
        return FALLBACK_CATEGORY.to_string();
    }
    SYNONYMS
        .iter()
        .find(|(alias, _)| *alias == slug)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(slug)
}

/// Document slug for a topic; falls back to a timestamp slug when nothing survives.
pub fn topic_slug(topic: &str) -> String {
    let slug = slugify(topic);
    if slug.is_empty() {
        format!("entry-{}", now_millis())
    } else {
        slug
    }
}
