//! Parsing and rendering of knowledge documents.
//!
//! A document is an optional preamble followed by sections, each starting at
//! a `# ` or `## ` heading. Sections are separated by a `---` divider when
//! rendered; trailing dividers are not part of a section body. Headings
//! inside fenced code blocks are ignored.

use once_cell::sync::Lazy;
use regex::Regex;

pub const DIVIDER: &str = "---";

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,2})[ \t]+(.+?)[ \t]*#*[ \t]*$").expect("heading regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Heading level, 1 or 2.
    pub level: u8,
    pub title: String,
    pub body: String,
}

impl Section {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level: 2,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn render(&self) -> String {
        let hashes = "#".repeat(self.level.clamp(1, 2) as usize);
        let body = self.body.trim();
        if body.is_empty() {
            format!("{hashes} {}\n", self.title)
        } else {
            format!("{hashes} {}\n\n{body}\n", self.title)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub preamble: String,
    pub sections: Vec<Section>,
}

fn same_title(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn clean_body(lines: &[&str]) -> String {
    let mut end = lines.len();
    while end > 0 {
        let t = lines[end - 1].trim();
        if t.is_empty() || t == DIVIDER {
            end -= 1;
        } else {
            break;
        }
    }
    let mut start = 0;
    while start < end && lines[start].trim().is_empty() {
        start += 1;
    }
    lines[start..end].join("\n")
}

impl Document {
    pub fn parse(text: &str) -> Self {
        let mut doc = Document::default();
        let mut current: Option<(u8, String)> = None;
        let mut buf: Vec<&str> = Vec::new();
        let mut in_fence = false;

        for line in text.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
                buf.push(line);
                continue;
            }
            let heading = if in_fence { None } else { HEADING.captures(line) };
            match heading {
                Some(caps) => {
                    let body = clean_body(&buf);
                    buf.clear();
                    match current.take() {
                        Some((level, title)) => doc.sections.push(Section { level, title, body }),
                        None => doc.preamble = body,
                    }
                    current = Some((caps[1].len() as u8, caps[2].trim().to_string()));
                }
                None => buf.push(line),
            }
        }
        let body = clean_body(&buf);
        match current {
            Some((level, title)) => doc.sections.push(Section { level, title, body }),
            None => doc.preamble = body,
        }
        doc
    }

    pub fn render(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let preamble = self.preamble.trim();
        if !preamble.is_empty() {
            parts.push(format!("{preamble}\n"));
        }
        let sections: Vec<String> = self.sections.iter().map(Section::render).collect();
        if !sections.is_empty() {
            parts.push(sections.join(&format!("\n{DIVIDER}\n\n")));
        }
        parts.join("\n")
    }

    pub fn titles(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.title.as_str()).collect()
    }

    /// Title of the first section, used as the document's display title.
    pub fn title(&self) -> Option<&str> {
        self.sections.first().map(|s| s.title.as_str())
    }

    pub fn find(&self, title: &str) -> Option<usize> {
        self.sections.iter().position(|s| same_title(&s.title, title))
    }

    /// A title not yet used in this document, derived from `base`.
    pub fn unique_title(&self, base: &str, stamp: &str) -> String {
        if self.find(base).is_none() {
            return base.to_string();
        }
        let updated = format!("{base} (updated {stamp})");
        if self.find(&updated).is_none() {
            return updated;
        }
        (2..)
            .map(|n| format!("{updated} #{n}"))
            .find(|candidate| self.find(candidate).is_none())
            .unwrap_or(updated)
    }

    pub fn push(&mut self, section: Section) {
        self.sections.push(section);
    }

    pub fn replace_body(&mut self, title: &str, body: &str) -> bool {
        match self.find(title) {
            Some(idx) => {
                self.sections[idx].body = body.trim().to_string();
                true
            }
            None => false,
        }
    }

    pub fn retitle(&mut self, title: &str, new_title: &str) -> bool {
        match self.find(title) {
            Some(idx) => {
                self.sections[idx].title = new_title.trim().to_string();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, title: &str) -> Option<Section> {
        self.find(title).map(|idx| self.sections.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Notes collected by the team.

## Redis TTL

Session cache uses 30min TTL.

---

## Cache keys

Prefixed with `sess:`.

```sh
# not a heading
redis-cli keys 'sess:*'
```
";

    #[test]
    fn parses_preamble_and_sections() {
        let doc = Document::parse(SAMPLE);
        assert_eq!(doc.preamble, "Notes collected by the team.");
        assert_eq!(doc.titles(), vec!["Redis TTL", "Cache keys"]);
        assert_eq!(doc.sections[0].body, "Session cache uses 30min TTL.");
        assert!(doc.sections[1].body.contains("# not a heading"));
    }

    #[test]
    fn render_then_parse_keeps_sections() {
        let doc = Document::parse(SAMPLE);
        let again = Document::parse(&doc.render());
        assert_eq!(doc, again);
        assert!(doc.render().contains("\n---\n"));
    }

    #[test]
    fn top_level_headings_delimit_entries_too() {
        let doc = Document::parse("# One\nfirst\n# Two ##\nsecond\n");
        assert_eq!(doc.titles(), vec!["One", "Two"]);
        assert_eq!(doc.sections[0].level, 1);
        assert!(doc.render().starts_with("# One\n"));
    }

    #[test]
    fn section_lookup_ignores_case_and_padding() {
        let doc = Document::parse(SAMPLE);
        assert_eq!(doc.find("  redis ttl "), Some(0));
        assert!(doc.find("missing").is_none());
    }

    #[test]
    fn unique_titles_avoid_collisions() {
        let mut doc = Document::default();
        doc.push(Section::new("Redis TTL", "a"));
        assert_eq!(doc.unique_title("Other", "2024-01-01"), "Other");
        let second = doc.unique_title("Redis TTL", "2024-01-01");
        assert_eq!(second, "Redis TTL (updated 2024-01-01)");
        doc.push(Section::new(second, "b"));
        assert_eq!(
            doc.unique_title("Redis TTL", "2024-01-01"),
            "Redis TTL (updated 2024-01-01) #2"
        );
    }

    #[test]
    fn edits_target_single_sections() {
        let mut doc = Document::parse(SAMPLE);
        assert!(doc.replace_body("Cache keys", "Prefixed with `s:`."));
        assert!(doc.retitle("Redis TTL", "Session TTL"));
        assert!(!doc.replace_body("nope", "x"));
        let removed = doc.remove("session ttl").expect("removed");
        assert_eq!(removed.title, "Session TTL");
        assert_eq!(doc.titles(), vec!["Cache keys"]);
        assert_eq!(doc.sections[0].body, "Prefixed with `s:`.");
    }
}
