//! Index maintenance.
//!
//! Both index documents are rebuilt from the store on every call, so any
//! mutation followed by [`rebuild`] leaves exactly one pointer per document in
//! each index and none to documents that no longer exist.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::store::{Document, KnowledgeStore, StoreResult, AGENT_INDEX_FILE, HUMAN_INDEX_FILE};
use crate::util::save_bytes_atomic;
use crate::error::StoreError;

static HUMAN_POINTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^- \[[^\]]*\]\(([^)\s]+\.md)\)").expect("human pointer regex"));
static AGENT_POINTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^- `([^`]+\.md)`").expect("agent pointer regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexedDocument {
    path: String,
    category: String,
    title: String,
    sections: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Human,
    Agent,
}

impl IndexKind {
    pub fn file_name(self) -> &'static str {
        match self {
            IndexKind::Human => HUMAN_INDEX_FILE,
            IndexKind::Agent => AGENT_INDEX_FILE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildOutcome {
    pub documents: usize,
    pub human_written: bool,
    pub agent_written: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pointer {
    pub index: IndexKind,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Pointers to documents that do not exist.
    pub dangling: Vec<Pointer>,
    /// Documents without a pointer.
    pub missing: Vec<Pointer>,
    /// Index files whose content differs from a fresh rebuild.
    pub outdated: Vec<IndexKind>,
}

impl IndexReport {
    pub fn is_consistent(&self) -> bool {
        self.dangling.is_empty() && self.missing.is_empty()
    }
}

async fn collect(store: &KnowledgeStore) -> StoreResult<Vec<IndexedDocument>> {
    let mut out = Vec::new();
    for path in store.list_documents().await? {
        let Some(raw) = store.read_raw(&path).await? else { continue };
        let doc = Document::parse(&raw);
        let category = path
            .split_once('/')
            .map(|(c, _)| c.to_string())
            .unwrap_or_default();
        let stem = path
            .rsplit('/')
            .next()
            .unwrap_or(&path)
            .trim_end_matches(".md")
            .to_string();
        out.push(IndexedDocument {
            title: doc.title().map(str::to_string).unwrap_or(stem),
            sections: doc.titles().into_iter().map(str::to_string).collect(),
            category,
            path,
        });
    }
    Ok(out)
}

fn render_human(docs: &[IndexedDocument]) -> String {
    let mut out = String::from("# Knowledge Index\n\n");
    out.push_str("<!-- Generated by tome. Manual edits are overwritten. -->\n");
    if docs.is_empty() {
        out.push_str("\n_No knowledge recorded yet._\n");
        return out;
    }
    let mut by_category: BTreeMap<&str, Vec<&IndexedDocument>> = BTreeMap::new();
    for doc in docs {
        let key = if doc.category.is_empty() {
            "uncategorized"
        } else {
            doc.category.as_str()
        };
        by_category.entry(key).or_default().push(doc);
    }
    for (category, docs) in by_category {
        out.push_str(&format!("\n## {category}\n\n"));
        for doc in docs {
            out.push_str(&format!("- [{}]({})\n", doc.title, doc.path));
            if doc.sections.len() > 1 {
                for section in &doc.sections {
                    out.push_str(&format!("  - {section}\n"));
                }
            }
        }
    }
    out
}

fn render_agent(docs: &[IndexedDocument]) -> String {
    let mut out = String::from("# Knowledge Map\n\n");
    out.push_str("<!-- Generated by tome. Manual edits are overwritten. -->\n\n");
    out.push_str("Read the linked document before relying on a topic. One line per document: path, title, sections.\n\n");
    if docs.is_empty() {
        out.push_str("(empty)\n");
        return out;
    }
    for doc in docs {
        out.push_str(&format!(
            "- `{}` | {} | {}\n",
            doc.path,
            doc.title,
            doc.sections.join("; ")
        ));
    }
    out
}

async fn write_if_changed(store: &KnowledgeStore, kind: IndexKind, content: &str) -> StoreResult<bool> {
    let name = kind.file_name();
    if store.read_raw(name).await?.as_deref() == Some(content) {
        return Ok(false);
    }
    let path = store.root().join(name);
    save_bytes_atomic(&path, content.as_bytes())
        .await
        .map_err(|e| StoreError::io(&path, e))?;
    Ok(true)
}

/// Regenerate both index documents from what is on disk.
pub async fn rebuild(store: &KnowledgeStore) -> StoreResult<RebuildOutcome> {
    let docs = collect(store).await?;
    let human_written = write_if_changed(store, IndexKind::Human, &render_human(&docs)).await?;
    let agent_written = write_if_changed(store, IndexKind::Agent, &render_agent(&docs)).await?;
    debug!(
        target: "tome::store",
        documents = docs.len(),
        human_written,
        agent_written,
        "indexes rebuilt"
    );
    Ok(RebuildOutcome {
        documents: docs.len(),
        human_written,
        agent_written,
    })
}

fn pointers(kind: IndexKind, text: &str) -> BTreeSet<String> {
    let re = match kind {
        IndexKind::Human => &HUMAN_POINTER,
        IndexKind::Agent => &AGENT_POINTER,
    };
    re.captures_iter(text).map(|c| c[1].to_string()).collect()
}

/// Compare both indexes with the store without modifying anything.
pub async fn verify(store: &KnowledgeStore) -> StoreResult<IndexReport> {
    let docs = collect(store).await?;
    let actual: BTreeSet<String> = docs.iter().map(|d| d.path.clone()).collect();
    let mut report = IndexReport::default();
    for (kind, expected) in [
        (IndexKind::Human, render_human(&docs)),
        (IndexKind::Agent, render_agent(&docs)),
    ] {
        let text = store.read_raw(kind.file_name()).await?.unwrap_or_default();
        if text != expected {
            report.outdated.push(kind);
        }
        let indexed = pointers(kind, &text);
        for path in indexed.difference(&actual) {
            report.dangling.push(Pointer {
                index: kind,
                path: path.clone(),
            });
        }
        for path in actual.difference(&indexed) {
            report.missing.push(Pointer {
                index: kind,
                path: path.clone(),
            });
        }
    }
    Ok(report)
}
