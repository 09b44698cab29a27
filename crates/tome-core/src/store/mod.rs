//! Durable record store: markdown documents under `<knowledge_dir>/<category>/<slug>.md`.

mod document;

use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs as afs;
use tracing::{debug, info};

pub use document::{Document, Section, DIVIDER};

use crate::category::{normalize_category, topic_slug};
use crate::error::StoreError;
use crate::util::{remove_if_exists, save_bytes_atomic};

pub const HUMAN_INDEX_FILE: &str = "INDEX.md";
pub const AGENT_INDEX_FILE: &str = "AGENTS.md";

pub type StoreResult<T> = Result<T, StoreError>;

/// A fact to be written into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub category: String,
    pub topic: String,
    pub details: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl KnowledgeEntry {
    /// Relative document path this entry lands in.
    pub fn document_path(&self) -> String {
        format!(
            "{}/{}.md",
            normalize_category(&self.category),
            topic_slug(&self.topic)
        )
    }

    fn section_body(&self) -> String {
        let details = self.details.trim();
        if self.files.is_empty() {
            details.to_string()
        } else {
            let files: Vec<String> = self.files.iter().map(|f| format!("`{}`", f.trim())).collect();
            format!("{details}\n\nFiles: {}", files.join(", "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub document: String,
    pub title: String,
    pub created: bool,
}

/// One parsed section, addressed by document path and title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryRef {
    pub document: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDocument {
    pub path: String,
    pub content: String,
}

/// Point-in-time copy of every document in the store.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub documents: Vec<SnapshotDocument>,
}

impl StoreSnapshot {
    /// Every non-empty section in the snapshot, in path order.
    pub fn entries(&self) -> Vec<EntryRef> {
        self.documents
            .iter()
            .flat_map(|doc| {
                Document::parse(&doc.content)
                    .sections
                    .into_iter()
                    .filter(|s| !s.body.trim().is_empty())
                    .map(|s| EntryRef {
                        document: doc.path.clone(),
                        title: s.title,
                        body: s.body,
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Whole store as one text block for reasoning context.
    pub fn render_context(&self) -> String {
        if self.documents.is_empty() {
            return "(the knowledge base is empty)".to_string();
        }
        self.documents
            .iter()
            .map(|d| format!("=== {} ===\n{}", d.path, d.content.trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A markdown document path that is not one of the generated indexes.
pub fn is_document_path(rel: &str) -> bool {
    let rel = rel.trim();
    rel.ends_with(".md") && rel != HUMAN_INDEX_FILE && rel != AGENT_INDEX_FILE
}

#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    root: PathBuf,
}

impl KnowledgeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a relative document path to an absolute one, refusing anything that
    /// could leave the knowledge directory.
    pub fn resolve(&self, rel: &str) -> StoreResult<PathBuf> {
        let trimmed = rel.trim();
        if trimmed.is_empty() {
            return Err(StoreError::PathEscape(rel.to_string()));
        }
        let path = Path::new(trimmed);
        let all_normal = path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_absolute() || !all_normal {
            return Err(StoreError::PathEscape(rel.to_string()));
        }
        Ok(self.root.join(path))
    }

    pub async fn exists(&self, rel: &str) -> StoreResult<bool> {
        let path = self.resolve(rel)?;
        Ok(afs::try_exists(&path).await.unwrap_or(false))
    }

    pub async fn read_raw(&self, rel: &str) -> StoreResult<Option<String>> {
        let path = self.resolve(rel)?;
        match afs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    pub async fn read_document(&self, rel: &str) -> StoreResult<Option<Document>> {
        Ok(self.read_raw(rel).await?.map(|text| Document::parse(&text)))
    }

    async fn require_document(&self, rel: &str) -> StoreResult<Document> {
        self.read_document(rel)
            .await?
            .ok_or_else(|| StoreError::DocumentNotFound(rel.to_string()))
    }

    /// Persist `doc` atomically; an empty document removes the file (and an
    /// emptied category directory).
    pub async fn write_document(&self, rel: &str, doc: &Document) -> StoreResult<()> {
        let path = self.resolve(rel)?;
        if doc.sections.is_empty() {
            remove_if_exists(&path)
                .await
                .map_err(|e| StoreError::io(&path, e))?;
            info!(target: "tome::store", document = rel, "removed empty document");
            self.prune_empty_parent(&path).await;
            return Ok(());
        }
        save_bytes_atomic(&path, doc.render().as_bytes())
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        debug!(target: "tome::store", document = rel, sections = doc.sections.len(), "wrote document");
        Ok(())
    }

    async fn prune_empty_parent(&self, path: &Path) {
        let Some(parent) = path.parent() else { return };
        if parent == self.root.as_path() {
            return;
        }
        if let Ok(mut rd) = afs::read_dir(parent).await {
            if matches!(rd.next_entry().await, Ok(None)) {
                let _ = afs::remove_dir(parent).await;
            }
        }
    }

    /// Append `entry` to the document at `rel`, creating it if needed.
    pub async fn append_entry_to(
        &self,
        rel: &str,
        entry: &KnowledgeEntry,
    ) -> StoreResult<AppendOutcome> {
        let rel = rel.trim().to_string();
        if !is_document_path(&rel) {
            return Err(StoreError::PathEscape(rel));
        }
        let existing = self.read_document(&rel).await?;
        let created = existing.is_none();
        let mut doc = existing.unwrap_or_default();
        let stamp = Utc::now().format("%Y-%m-%d").to_string();
        let title = doc.unique_title(entry.topic.trim(), &stamp);
        doc.push(Section::new(title.clone(), entry.section_body()));
        self.write_document(&rel, &doc).await?;
        info!(target: "tome::store", document = %rel, title = %title, created, "appended entry");
        Ok(AppendOutcome {
            document: rel,
            title,
            created,
        })
    }

    pub async fn replace_section(&self, rel: &str, title: &str, body: &str) -> StoreResult<()> {
        let mut doc = self.require_document(rel).await?;
        if !doc.replace_body(title, body) {
            return Err(StoreError::SectionNotFound {
                document: rel.to_string(),
                title: title.to_string(),
            });
        }
        self.write_document(rel, &doc).await
    }

    /// Delete one section. Returns true when the document itself was removed.
    pub async fn delete_section(&self, rel: &str, title: &str) -> StoreResult<bool> {
        let mut doc = self.require_document(rel).await?;
        if doc.remove(title).is_none() {
            return Err(StoreError::SectionNotFound {
                document: rel.to_string(),
                title: title.to_string(),
            });
        }
        let removed = doc.sections.is_empty();
        self.write_document(rel, &doc).await?;
        Ok(removed)
    }

    /// Relative paths of every knowledge document, sorted. Index files and
    /// hidden entries are excluded; a missing root yields an empty list.
    pub async fn list_documents(&self) -> StoreResult<Vec<String>> {
        let mut out = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut rd = match afs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StoreError::io(&dir, err)),
            };
            while let Some(ent) = rd.next_entry().await.map_err(|e| StoreError::io(&dir, e))? {
                let name = ent.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                let path = ent.path();
                let ft = ent.file_type().await.map_err(|e| StoreError::io(&path, e))?;
                if ft.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !name.ends_with(".md") {
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.root) else { continue };
                let rel = rel.to_string_lossy().replace('\\', "/");
                if rel == HUMAN_INDEX_FILE || rel == AGENT_INDEX_FILE {
                    continue;
                }
                out.push(rel);
            }
        }
        out.sort();
        Ok(out)
    }

    pub async fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        let mut documents = Vec::new();
        for rel in self.list_documents().await? {
            if let Some(content) = self.read_raw(&rel).await? {
                documents.push(SnapshotDocument { path: rel, content });
            }
        }
        Ok(StoreSnapshot { documents })
    }
}
