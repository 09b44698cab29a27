use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{list_json, read_record, write_record};
use crate::util::{now_iso, remove_if_exists, short_id};

static LIST_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[-*+•]|\(?[0-9]{1,2}[.):]|\(?[a-zA-Z][.)])\s*").expect("list marker regex")
});
static OPTIONS_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:options|choices|possible answers)\s*:?$").expect("options label regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    Stale,
    Conflict,
    Outdated,
    AutoFix,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewSource {
    Reconcile,
    Audit,
    #[default]
    Manual,
}

/// One clarification exchange between the applier and the human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionTurn {
    pub question: String,
    #[serde(default)]
    pub reply: Option<String>,
}

/// A decision waiting for a human answer, or an automatic fix waiting for the applier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: String,
    pub subject: String,
    #[serde(rename = "type")]
    pub kind: ReviewKind,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub knowledge_file: String,
    #[serde(default)]
    pub agent_notes: String,
    #[serde(default)]
    pub auto_apply: bool,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub source: ReviewSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discussion: Vec<DiscussionTurn>,
}

impl ReviewItem {
    pub fn is_answered(&self) -> bool {
        self.answer.as_deref().is_some_and(|a| !a.trim().is_empty())
    }

    /// Answered, or flagged for application without a human.
    pub fn is_eligible(&self) -> bool {
        self.is_answered() || self.auto_apply
    }

    /// Whether this review concerns `title` in `document`.
    pub fn targets(&self, document: &str, title: &str) -> bool {
        self.knowledge_file.trim() == document.trim()
            && self.subject.trim().eq_ignore_ascii_case(title.trim())
    }
}

/// Fields supplied by whoever raises a review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewDraft {
    pub subject: String,
    pub kind: ReviewKind,
    pub question: String,
    pub options: Vec<String>,
    pub knowledge_file: String,
    pub agent_notes: String,
    pub auto_apply: bool,
    pub source: ReviewSource,
}

fn normalize_line(line: &str) -> String {
    let trimmed = line.trim();
    LIST_MARKER
        .replace(trimmed, "")
        .trim()
        .trim_end_matches(['.', ';', ','])
        .trim()
        .to_lowercase()
}

/// Drop any lines of `question` that merely repeat an option (bulleted,
/// numbered, or bare), together with an "Options:" label.
pub fn sanitize_question(question: &str, options: &[String], subject: &str) -> String {
    let options: Vec<String> = options
        .iter()
        .map(|o| normalize_line(o))
        .filter(|o| !o.is_empty())
        .collect();
    let mut kept: Vec<&str> = Vec::new();
    for line in question.lines() {
        if !options.is_empty() {
            let norm = normalize_line(line);
            if options.contains(&norm) || OPTIONS_LABEL.is_match(line.trim()) {
                continue;
            }
        }
        let blank = line.trim().is_empty();
        if blank && kept.last().is_none_or(|l| l.trim().is_empty()) {
            continue;
        }
        kept.push(line.trim_end());
    }
    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }
    if kept.is_empty() {
        return format!("How should \"{}\" be resolved?", subject.trim());
    }
    kept.join("\n")
}

fn valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[derive(Debug, Clone)]
pub struct ReviewStore {
    dir: PathBuf,
}

impl ReviewStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if !valid_id(id) {
            bail!("invalid review id: {id:?}");
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    pub async fn create(&self, draft: ReviewDraft) -> Result<ReviewItem> {
        let question = sanitize_question(&draft.question, &draft.options, &draft.subject);
        let item = ReviewItem {
            id: short_id(),
            subject: draft.subject.trim().to_string(),
            kind: draft.kind,
            question,
            options: draft
                .options
                .into_iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            knowledge_file: draft.knowledge_file,
            agent_notes: draft.agent_notes.trim().to_string(),
            auto_apply: draft.auto_apply,
            answer: None,
            created_at: now_iso(),
            source: draft.source,
            discussion: Vec::new(),
        };
        self.save(&item).await.context("create review")?;
        info!(
            target: "tome::queue",
            id = %item.id,
            kind = ?item.kind,
            file = %item.knowledge_file,
            auto_apply = item.auto_apply,
            "review created"
        );
        Ok(item)
    }

    pub async fn save(&self, item: &ReviewItem) -> Result<()> {
        let path = self.path_for(&item.id)?;
        write_record(&path, item).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<ReviewItem>> {
        let path = self.path_for(id)?;
        Ok(read_record(&path).await)
    }

    /// Every readable review, oldest first.
    pub async fn list(&self) -> Result<Vec<ReviewItem>> {
        let mut out = Vec::new();
        for path in list_json(&self.dir).await? {
            if let Some(item) = read_record::<ReviewItem>(&path).await {
                out.push(item);
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    pub async fn unanswered(&self) -> Result<Vec<ReviewItem>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| !r.is_answered())
            .collect())
    }

    /// Unanswered reviews a human still has to look at; auto-apply items are excluded.
    pub async fn count_unanswered(&self) -> Result<usize> {
        Ok(self
            .unanswered()
            .await?
            .iter()
            .filter(|r| !r.auto_apply)
            .count())
    }

    pub async fn eligible(&self) -> Result<Vec<ReviewItem>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(ReviewItem::is_eligible)
            .collect())
    }

    /// Record a human answer in place.
    pub async fn answer(&self, id: &str, answer: &str) -> Result<ReviewItem> {
        let answer = answer.trim();
        if answer.is_empty() {
            bail!("answer must not be empty");
        }
        let mut item = self
            .get(id)
            .await?
            .ok_or_else(|| anyhow!("review {id} not found"))?;
        item.answer = Some(answer.to_string());
        self.save(&item).await?;
        info!(target: "tome::queue", id, "review answered");
        Ok(item)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        remove_if_exists(&path)
            .await
            .with_context(|| format!("remove {}", path.display()))
    }
}
