//! Applies answered (or auto-apply) reviews to the store, one at a time.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::Settings;
use crate::index;
use crate::lock::RunLock;
use crate::queue::{DiscussionTurn, ReviewItem, ReviewStore};
use crate::reasoning::{
    ApplyOutcome, ReasoningFunction, ReasoningKind, ReasoningSession, SectionEdit,
};
use crate::store::{Document, KnowledgeStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clarification {
    pub review_id: String,
    pub question: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub processed: usize,
    /// Reviews whose document no longer exists; left on disk.
    pub skipped: usize,
    pub failed: usize,
    pub messages: Vec<String>,
    /// Questions waiting for a reply through [`Applier::respond`].
    pub clarifications: Vec<Clarification>,
    /// True once every eligible review was applied and nothing awaits a reply.
    pub done: bool,
    /// Another apply run held `apply.lock`; nothing was touched.
    pub busy: bool,
}

impl ApplyReport {
    fn busy() -> Self {
        Self {
            busy: true,
            ..Self::default()
        }
    }
}

enum ItemResult {
    Applied(String),
    Missing,
    Clarify(String),
}

fn awaiting_reply(review: &ReviewItem) -> Option<&DiscussionTurn> {
    review.discussion.last().filter(|t| t.reply.is_none())
}

fn apply_edits(doc: &mut Document, edits: &[SectionEdit]) -> Result<()> {
    for edit in edits {
        let ok = match edit {
            SectionEdit::Delete { section } => doc.remove(section).is_some(),
            SectionEdit::Replace { section, content } => doc.replace_body(section, content),
            SectionEdit::Retitle { section, title } => {
                if title.trim().is_empty() {
                    bail!("empty title for section '{section}'");
                }
                doc.retitle(section, title)
            }
            SectionEdit::Keep { .. } => true,
        };
        if !ok {
            bail!("edit {edit:?} targets a section that does not exist");
        }
    }
    Ok(())
}

pub struct Applier {
    store: KnowledgeStore,
    reviews: ReviewStore,
    session: ReasoningSession,
    lock_path: PathBuf,
}

impl Applier {
    pub fn new(settings: &Settings, reasoner: Arc<dyn ReasoningFunction>) -> Self {
        Self {
            store: KnowledgeStore::new(&settings.knowledge_dir),
            reviews: ReviewStore::new(settings.reviews_dir()),
            session: ReasoningSession::new(reasoner),
            lock_path: settings.apply_lock_path(),
        }
    }

    /// Process every eligible review, oldest first. Stops early when the
    /// reasoning function needs a clarification.
    pub async fn run(&mut self) -> Result<ApplyReport> {
        let Some(_lock) = RunLock::try_acquire(&self.lock_path)? else {
            return Ok(ApplyReport::busy());
        };
        self.run_excluding(None).await
    }

    async fn run_excluding(&mut self, exclude: Option<&str>) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        for review in self.reviews.eligible().await? {
            if exclude == Some(review.id.as_str()) {
                continue;
            }
            if let Some(turn) = awaiting_reply(&review) {
                report.clarifications.push(Clarification {
                    review_id: review.id.clone(),
                    question: turn.question.clone(),
                });
                continue;
            }
            if self.handle(review, &mut report).await {
                break;
            }
        }
        report.done = report.failed == 0 && report.clarifications.is_empty();
        info!(
            target: "tome::apply",
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            waiting = report.clarifications.len(),
            done = report.done,
            "apply finished"
        );
        Ok(report)
    }

    /// Record a reply to the pending clarification of `review_id`, re-run that
    /// review, then continue with the rest.
    pub async fn respond(&mut self, review_id: &str, reply: &str) -> Result<ApplyReport> {
        let reply = reply.trim();
        if reply.is_empty() {
            bail!("reply must not be empty");
        }
        let Some(_lock) = RunLock::try_acquire(&self.lock_path)? else {
            return Ok(ApplyReport::busy());
        };
        let mut review = self
            .reviews
            .get(review_id)
            .await?
            .ok_or_else(|| anyhow!("review {review_id} not found"))?;
        match review.discussion.last_mut().filter(|t| t.reply.is_none()) {
            Some(turn) => turn.reply = Some(reply.to_string()),
            None => review.discussion.push(DiscussionTurn {
                question: String::new(),
                reply: Some(reply.to_string()),
            }),
        }
        self.reviews.save(&review).await?;

        let mut report = ApplyReport::default();
        if !self.handle(review, &mut report).await {
            let rest = self.run_excluding(Some(review_id)).await?;
            report.processed += rest.processed;
            report.skipped += rest.skipped;
            report.failed += rest.failed;
            report.messages.extend(rest.messages);
            report.clarifications.extend(rest.clarifications);
        }
        report.done = report.failed == 0 && report.clarifications.is_empty();
        Ok(report)
    }

    /// Returns true when processing must pause for a clarification.
    async fn handle(&mut self, review: ReviewItem, report: &mut ApplyReport) -> bool {
        let id = review.id.clone();
        match self.apply_one(review).await {
            Ok(ItemResult::Applied(message)) => {
                report.processed += 1;
                report.messages.push(message);
                false
            }
            Ok(ItemResult::Missing) => {
                report.skipped += 1;
                false
            }
            Ok(ItemResult::Clarify(question)) => {
                report.messages.push(format!("Review {id} needs clarification: {question}"));
                report.clarifications.push(Clarification {
                    review_id: id,
                    question,
                });
                true
            }
            Err(err) => {
                warn!(target: "tome::apply", id = %id, error = %format!("{err:#}"), "failed to apply review");
                report.failed += 1;
                report.messages.push(format!("Review {id} could not be applied: {err}"));
                false
            }
        }
    }

    async fn apply_one(&mut self, mut review: ReviewItem) -> Result<ItemResult> {
        let rel = review.knowledge_file.clone();
        let Some(mut doc) = self.store.read_document(&rel).await? else {
            warn!(
                target: "tome::apply",
                id = %review.id,
                document = %rel,
                "referenced document is gone; leaving review in place"
            );
            return Ok(ItemResult::Missing);
        };
        let context = json!({
            "review": review,
            "document": {
                "path": rel,
                "sections": doc.titles(),
                "content": doc.render(),
            },
        });
        let outcome: ApplyOutcome = self
            .session
            .ask(ReasoningKind::Apply, &context)
            .await
            .context("apply decision")?;

        if let Some(question) = outcome
            .clarification
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
        {
            if outcome.edits.is_empty() {
                review.discussion.push(DiscussionTurn {
                    question: question.to_string(),
                    reply: None,
                });
                self.reviews.save(&review).await?;
                info!(target: "tome::apply", id = %review.id, "clarification requested");
                return Ok(ItemResult::Clarify(question.to_string()));
            }
        }

        apply_edits(&mut doc, &outcome.edits)?;
        if outcome.edits.iter().any(|e| !matches!(e, SectionEdit::Keep { .. })) {
            self.store.write_document(&rel, &doc).await?;
        }
        index::rebuild(&self.store).await?;
        self.reviews.delete(&review.id).await?;

        let message = if outcome.message.trim().is_empty() {
            format!("Applied review {} to {}", review.id, rel)
        } else {
            outcome.message.trim().to_string()
        };
        info!(
            target: "tome::apply",
            id = %review.id,
            document = %rel,
            edits = outcome.edits.len(),
            "review applied"
        );
        Ok(ItemResult::Applied(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Section;

    fn doc() -> Document {
        let mut d = Document::default();
        d.push(Section::new("Redis TTL", "30min"));
        d.push(Section::new("Cache keys", "sess:"));
        d
    }

    #[test]
    fn edits_apply_in_order() {
        let mut d = doc();
        apply_edits(
            &mut d,
            &[
                SectionEdit::Replace {
                    section: "redis ttl".into(),
                    content: "60min".into(),
                },
                SectionEdit::Retitle {
                    section: "Redis TTL".into(),
                    title: "Session TTL".into(),
                },
                SectionEdit::Delete {
                    section: "Cache keys".into(),
                },
                SectionEdit::Keep { section: None },
            ],
        )
        .expect("edits apply");
        assert_eq!(d.titles(), vec!["Session TTL"]);
        assert_eq!(d.sections[0].body, "60min");
    }

    #[test]
    fn unknown_sections_are_rejected() {
        let mut d = doc();
        let err = apply_edits(
            &mut d,
            &[SectionEdit::Delete {
                section: "Nope".into(),
            }],
        )
        .expect_err("missing section");
        assert!(err.to_string().contains("does not exist"));
    }
}
