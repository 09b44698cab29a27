//! Intake reconciliation: merge each captured fact into the store.
//!
//! Items are handled one at a time, oldest first, and the directory is
//! re-listed after every item so facts captured mid-drain are picked up by the
//! same run. A failing item goes back to `pending` and the drain moves on.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::category::CANONICAL_CATEGORIES;
use crate::config::Settings;
use crate::index;
use crate::lock::RunLock;
use crate::queue::{
    IntakeItem, IntakeLease, IntakeQueue, ReviewDraft, ReviewKind, ReviewSource, ReviewStore,
};
use crate::reasoning::{
    ReasoningFunction, ReasoningKind, ReasoningSession, ReconcileAction, ReconcileVerdict,
};
use crate::store::{is_document_path, KnowledgeEntry, KnowledgeStore};

pub const NOT_READY_NOTE: &str = "reasoning did not signal readiness for the next item";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Duplicate,
    Added { document: String },
    Updated { document: String },
    Conflict { review_id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Another drain held the lock; nothing was touched.
    pub skipped: bool,
    pub reclaimed: usize,
    pub duplicates: usize,
    pub added: usize,
    pub updated: usize,
    pub conflicts: usize,
    /// Items returned to `pending` for a later drain.
    pub deferred: usize,
}

impl DrainReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn handled(&self) -> usize {
        self.duplicates + self.added + self.updated + self.conflicts
    }

    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Duplicate => self.duplicates += 1,
            ItemOutcome::Added { .. } => self.added += 1,
            ItemOutcome::Updated { .. } => self.updated += 1,
            ItemOutcome::Conflict { .. } => self.conflicts += 1,
        }
    }
}

pub struct Reconciler {
    settings: Settings,
    store: KnowledgeStore,
    queue: IntakeQueue,
    reviews: ReviewStore,
    session: ReasoningSession,
}

impl Reconciler {
    pub fn new(settings: &Settings, reasoner: Arc<dyn ReasoningFunction>) -> Self {
        Self {
            store: KnowledgeStore::new(&settings.knowledge_dir),
            queue: IntakeQueue::new(settings.intake_dir(), settings.stale_processing),
            reviews: ReviewStore::new(settings.reviews_dir()),
            session: ReasoningSession::new(reasoner),
            settings: settings.clone(),
        }
    }

    pub fn session(&self) -> &ReasoningSession {
        &self.session
    }

    /// Drain the intake queue unless another drain is already running.
    pub async fn drain(&mut self) -> Result<DrainReport> {
        let Some(_lock) = RunLock::try_acquire(&self.settings.reconcile_lock_path())? else {
            return Ok(DrainReport::skipped());
        };
        let mut report = DrainReport {
            reclaimed: self.queue.reclaim_abandoned().await?,
            ..DrainReport::default()
        };
        let mut attempted: HashSet<String> = HashSet::new();
        while let Some(lease) = self.queue.claim_next(&attempted).await? {
            attempted.insert(lease.item.id.clone());
            match self.process(&lease).await {
                Ok(outcome) => {
                    self.queue.ack(&lease).await?;
                    info!(
                        target: "tome::reconcile",
                        id = %lease.item.id,
                        outcome = ?outcome,
                        "intake item reconciled"
                    );
                    report.record(&outcome);
                }
                Err(err) => {
                    warn!(
                        target: "tome::reconcile",
                        id = %lease.item.id,
                        error = %format!("{err:#}"),
                        "intake item deferred"
                    );
                    let id = lease.item.id.clone();
                    if let Err(nack_err) = self.queue.nack(lease, &format!("{err:#}")).await {
                        warn!(target: "tome::reconcile", id = %id, error = %nack_err, "failed to release intake item");
                    }
                    report.deferred += 1;
                }
            }
        }
        info!(
            target: "tome::reconcile",
            handled = report.handled(),
            deferred = report.deferred,
            reclaimed = report.reclaimed,
            "drain finished"
        );
        Ok(report)
    }

    async fn process(&mut self, lease: &IntakeLease) -> Result<ItemOutcome> {
        let item = &lease.item;
        let snapshot = self.store.snapshot().await.context("snapshot store")?;
        let context = json!({
            "item": {
                "category": item.category,
                "topic": item.topic,
                "details": item.details,
                "files": item.files,
                "suggested_file": item.entry().document_path(),
            },
            "categories": CANONICAL_CATEGORIES,
            "documents": snapshot.documents.iter().map(|d| d.path.as_str()).collect::<Vec<_>>(),
            "knowledge": snapshot.render_context(),
        });
        let verdict: ReconcileVerdict = self
            .session
            .ask(ReasoningKind::Reconcile, &context)
            .await
            .context("reconcile verdict")?;
        if !verdict.ready_for_next {
            anyhow::bail!(NOT_READY_NOTE);
        }
        match verdict.action {
            ReconcileAction::Duplicate => Ok(ItemOutcome::Duplicate),
            ReconcileAction::New | ReconcileAction::Update => self.write(item, &verdict).await,
            ReconcileAction::Conflict => self.escalate(item, &verdict).await,
        }
    }

    async fn write(&self, item: &IntakeItem, verdict: &ReconcileVerdict) -> Result<ItemOutcome> {
        let pick = |v: &Option<String>, fallback: &str| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };
        let entry = KnowledgeEntry {
            category: pick(&verdict.category, &item.category),
            topic: pick(&verdict.topic, &item.topic),
            details: pick(&verdict.content, &item.details),
            files: item.files.clone(),
        };
        let mut target = entry.document_path();
        if verdict.action == ReconcileAction::Update {
            if let Some(t) = verdict.target_file.as_deref().map(str::trim) {
                if is_document_path(t) && self.store.exists(t).await.unwrap_or(false) {
                    target = t.to_string();
                }
            }
        }
        let appended = self.store.append_entry_to(&target, &entry).await?;
        index::rebuild(&self.store).await?;
        Ok(if appended.created {
            ItemOutcome::Added {
                document: appended.document,
            }
        } else {
            ItemOutcome::Updated {
                document: appended.document,
            }
        })
    }

    async fn escalate(&self, item: &IntakeItem, verdict: &ReconcileVerdict) -> Result<ItemOutcome> {
        let knowledge_file = verdict
            .target_file
            .as_deref()
            .map(str::trim)
            .filter(|t| is_document_path(t) && self.store.resolve(t).is_ok())
            .map(str::to_string)
            .unwrap_or_else(|| item.entry().document_path());
        let question = verdict.question.clone().unwrap_or_else(|| {
            format!(
                "A newly captured fact about \"{}\" contradicts {}. Which version is correct?",
                item.topic.trim(),
                knowledge_file
            )
        });
        let options = if verdict.options.is_empty() {
            vec![
                "Keep the existing entry".to_string(),
                "Replace it with the new fact".to_string(),
                "Keep both".to_string(),
            ]
        } else {
            verdict.options.clone()
        };
        let mut agent_notes = verdict.agent_notes.trim().to_string();
        if !agent_notes.is_empty() {
            agent_notes.push_str("\n\n");
        }
        agent_notes.push_str(&format!("Captured fact:\n{}", item.details.trim()));
        if !item.files.is_empty() {
            agent_notes.push_str(&format!("\nFiles: {}", item.files.join(", ")));
        }
        let review = self
            .reviews
            .create(ReviewDraft {
                subject: item.topic.trim().to_string(),
                kind: ReviewKind::Conflict,
                question,
                options,
                knowledge_file,
                agent_notes,
                auto_apply: false,
                source: ReviewSource::Reconcile,
            })
            .await?;
        Ok(ItemOutcome::Conflict {
            review_id: review.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasoningError;
    use crate::reasoning::{ReasoningRequest, ReasoningResponse};
    use crate::test_support::{seed_document, settings_in};
    use async_trait::async_trait;

    struct Fixed(serde_json::Value);

    #[async_trait]
    impl ReasoningFunction for Fixed {
        async fn call(&self, _request: ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
            Ok(ReasoningResponse::new(self.0.clone()))
        }
    }

    #[tokio::test]
    async fn bare_conflict_verdict_gets_default_question_and_options() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_in(dir.path());
        seed_document(&settings, "gotchas/redis-ttl.md", "## Redis TTL\n\n30min\n");
        let queue = IntakeQueue::new(settings.intake_dir(), settings.stale_processing);
        queue
            .enqueue(&KnowledgeEntry {
                category: "gotchas".into(),
                topic: "Redis TTL".into(),
                details: "60min".into(),
                files: vec!["src/cache.rs".into()],
            })
            .await
            .expect("enqueue");

        let reasoner = Arc::new(Fixed(json!({"action": "conflict", "ready_for_next": true})));
        let mut reconciler = Reconciler::new(&settings, reasoner);
        let report = reconciler.drain().await.expect("drain");
        assert_eq!(report.conflicts, 1);

        let reviews = ReviewStore::new(settings.reviews_dir()).list().await.expect("list");
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].knowledge_file, "gotchas/redis-ttl.md");
        assert!(reviews[0].question.contains("Redis TTL"));
        assert_eq!(reviews[0].options.len(), 3);
        assert!(reviews[0].agent_notes.contains("Files: src/cache.rs"));
    }

    #[tokio::test]
    async fn conflict_target_outside_store_falls_back_to_entry_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_in(dir.path());
        seed_document(&settings, "gotchas/redis-ttl.md", "## Redis TTL\n\n30min\n");
        IntakeQueue::new(settings.intake_dir(), settings.stale_processing)
            .enqueue(&KnowledgeEntry {
                category: "gotchas".into(),
                topic: "Redis TTL".into(),
                details: "60min".into(),
                files: Vec::new(),
            })
            .await
            .expect("enqueue");

        let reasoner = Arc::new(Fixed(json!({
            "action": "conflict",
            "target_file": "../outside.md",
            "ready_for_next": true
        })));
        let mut reconciler = Reconciler::new(&settings, reasoner);
        assert_eq!(reconciler.drain().await.expect("drain").conflicts, 1);

        let reviews = ReviewStore::new(settings.reviews_dir()).list().await.expect("list");
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].knowledge_file, "gotchas/redis-ttl.md");
        assert!(!reviews[0].question.contains("outside"));
    }
}
