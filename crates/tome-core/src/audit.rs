//! Staleness sweeps.
//!
//! A sweep holds the pid-stamped sweep lock for its whole duration:
//! recheck open reviews, snapshot the store, investigate every entry with
//! bounded parallelism, apply auto-fixes, write new reviews, then record the
//! revision. Investigations only read the snapshot; all writes happen after
//! they have joined.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::ReasoningError;
use crate::index;
use crate::lock::SweepLock;
use crate::queue::{AnalysisState, ReviewDraft, ReviewItem, ReviewKind, ReviewSource, ReviewStore};
use crate::reasoning::{
    EntryStatus, Investigation, IssueSeverity, ReasoningFunction, ReasoningKind, ReasoningSession,
    Recheck,
};
use crate::store::{EntryRef, KnowledgeStore};

const DEFAULT_REVIEW_OPTIONS: &[&str] = &["Update the entry", "Delete the entry", "Keep it as is"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another live process holds the sweep lock.
    LockHeld,
    /// The recorded revision matches the current one.
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub revision: String,
    pub rechecked: usize,
    pub retired: usize,
    pub investigated: usize,
    /// Entries left alone because a review already covers them.
    pub covered: usize,
    pub failed: usize,
    pub auto_fixed: usize,
    pub new_reviews: usize,
    pub state_recorded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepOutcome {
    Skipped { reason: SkipReason },
    Completed(SweepReport),
}

struct AutoFix {
    entry: EntryRef,
    replacement: String,
}

pub struct Auditor {
    settings: Settings,
    store: KnowledgeStore,
    reviews: ReviewStore,
    reasoner: Arc<dyn ReasoningFunction>,
}

impl Auditor {
    pub fn new(settings: &Settings, reasoner: Arc<dyn ReasoningFunction>) -> Self {
        Self {
            store: KnowledgeStore::new(&settings.knowledge_dir),
            reviews: ReviewStore::new(settings.reviews_dir()),
            reasoner,
            settings: settings.clone(),
        }
    }

    /// Run one sweep for `revision`. `force` bypasses the revision check only.
    pub async fn sweep(&self, revision: &str, force: bool) -> Result<SweepOutcome> {
        let Some(lock) = SweepLock::try_acquire(&self.settings.audit_lock_path())? else {
            return Ok(SweepOutcome::Skipped {
                reason: SkipReason::LockHeld,
            });
        };
        let state_path = self.settings.analysis_state_path();
        if !force {
            if let Some(state) = AnalysisState::load(&state_path).await {
                if state.matches(revision) {
                    info!(target: "tome::audit", revision, "revision already audited; skipping");
                    return Ok(SweepOutcome::Skipped {
                        reason: SkipReason::Unchanged,
                    });
                }
            }
        }
        info!(target: "tome::audit", revision, force, pid = lock.holder().pid, "sweep started");
        let mut report = SweepReport {
            revision: revision.to_string(),
            ..SweepReport::default()
        };

        self.recheck_reviews(&mut report).await?;

        let snapshot = self.store.snapshot().await.context("snapshot store")?;
        let documents: HashMap<String, String> = snapshot
            .documents
            .iter()
            .map(|d| (d.path.clone(), d.content.clone()))
            .collect();
        let open = self.reviews.list().await?;
        let (covered, pending): (Vec<EntryRef>, Vec<EntryRef>) = snapshot
            .entries()
            .into_iter()
            .partition(|e| open.iter().any(|r| r.targets(&e.document, &e.title)));
        report.covered = covered.len();

        let results = self.investigate(pending, &documents, revision).await;
        report.investigated = results.len();

        let mut fixes = Vec::new();
        let mut drafts = Vec::new();
        for (entry, result) in results {
            match result {
                Ok(inv) => synthesize(entry, inv, &mut fixes, &mut drafts),
                Err(err) => {
                    warn!(
                        target: "tome::audit",
                        document = %entry.document,
                        section = %entry.title,
                        error = %err,
                        "investigation failed"
                    );
                    report.failed += 1;
                }
            }
        }

        for fix in fixes {
            match self
                .store
                .replace_section(&fix.entry.document, &fix.entry.title, &fix.replacement)
                .await
            {
                Ok(()) => {
                    info!(
                        target: "tome::audit",
                        document = %fix.entry.document,
                        section = %fix.entry.title,
                        "auto-fix applied"
                    );
                    report.auto_fixed += 1;
                }
                Err(err) => {
                    warn!(target: "tome::audit", document = %fix.entry.document, error = %err, "auto-fix failed");
                    report.failed += 1;
                }
            }
        }
        for draft in drafts {
            self.reviews.create(draft).await?;
            report.new_reviews += 1;
        }
        index::rebuild(&self.store).await?;

        if report.failed == 0 {
            AnalysisState::new(revision)
                .save(&state_path)
                .await
                .context("record analysis state")?;
            report.state_recorded = true;
        } else {
            warn!(
                target: "tome::audit",
                failed = report.failed,
                "analysis state not recorded; the next trigger will retry"
            );
        }
        info!(
            target: "tome::audit",
            rechecked = report.rechecked,
            retired = report.retired,
            investigated = report.investigated,
            auto_fixed = report.auto_fixed,
            new_reviews = report.new_reviews,
            failed = report.failed,
            "sweep finished"
        );
        Ok(SweepOutcome::Completed(report))
    }

    /// Delete unanswered reviews whose issue no longer exists.
    async fn recheck_reviews(&self, report: &mut SweepReport) -> Result<()> {
        let open: Vec<ReviewItem> = self
            .reviews
            .unanswered()
            .await?
            .into_iter()
            .filter(|r| !r.auto_apply)
            .collect();
        let permits = Arc::new(Semaphore::new(self.settings.audit_concurrency.max(1)));
        let checks = open.into_iter().map(|review| {
            let permits = permits.clone();
            let reasoner = self.reasoner.clone();
            let store = self.store.clone();
            async move {
                let _permit = permits.acquire_owned().await.ok();
                let document = store.read_raw(&review.knowledge_file).await.ok().flatten();
                let context = json!({
                    "review": review,
                    "document": document,
                    "repo_root": self.settings.repo_root.to_string_lossy(),
                });
                let mut session = ReasoningSession::new(reasoner);
                let verdict = session.ask::<Recheck>(ReasoningKind::Recheck, &context).await;
                (review, verdict)
            }
        });
        for (review, verdict) in join_all(checks).await {
            report.rechecked += 1;
            match verdict {
                Ok(Recheck {
                    still_relevant: false,
                    reason,
                }) => {
                    self.reviews.delete(&review.id).await?;
                    info!(target: "tome::audit", id = %review.id, reason = %reason, "retired moot review");
                    report.retired += 1;
                }
                Ok(_) => debug!(target: "tome::audit", id = %review.id, "review still relevant"),
                Err(err) => {
                    warn!(target: "tome::audit", id = %review.id, error = %err, "recheck failed; keeping review")
                }
            }
        }
        Ok(())
    }

    async fn investigate(
        &self,
        entries: Vec<EntryRef>,
        documents: &HashMap<String, String>,
        revision: &str,
    ) -> Vec<(EntryRef, Result<Investigation, ReasoningError>)> {
        let permits = Arc::new(Semaphore::new(self.settings.audit_concurrency.max(1)));
        let jobs = entries.into_iter().map(|entry| {
            let permits = permits.clone();
            let reasoner = self.reasoner.clone();
            let document = documents.get(&entry.document).cloned().unwrap_or_default();
            async move {
                let _permit = permits.acquire_owned().await.ok();
                let context = json!({
                    "entry": entry,
                    "document": document,
                    "revision": revision,
                    "repo_root": self.settings.repo_root.to_string_lossy(),
                });
                let mut session = ReasoningSession::new(reasoner);
                let result = session
                    .ask::<Investigation>(ReasoningKind::Investigate, &context)
                    .await;
                (entry, result)
            }
        });
        join_all(jobs).await
    }
}

fn synthesize(
    entry: EntryRef,
    inv: Investigation,
    fixes: &mut Vec<AutoFix>,
    drafts: &mut Vec<ReviewDraft>,
) {
    let issue = match (inv.status, inv.issue) {
        (_, Some(issue)) => issue,
        (EntryStatus::Valid, None) => return,
        (status, None) => {
            drafts.push(ReviewDraft {
                subject: entry.title.clone(),
                kind: status.review_kind(),
                question: format!(
                    "The entry \"{}\" in {} may no longer match the codebase. How should it be handled?",
                    entry.title, entry.document
                ),
                options: DEFAULT_REVIEW_OPTIONS.iter().map(|s| s.to_string()).collect(),
                knowledge_file: entry.document,
                agent_notes: String::new(),
                auto_apply: false,
                source: ReviewSource::Audit,
            });
            return;
        }
    };
    let replacement = issue
        .replacement
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    match (issue.severity, replacement) {
        (IssueSeverity::AutoFix, Some(replacement)) => fixes.push(AutoFix { entry, replacement }),
        (IssueSeverity::AutoFix, None) => {
            let mut notes = issue.agent_notes.trim().to_string();
            if !issue.summary.trim().is_empty() {
                if !notes.is_empty() {
                    notes.push_str("\n\n");
                }
                notes.push_str(&format!("Issue: {}", issue.summary.trim()));
            }
            drafts.push(ReviewDraft {
                subject: entry.title.clone(),
                kind: ReviewKind::AutoFix,
                question: issue
                    .question
                    .unwrap_or_else(|| format!("Automatic fix for \"{}\"", entry.title)),
                options: issue.options,
                knowledge_file: entry.document,
                agent_notes: notes,
                auto_apply: true,
                source: ReviewSource::Audit,
            });
        }
        (IssueSeverity::NeedsReview, _) => {
            let question = issue
                .question
                .filter(|q| !q.trim().is_empty())
                .unwrap_or_else(|| issue.summary.clone());
            let options = if issue.options.is_empty() {
                DEFAULT_REVIEW_OPTIONS.iter().map(|s| s.to_string()).collect()
            } else {
                issue.options
            };
            let mut notes = issue.agent_notes.trim().to_string();
            if notes.is_empty() {
                notes = issue.summary.trim().to_string();
            }
            drafts.push(ReviewDraft {
                subject: entry.title.clone(),
                kind: inv.status.review_kind(),
                question,
                options,
                knowledge_file: entry.document,
                agent_notes: notes,
                auto_apply: false,
                source: ReviewSource::Audit,
            });
        }
    }
}
