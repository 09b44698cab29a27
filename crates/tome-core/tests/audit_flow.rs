mod common;

use std::sync::Arc;

use common::*;
use serde_json::json;
use tome_core::audit::{SkipReason, SweepOutcome, SweepReport};
use tome_core::queue::{AnalysisState, ReviewDraft, ReviewKind, ReviewSource, ReviewStore};
use tome_core::reasoning::ReasoningKind;
use tome_core::{Auditor, ReasoningError, Settings};

fn seed(settings: &Settings) {
    write(
        settings,
        "gotchas/redis-ttl.md",
        "## Redis TTL\n\nSessions expire after 30min.\n\n---\n\n## Cache keys\n\nKeys are prefixed with sess:.\n",
    );
    write(settings, "architecture/caching.md", "## Caching\n\nRedis fronts the DB.\n");
}

fn draft(subject: &str, file: &str) -> ReviewDraft {
    ReviewDraft {
        subject: subject.into(),
        kind: ReviewKind::Stale,
        question: format!("Is \"{subject}\" still accurate?"),
        options: vec!["Yes".into(), "No".into()],
        knowledge_file: file.into(),
        agent_notes: String::new(),
        auto_apply: false,
        source: ReviewSource::Audit,
    }
}

/// Investigations: the TTL entry gets an automatic fix until it mentions
/// 60min, cache keys need a human, everything else is valid. Rechecks retire
/// reviews whose subject starts with "Old".
fn auditor_script() -> Arc<Scripted> {
    Scripted::new(|req| match req.kind {
        ReasoningKind::Recheck => {
            let subject = req.context["review"]["subject"].as_str().unwrap_or_default();
            Ok(json!({
                "still_relevant": !subject.starts_with("Old"),
                "reason": "checked"
            }))
        }
        ReasoningKind::Investigate => {
            let title = req.context["entry"]["title"].as_str().unwrap_or_default();
            let body = req.context["entry"]["body"].as_str().unwrap_or_default();
            Ok(match title {
                "Redis TTL" if !body.contains("60min") => json!({
                    "status": "outdated",
                    "issue": {
                        "severity": "auto_fix",
                        "summary": "TTL is configured as 60min now",
                        "replacement": "Sessions expire after 60min."
                    }
                }),
                "Cache keys" => json!({
                    "status": "stale",
                    "issue": {
                        "severity": "needs_review",
                        "summary": "Prefix not found in src/",
                        "question": "Are session keys still prefixed with sess:?",
                        "options": ["Yes", "Delete the entry"]
                    }
                }),
                _ => json!({"status": "valid"}),
            })
        }
        _ => Err(ReasoningError::Invocation("unexpected call".into())),
    })
}

fn completed(outcome: SweepOutcome) -> SweepReport {
    match outcome {
        SweepOutcome::Completed(report) => report,
        other => panic!("expected a completed sweep, got {other:?}"),
    }
}

#[tokio::test]
async fn sweep_fixes_escalates_and_skips_covered_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(dir.path());
    seed(&settings);
    let reviews = ReviewStore::new(settings.reviews_dir());
    reviews
        .create(draft("Caching", "architecture/caching.md"))
        .await
        .expect("existing review");

    let reasoner = auditor_script();
    let auditor = Auditor::new(&settings, reasoner.clone());
    let report = completed(auditor.sweep("rev-1", false).await.expect("sweep"));
    assert_eq!(report.rechecked, 1);
    assert_eq!(report.retired, 0);
    assert_eq!(report.covered, 1);
    assert_eq!(report.investigated, 2);
    assert_eq!(report.auto_fixed, 1);
    assert_eq!(report.new_reviews, 1);
    assert!(report.state_recorded);
    assert_eq!(reasoner.calls_of(ReasoningKind::Investigate), 2);

    let doc = read(&settings, "gotchas/redis-ttl.md");
    assert!(doc.contains("Sessions expire after 60min."));
    assert!(!doc.contains("30min"));
    assert!(doc.contains("## Cache keys"));

    let all = reviews.list().await.expect("reviews");
    assert_eq!(all.len(), 2);
    let raised = all
        .iter()
        .find(|r| r.subject == "Cache keys")
        .expect("cache keys review");
    assert_eq!(raised.kind, ReviewKind::Stale);
    assert_eq!(raised.source, ReviewSource::Audit);
    assert_eq!(raised.knowledge_file, "gotchas/redis-ttl.md");
    assert_eq!(raised.question, "Are session keys still prefixed with sess:?");
    assert!(raised.answer.is_none());

    let state = AnalysisState::load(&settings.analysis_state_path())
        .await
        .expect("state recorded");
    assert!(state.matches("rev-1"));
    assert!(!settings.audit_lock_path().exists(), "lock released");
}

#[tokio::test]
async fn repeated_sweeps_do_not_duplicate_reviews() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(dir.path());
    seed(&settings);
    let reasoner = auditor_script();
    let auditor = Auditor::new(&settings, reasoner.clone());
    completed(auditor.sweep("rev-1", false).await.expect("first sweep"));

    let again = auditor.sweep("rev-1", false).await.expect("second sweep");
    assert_eq!(
        again,
        SweepOutcome::Skipped {
            reason: SkipReason::Unchanged
        }
    );

    let forced = completed(auditor.sweep("rev-1", true).await.expect("forced sweep"));
    assert_eq!(forced.new_reviews, 0);
    assert_eq!(forced.auto_fixed, 0);
    assert_eq!(forced.covered, 1);
    let reviews = ReviewStore::new(settings.reviews_dir())
        .list()
        .await
        .expect("reviews");
    assert_eq!(reviews.len(), 1);
}

#[tokio::test]
async fn live_sweep_lock_skips_without_touching_anything() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(dir.path());
    seed(&settings);
    let lock = settings.audit_lock_path();
    std::fs::create_dir_all(lock.parent().expect("parent")).expect("mkdir");
    let holder = json!({"pid": std::process::id(), "started_at": "2026-01-01T00:00:00Z"});
    std::fs::write(&lock, holder.to_string()).expect("lock file");

    let reasoner = auditor_script();
    let auditor = Auditor::new(&settings, reasoner.clone());
    let outcome = auditor.sweep("rev-1", true).await.expect("sweep");
    assert_eq!(
        outcome,
        SweepOutcome::Skipped {
            reason: SkipReason::LockHeld
        }
    );
    assert!(reasoner.calls.lock().expect("calls").is_empty());
    assert!(read(&settings, "gotchas/redis-ttl.md").contains("30min"));
    assert!(lock.exists(), "someone else's lock is left alone");
    assert!(AnalysisState::load(&settings.analysis_state_path()).await.is_none());
}

#[tokio::test]
async fn dead_holder_lock_is_cleared() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(dir.path());
    seed(&settings);
    let lock = settings.audit_lock_path();
    std::fs::create_dir_all(lock.parent().expect("parent")).expect("mkdir");
    std::fs::write(&lock, r#"{"pid": 4194300, "started_at": "2020-01-01T00:00:00Z"}"#)
        .expect("lock file");

    let auditor = Auditor::new(&settings, auditor_script());
    let report = completed(auditor.sweep("rev-1", false).await.expect("sweep"));
    assert!(report.state_recorded);
    assert!(!lock.exists());
}

#[tokio::test]
async fn moot_reviews_are_retired() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(dir.path());
    seed(&settings);
    let reviews = ReviewStore::new(settings.reviews_dir());
    let moot = reviews
        .create(draft("Old TTL", "gotchas/redis-ttl.md"))
        .await
        .expect("review");
    let mut answered = reviews
        .create(draft("Old answered", "gotchas/redis-ttl.md"))
        .await
        .expect("review");
    answered.answer = Some("Delete it".into());
    reviews.save(&answered).await.expect("save");

    let auditor = Auditor::new(&settings, auditor_script());
    let report = completed(auditor.sweep("rev-2", false).await.expect("sweep"));
    assert_eq!(report.rechecked, 1, "answered reviews are not rechecked");
    assert_eq!(report.retired, 1);
    assert!(reviews.get(&moot.id).await.expect("get").is_none());
    assert!(reviews.get(&answered.id).await.expect("get").is_some());
}

#[tokio::test]
async fn failed_investigation_leaves_revision_unrecorded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(dir.path());
    seed(&settings);
    let reasoner = Scripted::new(|req| {
        if req.context["entry"]["title"] == "Caching" {
            return Err(ReasoningError::Timeout(30));
        }
        Ok(json!({"status": "valid"}))
    });
    let auditor = Auditor::new(&settings, reasoner.clone());
    let report = completed(auditor.sweep("rev-3", false).await.expect("sweep"));
    assert_eq!(report.investigated, 3);
    assert_eq!(report.failed, 1);
    assert!(!report.state_recorded);
    // One retry after a session reset for the failing entry.
    assert_eq!(reasoner.calls_of(ReasoningKind::Investigate), 4);
    assert!(AnalysisState::load(&settings.analysis_state_path()).await.is_none());
    assert!(index_mentions(&settings, "architecture/caching.md"));
}

fn index_mentions(settings: &Settings, rel: &str) -> bool {
    read(settings, "AGENTS.md").contains(&format!("`{rel}`"))
}
