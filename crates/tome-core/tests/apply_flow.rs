mod common;

use std::sync::Arc;

use common::*;
use serde_json::{json, Value};
use tome_core::queue::{ReviewDraft, ReviewItem, ReviewKind, ReviewSource, ReviewStore};
use tome_core::reasoning::ReasoningKind;
use tome_core::lock::RunLock;
use tome_core::{index, Applier, KnowledgeStore, Settings};

const TWO_SECTIONS: &str =
    "## Redis TTL\n\nSessions expire after 30min.\n\n---\n\n## Cache keys\n\nKeys are prefixed with sess:.\n";

async fn seed(settings: &Settings) -> KnowledgeStore {
    write(settings, "gotchas/redis-ttl.md", TWO_SECTIONS);
    let store = KnowledgeStore::new(&settings.knowledge_dir);
    index::rebuild(&store).await.expect("index");
    store
}

async fn review(settings: &Settings, subject: &str, auto_apply: bool) -> ReviewItem {
    ReviewStore::new(settings.reviews_dir())
        .create(ReviewDraft {
            subject: subject.into(),
            kind: if auto_apply {
                ReviewKind::AutoFix
            } else {
                ReviewKind::Stale
            },
            question: format!("Is \"{subject}\" still accurate?"),
            options: vec!["Keep it".into(), "Delete the entry".into()],
            knowledge_file: "gotchas/redis-ttl.md".into(),
            agent_notes: "Issue: TTL moved to 60min".into(),
            auto_apply,
            source: ReviewSource::Audit,
        })
        .await
        .expect("review")
}

/// Deletes the section on a "Delete" answer, rewrites it for auto-apply
/// items, keeps it otherwise.
fn applier_script() -> Arc<Scripted> {
    Scripted::new(|req| {
        let review = &req.context["review"];
        let section = review["subject"].as_str().unwrap_or_default();
        let answer = review["answer"].as_str().unwrap_or_default();
        let edit = if review["auto_apply"] == Value::Bool(true) {
            json!({"op": "replace", "section": section, "content": "Sessions expire after 60min."})
        } else if answer.starts_with("Delete") {
            json!({"op": "delete", "section": section})
        } else {
            json!({"op": "keep", "section": section})
        };
        Ok(json!({"edits": [edit], "message": format!("handled {section}")}))
    })
}

#[tokio::test]
async fn answered_review_deletes_section_everywhere() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(dir.path());
    let store = seed(&settings).await;
    let item = review(&settings, "Cache keys", false).await;
    let reviews = ReviewStore::new(settings.reviews_dir());
    reviews
        .answer(&item.id, "Delete the entry")
        .await
        .expect("answer");

    let mut applier = Applier::new(&settings, applier_script());
    let report = applier.run().await.expect("apply");
    assert_eq!(report.processed, 1);
    assert!(report.done);
    assert_eq!(report.messages, vec!["handled Cache keys".to_string()]);

    let doc = read(&settings, "gotchas/redis-ttl.md");
    assert!(!doc.contains("Cache keys"));
    assert!(doc.contains("## Redis TTL"));
    assert!(!read(&settings, "INDEX.md").contains("Cache keys"));
    assert!(!read(&settings, "AGENTS.md").contains("Cache keys"));
    assert!(json_files(&settings.reviews_dir()).is_empty());
    assert!(index::verify(&store).await.expect("verify").is_consistent());
}

#[tokio::test]
async fn auto_apply_runs_without_answer_and_unanswered_waits() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(dir.path());
    seed(&settings).await;
    let fix = review(&settings, "Redis TTL", true).await;
    let waiting = review(&settings, "Cache keys", false).await;

    let reasoner = applier_script();
    let mut applier = Applier::new(&settings, reasoner.clone());
    let report = applier.run().await.expect("apply");
    assert_eq!(report.processed, 1);
    assert_eq!(reasoner.calls_of(ReasoningKind::Apply), 1);

    let doc = read(&settings, "gotchas/redis-ttl.md");
    assert!(doc.contains("Sessions expire after 60min."));
    assert!(doc.contains("## Cache keys"));
    let reviews = ReviewStore::new(settings.reviews_dir());
    assert!(reviews.get(&fix.id).await.expect("get").is_none());
    assert!(reviews.get(&waiting.id).await.expect("get").is_some());
}

#[tokio::test]
async fn deleting_the_last_section_removes_the_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(dir.path());
    write(&settings, "testing/fixtures.md", "## Fixtures\n\nUse tempdirs.\n");
    let store = KnowledgeStore::new(&settings.knowledge_dir);
    index::rebuild(&store).await.expect("index");
    let item = ReviewStore::new(settings.reviews_dir())
        .create(ReviewDraft {
            subject: "Fixtures".into(),
            kind: ReviewKind::Outdated,
            question: "Still true?".into(),
            options: Vec::new(),
            knowledge_file: "testing/fixtures.md".into(),
            agent_notes: String::new(),
            auto_apply: false,
            source: ReviewSource::Manual,
        })
        .await
        .expect("review");
    ReviewStore::new(settings.reviews_dir())
        .answer(&item.id, "Delete it")
        .await
        .expect("answer");

    let mut applier = Applier::new(&settings, applier_script());
    assert_eq!(applier.run().await.expect("apply").processed, 1);
    assert!(!settings.knowledge_dir.join("testing/fixtures.md").exists());
    assert!(!settings.knowledge_dir.join("testing").exists());
    assert!(!read(&settings, "AGENTS.md").contains("testing/fixtures.md"));
    assert!(index::verify(&store).await.expect("verify").is_consistent());
}

#[tokio::test]
async fn review_for_missing_document_is_skipped_and_kept() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(dir.path());
    let item = review(&settings, "Redis TTL", false).await;
    ReviewStore::new(settings.reviews_dir())
        .answer(&item.id, "Delete the entry")
        .await
        .expect("answer");

    let reasoner = applier_script();
    let mut applier = Applier::new(&settings, reasoner.clone());
    let report = applier.run().await.expect("apply");
    assert_eq!(report.skipped, 1);
    assert_eq!(report.processed, 0);
    assert_eq!(reasoner.calls_of(ReasoningKind::Apply), 0);
    assert!(ReviewStore::new(settings.reviews_dir())
        .get(&item.id)
        .await
        .expect("get")
        .is_some());
}

#[tokio::test]
async fn ambiguous_answer_asks_and_resumes_on_reply() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(dir.path());
    seed(&settings).await;
    let item = review(&settings, "Redis TTL", false).await;
    let reviews = ReviewStore::new(settings.reviews_dir());
    reviews.answer(&item.id, "drop it").await.expect("answer");

    let reasoner = Scripted::new(|req| {
        let reply = req.context["review"]["discussion"]
            .as_array()
            .and_then(|turns| turns.last())
            .and_then(|t| t["reply"].as_str())
            .unwrap_or_default()
            .to_string();
        if reply.is_empty() {
            return Ok(json!({
                "clarification": "Drop only the TTL section, or the whole document?"
            }));
        }
        Ok(json!({
            "edits": [{"op": "delete", "section": "Redis TTL"}],
            "message": "Dropped the TTL section"
        }))
    });
    let mut applier = Applier::new(&settings, reasoner.clone());
    let first = applier.run().await.expect("apply");
    assert!(!first.done);
    assert_eq!(first.clarifications.len(), 1);
    assert_eq!(first.clarifications[0].review_id, item.id);
    assert!(read(&settings, "gotchas/redis-ttl.md").contains("## Redis TTL"));

    let stored = reviews.get(&item.id).await.expect("get").expect("still there");
    assert_eq!(stored.discussion.len(), 1);
    assert!(stored.discussion[0].reply.is_none());

    // A plain re-run only reports the open question.
    let again = applier.run().await.expect("apply");
    assert_eq!(again.clarifications.len(), 1);
    assert_eq!(reasoner.calls_of(ReasoningKind::Apply), 1);

    let resumed = applier
        .respond(&item.id, "Only the TTL section")
        .await
        .expect("respond");
    assert!(resumed.done);
    assert_eq!(resumed.processed, 1);
    let doc = read(&settings, "gotchas/redis-ttl.md");
    assert!(!doc.contains("## Redis TTL"));
    assert!(doc.contains("## Cache keys"));
    assert!(reviews.get(&item.id).await.expect("get").is_none());
}

#[tokio::test]
async fn concurrent_apply_is_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = settings(dir.path());
    seed(&settings).await;
    let item = review(&settings, "Cache keys", false).await;
    let reviews = ReviewStore::new(settings.reviews_dir());
    reviews
        .answer(&item.id, "Delete the entry")
        .await
        .expect("answer");

    let held = RunLock::try_acquire(&settings.apply_lock_path())
        .expect("lock")
        .expect("acquired");
    let reasoner = applier_script();
    let mut applier = Applier::new(&settings, reasoner.clone());
    let report = applier.run().await.expect("apply");
    assert!(report.busy);
    assert!(!report.done);
    assert_eq!(report.processed, 0);
    let replied = applier.respond(&item.id, "Delete it").await.expect("respond");
    assert!(replied.busy);
    assert_eq!(reasoner.calls_of(ReasoningKind::Apply), 0);
    let stored = reviews.get(&item.id).await.expect("get").expect("kept");
    assert!(stored.discussion.is_empty());
    assert!(read(&settings, "gotchas/redis-ttl.md").contains("## Cache keys"));

    drop(held);
    let report = applier.run().await.expect("apply");
    assert!(!report.busy);
    assert_eq!(report.processed, 1);
}
