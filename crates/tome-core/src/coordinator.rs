//! Entry points called from outside: capture a fact, react to a trigger.
//!
//! Neither call waits for reconciliation or auditing; both hand the work to a
//! detached process through the seams below.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::category::normalize_category;
use crate::config::Settings;
use crate::error::CaptureError;
use crate::queue::{AnalysisState, IntakeQueue, ReviewStore};
use crate::store::KnowledgeEntry;

/// Env var that tells detached runs to log to a file.
pub const LOG_FILE_ENV: &str = "TOME_LOG_FILE";

/// Starts a drain without waiting for it.
#[async_trait]
pub trait DrainTrigger: Send + Sync {
    async fn trigger_drain(&self) -> Result<()>;
}

/// Reports the current codebase revision.
#[async_trait]
pub trait RevisionProbe: Send + Sync {
    async fn current_revision(&self) -> Result<String>;
}

/// Starts a sweep without waiting for it.
#[async_trait]
pub trait AuditSpawner: Send + Sync {
    async fn spawn_audit(&self) -> Result<()>;
}

/// `git rev-parse HEAD` in the repository root.
#[derive(Debug, Clone)]
pub struct GitRevisionProbe {
    repo_root: PathBuf,
}

impl GitRevisionProbe {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }
}

#[async_trait]
impl RevisionProbe for GitRevisionProbe {
    async fn current_revision(&self) -> Result<String> {
        let out = tokio::process::Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&self.repo_root)
            .stdin(Stdio::null())
            .output()
            .await
            .context("run git rev-parse")?;
        if !out.status.success() {
            return Err(anyhow!(
                "git rev-parse HEAD failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        let rev = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if rev.is_empty() {
            return Err(anyhow!("git rev-parse HEAD returned nothing"));
        }
        Ok(rev)
    }
}

/// Re-invokes the current executable as a detached background process.
#[derive(Debug, Clone)]
pub struct DetachedSpawner {
    exe: PathBuf,
    repo_root: PathBuf,
}

impl DetachedSpawner {
    pub fn new(exe: impl Into<PathBuf>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            repo_root: repo_root.into(),
        }
    }

    pub fn current_exe(repo_root: impl Into<PathBuf>) -> Result<Self> {
        let exe = std::env::current_exe().context("locate current executable")?;
        Ok(Self::new(exe, repo_root))
    }

    fn spawn(&self, subcommand: &str) -> Result<u32> {
        let mut cmd = std::process::Command::new(&self.exe);
        cmd.arg("--repo")
            .arg(&self.repo_root)
            .arg(subcommand)
            .current_dir(&self.repo_root)
            .env(LOG_FILE_ENV, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd
            .spawn()
            .with_context(|| format!("spawn detached `{subcommand}`"))?;
        let pid = child.id();
        info!(target: "tome::coordinator", subcommand, pid, "spawned background run");
        Ok(pid)
    }
}

#[async_trait]
impl DrainTrigger for DetachedSpawner {
    async fn trigger_drain(&self) -> Result<()> {
        self.spawn("drain").map(|_| ())
    }
}

#[async_trait]
impl AuditSpawner for DetachedSpawner {
    async fn spawn_audit(&self) -> Result<()> {
        self.spawn("audit").map(|_| ())
    }
}

/// Input of the capture interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub category: String,
    pub topic: String,
    pub details: String,
    #[serde(default)]
    pub files: Vec<String>,
}

impl CaptureRequest {
    /// Check required fields and normalize the request into an entry.
    pub fn validate(&self) -> Result<KnowledgeEntry, CaptureError> {
        let category = self.category.trim();
        let topic = self.topic.trim();
        let details = self.details.trim();
        if category.is_empty() {
            return Err(CaptureError::MissingField("category"));
        }
        if topic.is_empty() {
            return Err(CaptureError::MissingField("topic"));
        }
        if details.is_empty() {
            return Err(CaptureError::MissingField("details"));
        }
        let mut files: Vec<String> = Vec::new();
        for f in &self.files {
            let f = f.trim();
            if !f.is_empty() && !files.iter().any(|x| x == f) {
                files.push(f.to_string());
            }
        }
        Ok(KnowledgeEntry {
            category: normalize_category(category),
            topic: topic.to_string(),
            details: details.to_string(),
            files,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerReport {
    pub revision: String,
    pub audit_started: bool,
    pub drain_started: bool,
    pub pending_intake: usize,
    pub unanswered_reviews: usize,
    pub status: String,
}

pub struct Coordinator {
    settings: Settings,
    intake: IntakeQueue,
    reviews: ReviewStore,
    drain: Arc<dyn DrainTrigger>,
    probe: Arc<dyn RevisionProbe>,
    audit: Arc<dyn AuditSpawner>,
}

impl Coordinator {
    pub fn new(
        settings: &Settings,
        drain: Arc<dyn DrainTrigger>,
        probe: Arc<dyn RevisionProbe>,
        audit: Arc<dyn AuditSpawner>,
    ) -> Self {
        Self {
            intake: IntakeQueue::new(settings.intake_dir(), settings.stale_processing),
            reviews: ReviewStore::new(settings.reviews_dir()),
            settings: settings.clone(),
            drain,
            probe,
            audit,
        }
    }

    /// Git probe plus detached re-invocation of the running binary.
    pub fn detached(settings: &Settings) -> Result<Self> {
        let spawner = Arc::new(DetachedSpawner::current_exe(&settings.repo_root)?);
        Ok(Self::new(
            settings,
            spawner.clone(),
            Arc::new(GitRevisionProbe::new(&settings.repo_root)),
            spawner,
        ))
    }

    /// Queue a fact and kick a drain. Returns as soon as the item is on disk.
    pub async fn capture(&self, request: &CaptureRequest) -> Result<String> {
        let entry = request.validate()?;
        let item = self.intake.enqueue(&entry).await?;
        if let Err(err) = self.drain.trigger_drain().await {
            warn!(
                target: "tome::coordinator",
                id = %item.id,
                error = %format!("{err:#}"),
                "could not start drain; item stays queued"
            );
        }
        Ok(format!(
            "Captured \"{}\" under {}; queued as {} for reconciliation.",
            item.topic, item.category, item.id
        ))
    }

    /// Start a sweep when the revision moved, restart a drain when intake
    /// items are waiting, and report the review backlog.
    pub async fn trigger(&self) -> Result<TriggerReport> {
        let revision = self
            .probe
            .current_revision()
            .await
            .context("determine current revision")?;
        let last = AnalysisState::load(&self.settings.analysis_state_path()).await;
        let needs_audit = last.map(|s| !s.matches(&revision)).unwrap_or(true);
        let mut audit_started = false;
        if needs_audit {
            match self.audit.spawn_audit().await {
                Ok(()) => audit_started = true,
                Err(err) => {
                    warn!(target: "tome::coordinator", error = %format!("{err:#}"), "could not start audit")
                }
            }
        }

        let pending_intake = self.intake.pending_count().await?;
        let mut drain_started = false;
        if pending_intake > 0 {
            match self.drain.trigger_drain().await {
                Ok(()) => drain_started = true,
                Err(err) => {
                    warn!(target: "tome::coordinator", error = %format!("{err:#}"), "could not start drain")
                }
            }
        }

        let unanswered_reviews = self.reviews.count_unanswered().await?;
        let short: String = revision.chars().take(12).collect();
        let mut status = if audit_started {
            format!("Knowledge audit started in the background for {short}.")
        } else if needs_audit {
            format!("Knowledge audit for {short} could not be started.")
        } else {
            format!("Knowledge is up to date with {short}.")
        };
        if unanswered_reviews > 0 {
            status.push_str(&format!(
                " {unanswered_reviews} knowledge review(s) awaiting an answer; run `tome reviews list`."
            ));
        }
        info!(
            target: "tome::coordinator",
            revision = %revision,
            audit_started,
            drain_started,
            unanswered_reviews,
            "trigger handled"
        );
        Ok(TriggerReport {
            revision,
            audit_started,
            drain_started,
            pending_intake,
            unanswered_reviews,
            status,
        })
    }
}
