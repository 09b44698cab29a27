use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{list_json, read_record, write_record};
use crate::store::KnowledgeEntry;
use crate::util::{now_iso, now_millis, remove_if_exists, short_id};

pub const RECLAIM_NOTE: &str = "reclaimed after processing was abandoned";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntakeStatus {
    Pending,
    Processing,
}

/// A captured fact awaiting reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeItem {
    pub id: String,
    pub timestamp: String,
    pub status: IntakeStatus,
    pub category: String,
    pub topic: String,
    pub details: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
}

impl IntakeItem {
    pub fn entry(&self) -> KnowledgeEntry {
        KnowledgeEntry {
            category: self.category.clone(),
            topic: self.topic.clone(),
            details: self.details.clone(),
            files: self.files.clone(),
        }
    }

    /// True when the item has been `processing` for longer than `threshold`.
    /// An unparseable start time counts as abandoned.
    pub fn is_abandoned(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        if self.status != IntakeStatus::Processing {
            return false;
        }
        let Some(started) = self
            .processing_started_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        else {
            return true;
        };
        let age = now.signed_duration_since(started.with_timezone(&Utc));
        age.to_std().map(|age| age >= threshold).unwrap_or(false)
    }
}

/// A claimed intake item together with the file that backs it.
#[derive(Debug, Clone)]
pub struct IntakeLease {
    pub path: PathBuf,
    pub item: IntakeItem,
}

#[derive(Debug, Clone)]
pub struct IntakeQueue {
    dir: PathBuf,
    stale_after: Duration,
}

impl IntakeQueue {
    pub fn new(dir: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            dir: dir.into(),
            stale_after,
        }
    }

    /// Write a new pending item. File names sort by enqueue time.
    pub async fn enqueue(&self, entry: &KnowledgeEntry) -> Result<IntakeItem> {
        let id = short_id();
        let item = IntakeItem {
            id: id.clone(),
            timestamp: now_iso(),
            status: IntakeStatus::Pending,
            category: entry.category.clone(),
            topic: entry.topic.clone(),
            details: entry.details.clone(),
            files: entry.files.clone(),
            processing_started_at: None,
            last_error: None,
            attempts: 0,
        };
        let path = self.dir.join(format!("{:013}-{id}.json", now_millis()));
        write_record(&path, &item)
            .await
            .context("enqueue intake item")?;
        info!(target: "tome::queue", id = %item.id, topic = %item.topic, "intake item queued");
        Ok(item)
    }

    /// Every readable item in enqueue order.
    pub async fn list(&self) -> Result<Vec<IntakeLease>> {
        let mut out = Vec::new();
        for path in list_json(&self.dir).await? {
            if let Some(item) = read_record::<IntakeItem>(&path).await {
                out.push(IntakeLease { path, item });
            }
        }
        Ok(out)
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self
            .list()
            .await?
            .iter()
            .filter(|l| l.item.status == IntakeStatus::Pending)
            .count())
    }

    /// Return abandoned `processing` items to `pending`.
    pub async fn reclaim_abandoned(&self) -> Result<usize> {
        let now = Utc::now();
        let mut reclaimed = 0;
        for lease in self.list().await? {
            if !lease.item.is_abandoned(self.stale_after, now) {
                continue;
            }
            warn!(
                target: "tome::queue",
                id = %lease.item.id,
                started = lease.item.processing_started_at.as_deref().unwrap_or("?"),
                "reclaiming abandoned intake item"
            );
            self.nack(lease, RECLAIM_NOTE).await?;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    /// Claim the oldest pending item whose id is not in `skip`.
    pub async fn claim_next(&self, skip: &HashSet<String>) -> Result<Option<IntakeLease>> {
        for mut lease in self.list().await? {
            if lease.item.status != IntakeStatus::Pending || skip.contains(&lease.item.id) {
                continue;
            }
            lease.item.status = IntakeStatus::Processing;
            lease.item.processing_started_at = Some(now_iso());
            write_record(&lease.path, &lease.item)
                .await
                .context("claim intake item")?;
            return Ok(Some(lease));
        }
        Ok(None)
    }

    /// Done with the item: remove it.
    pub async fn ack(&self, lease: &IntakeLease) -> Result<()> {
        remove_if_exists(&lease.path)
            .await
            .with_context(|| format!("remove {}", lease.path.display()))?;
        Ok(())
    }

    /// Return the item to `pending` with an error note for a later drain.
    pub async fn nack(&self, lease: IntakeLease, error: &str) -> Result<()> {
        let mut item = lease.item;
        item.status = IntakeStatus::Pending;
        item.processing_started_at = None;
        item.last_error = Some(error.to_string());
        item.attempts = item.attempts.saturating_add(1);
        write_record(&lease.path, &item)
            .await
            .context("release intake item")
    }
}
