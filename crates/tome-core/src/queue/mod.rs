//! Directory-backed work queues: one JSON record per file.
//!
//! Writers never share a file name, so enqueueing is safe while a consumer is
//! draining. Unreadable records are logged and left in place.

mod intake;
mod reviews;
mod state;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs as afs;
use tracing::warn;

use crate::util::save_bytes_atomic;

pub use intake::{IntakeItem, IntakeLease, IntakeQueue, IntakeStatus, RECLAIM_NOTE};
pub use reviews::{
    sanitize_question, DiscussionTurn, ReviewDraft, ReviewItem, ReviewKind, ReviewSource,
    ReviewStore,
};
pub use state::AnalysisState;

/// JSON files in `dir`, sorted by name. A missing directory is empty.
pub(crate) async fn list_json(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut rd = match afs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("list {}", dir.display())),
    };
    let mut out = Vec::new();
    while let Some(ent) = rd
        .next_entry()
        .await
        .with_context(|| format!("list {}", dir.display()))?
    {
        let name = ent.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !name.ends_with(".json") {
            continue;
        }
        out.push(ent.path());
    }
    out.sort();
    Ok(out)
}

/// Read one record; missing files are `None`, malformed ones are logged and `None`.
pub(crate) async fn read_record<T: DeserializeOwned>(path: &Path) -> Option<T> {
    match afs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(target: "tome::queue", path = %path.display(), error = %err, "skipping malformed record");
                None
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            warn!(target: "tome::queue", path = %path.display(), error = %err, "unable to read record");
            None
        }
    }
}

pub(crate) async fn write_record<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    save_bytes_atomic(path, &data)
        .await
        .with_context(|| format!("write {}", path.display()))
}
