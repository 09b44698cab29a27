//! Per-repository exclusion for drains, sweeps and apply runs.
//!
//! Contention is never an error: `try_acquire` returns `None` and the caller
//! skips its run.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::util::now_iso;

/// An unparseable `audit.lock` younger than this is treated as held.
pub const UNREADABLE_LOCK_GRACE: Duration = Duration::from_secs(30);

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    Ok(())
}

fn open_lock_file(path: &Path) -> Result<File> {
    ensure_parent(path)?;
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))
}

/// Advisory lock on `reconcile.lock` or `apply.lock`. The OS drops it when
/// the process exits.
#[derive(Debug)]
pub struct RunLock {
    _file: File,
}

impl RunLock {
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(target: "tome::lock", path = %path.display(), "run lock acquired");
                Ok(Some(Self { _file: file }))
            }
            Err(err)
                if err.kind() == ErrorKind::WouldBlock
                    || err.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                info!(target: "tome::lock", path = %path.display(), "already running; skipping");
                Ok(None)
            }
            Err(err) => Err(err).with_context(|| format!("lock {}", path.display())),
        }
    }
}

/// Contents of `audit.lock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepHolder {
    pub pid: u32,
    pub started_at: String,
}

/// Whether `pid` names a running, non-zombie process.
pub fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid)
        .map(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}

enum Existing {
    Vacant,
    Live(SweepHolder),
    Unreadable,
    Stale(Option<SweepHolder>),
}

fn inspect(path: &Path) -> Result<Existing> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Existing::Vacant),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    match serde_json::from_slice::<SweepHolder>(&bytes) {
        Ok(holder) if process_alive(holder.pid) => Ok(Existing::Live(holder)),
        Ok(holder) => Ok(Existing::Stale(Some(holder))),
        Err(_) => {
            let age = std::fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| SystemTime::now().duration_since(t).ok())
                .unwrap_or_default();
            if age < UNREADABLE_LOCK_GRACE {
                Ok(Existing::Unreadable)
            } else {
                Ok(Existing::Stale(None))
            }
        }
    }
}

/// Pid-stamped lock file for the auditor. Removed on drop.
///
/// The file is written under a temporary name and hard-linked into place, so
/// readers never see a partial holder. Clearing a stale file happens under an
/// exclusive lock on `<path>.guard`; two contenders cannot both clear it.
#[derive(Debug)]
pub struct SweepLock {
    path: PathBuf,
    holder: SweepHolder,
}

impl SweepLock {
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let guard = open_lock_file(&guard_path(path))?;
        FileExt::lock_exclusive(&guard).context("lock sweep guard")?;

        match inspect(path)? {
            Existing::Vacant => {}
            Existing::Live(other) => {
                info!(
                    target: "tome::lock",
                    pid = other.pid,
                    started_at = %other.started_at,
                    "sweep already running; skipping"
                );
                return Ok(None);
            }
            Existing::Unreadable => {
                info!(target: "tome::lock", path = %path.display(), "sweep lock unreadable but recent; skipping");
                return Ok(None);
            }
            Existing::Stale(previous) => {
                warn!(
                    target: "tome::lock",
                    pid = previous.as_ref().map(|h| h.pid),
                    "clearing stale sweep lock"
                );
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e).with_context(|| format!("remove {}", path.display())),
                }
            }
        }

        let holder = SweepHolder {
            pid: std::process::id(),
            started_at: now_iso(),
        };
        if !publish(path, &holder)? {
            info!(target: "tome::lock", "sweep lock contended; skipping");
            return Ok(None);
        }
        debug!(target: "tome::lock", pid = holder.pid, "sweep lock acquired");
        Ok(Some(Self {
            path: path.to_path_buf(),
            holder,
        }))
    }

    pub fn holder(&self) -> &SweepHolder {
        &self.holder
    }
}

fn guard_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".guard");
    PathBuf::from(name)
}

/// Write `holder` beside `path` and link it into place. False when `path`
/// already exists.
fn publish(path: &Path, holder: &SweepHolder) -> Result<bool> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(format!(".{}.tmp", uuid::Uuid::new_v4()));
    let tmp = PathBuf::from(tmp_name);
    let data = serde_json::to_vec(holder).context("serialize sweep holder")?;
    let written = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp)
        .and_then(|mut file| {
            file.write_all(&data)?;
            file.sync_all()
        });
    if let Err(err) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(err).with_context(|| format!("write {}", tmp.display()));
    }
    let linked = std::fs::hard_link(&tmp, path);
    let _ = std::fs::remove_file(&tmp);
    match linked {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err).with_context(|| format!("link {}", path.display())),
    }
}

impl Drop for SweepLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(target: "tome::lock", error = %err, "failed to remove sweep lock");
            }
        }
    }
}
