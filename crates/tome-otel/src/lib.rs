//! Tracing setup shared by every `tome` entry point.
//!
//! Interactive runs log to stderr. Detached background runs (spawned with
//! `TOME_LOG_FILE=1`) have no terminal, so they also write a rolling log under
//! the state directory.

use std::path::Path;

use once_cell::sync::OnceCell;
use tome_core::coordinator::LOG_FILE_ENV;
use tome_core::util::{env_bool, env_string};
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

const FILE_PREFIX: &str = "tome";

fn filter() -> EnvFilter {
    EnvFilter::try_from_env("TOME_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn file_logging_requested() -> bool {
    env_bool(LOG_FILE_ENV).unwrap_or(false)
}

fn rolling_writer(dir: &Path, rotation: &str) -> RollingFileAppender {
    match rotation.trim().to_lowercase().as_str() {
        "hourly" => tracing_appender::rolling::hourly(dir, FILE_PREFIX),
        "never" => tracing_appender::rolling::never(dir, format!("{FILE_PREFIX}.log")),
        _ => tracing_appender::rolling::daily(dir, FILE_PREFIX),
    }
}

/// Install the global subscriber. `log_dir` is used only when file logging
/// was requested through the environment. Safe to call more than once.
pub fn init(log_dir: Option<&Path>) {
    let console = fmt::layer().with_writer(std::io::stderr).with_filter(filter());
    let registry = tracing_subscriber::registry().with(console);

    let Some(dir) = log_dir.filter(|_| file_logging_requested()) else {
        let _ = registry.try_init();
        return;
    };
    if let Err(err) = std::fs::create_dir_all(dir) {
        let _ = registry.try_init();
        tracing::warn!(directory = %dir.display(), %err, "failed to create log directory");
        return;
    }
    let rotation = env_string("TOME_LOG_ROTATION").unwrap_or_else(|| "daily".into());
    let (writer, guard) = tracing_appender::non_blocking(rolling_writer(dir, &rotation));
    let _ = FILE_GUARD.set(guard);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter());
    let _ = registry.with(file_layer).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_rotation_falls_back_to_daily() {
        let dir = tempfile::tempdir().expect("tempdir");
        for rotation in ["daily", "HOURLY", "never", "weekly", ""] {
            let _ = rolling_writer(dir.path(), rotation);
        }
        assert!(dir.path().join("tome.log").exists());
    }

    #[test]
    #[serial_test::serial]
    fn file_logging_flag_accepts_any_boolean_spelling() {
        let saved = std::env::var(LOG_FILE_ENV).ok();
        for (raw, expected) in [("1", true), (" TRUE ", true), ("on", true), ("off", false), ("maybe", false)] {
            std::env::set_var(LOG_FILE_ENV, raw);
            assert_eq!(file_logging_requested(), expected, "{raw:?}");
        }
        std::env::remove_var(LOG_FILE_ENV);
        assert!(!file_logging_requested());
        if let Some(value) = saved {
            std::env::set_var(LOG_FILE_ENV, value);
        }
    }
}
