use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::util::{env_bool, env_string, env_u64};

pub const DEFAULT_STATE_DIR: &str = ".tome";
pub const DEFAULT_KNOWLEDGE_SUBDIR: &str = "knowledge";
pub const DEFAULT_STALE_PROCESSING_SECS: u64 = 300;
pub const DEFAULT_AUDIT_CONCURRENCY: usize = 5;
pub const MAX_AUDIT_CONCURRENCY: usize = 16;
pub const DEFAULT_REASONING_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
pub struct PathsConfig {
    /// Directory holding queues, reviews, locks, and logs (relative to the repository root).
    #[serde(default)]
    pub state_dir: Option<String>,
    /// Directory holding the knowledge documents (relative to the repository root).
    #[serde(default)]
    pub knowledge_dir: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
pub struct IntakeConfig {
    /// Seconds after which a `processing` intake item is presumed abandoned.
    #[serde(default)]
    pub stale_processing_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
pub struct AuditConfig {
    /// Maximum number of concurrent entry investigations.
    #[serde(default)]
    #[schemars(range(min = 1, max = 16))]
    pub concurrency: Option<usize>,
    /// Sweep even when the recorded revision matches the current one.
    #[serde(default)]
    pub force: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ReasoningConfig {
    /// Executable of the external agent used as the reasoning function.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    /// Flag used to resume a previous session, e.g. `--resume`.
    #[serde(default)]
    pub resume_flag: Option<String>,
    /// Flag used to pass the allowed tool list, e.g. `--allowedTools`.
    #[serde(default)]
    pub tools_flag: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(Config);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

/// Returns the JSON schema describing the configuration structure.
///
/// # Panics
///
/// Panics if schema generation fails; this indicates a programming error.
pub fn config_schema_json() -> serde_json::Value {
    let schema = schemars::schema_for!(Config);
    serde_json::to_value(&schema).expect("schema json")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    parse_config(&content).with_context(|| format!("invalid config {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<Config> {
    let raw: toml::Value = toml::from_str(content)?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        return Err(anyhow::anyhow!(validation_errors.join(", ")));
    }
    let cfg: Config = toml::from_str(content)?;
    Ok(cfg)
}

/// Resolved settings for the external agent command.
#[derive(Debug, Clone)]
pub struct ReasoningSettings {
    pub command: String,
    pub args: Vec<String>,
    pub resume_flag: Option<String>,
    pub tools_flag: Option<String>,
    pub timeout: Duration,
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec![
                "-p".to_string(),
                "--output-format".to_string(),
                "json".to_string(),
            ],
            resume_flag: Some("--resume".to_string()),
            tools_flag: Some("--allowedTools".to_string()),
            timeout: Duration::from_secs(DEFAULT_REASONING_TIMEOUT_SECS),
        }
    }
}

/// Effective settings for one repository: config file values overlaid with env vars.
#[derive(Debug, Clone)]
pub struct Settings {
    pub repo_root: PathBuf,
    pub state_dir: PathBuf,
    pub knowledge_dir: PathBuf,
    pub stale_processing: Duration,
    pub audit_concurrency: usize,
    pub audit_force: bool,
    pub reasoning: ReasoningSettings,
}

impl Settings {
    /// Defaults for `repo_root`, ignoring config files and environment.
    pub fn for_root(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        let state_dir = repo_root.join(DEFAULT_STATE_DIR);
        Self {
            knowledge_dir: state_dir.join(DEFAULT_KNOWLEDGE_SUBDIR),
            state_dir,
            repo_root,
            stale_processing: Duration::from_secs(DEFAULT_STALE_PROCESSING_SECS),
            audit_concurrency: DEFAULT_AUDIT_CONCURRENCY,
            audit_force: false,
            reasoning: ReasoningSettings::default(),
        }
    }

    /// Resolve settings for `repo_root`: `TOME_CONFIG` or `<repo>/.tome/config.toml`,
    /// then environment overlays. A missing config file means defaults.
    pub fn resolve(repo_root: impl Into<PathBuf>) -> Result<Self> {
        let repo_root = repo_root.into();
        let cfg_path = env_string("TOME_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| repo_root.join(DEFAULT_STATE_DIR).join("config.toml"));
        let cfg = if cfg_path.exists() {
            load_config(&cfg_path)?
        } else {
            Config::default()
        };
        Ok(Self::from_config(repo_root, &cfg))
    }

    pub fn from_config(repo_root: impl Into<PathBuf>, cfg: &Config) -> Self {
        let mut settings = Self::for_root(repo_root);
        let root = settings.repo_root.clone();
        let anchor = |raw: String| -> PathBuf {
            let p = PathBuf::from(raw);
            if p.is_absolute() {
                p
            } else {
                root.join(p)
            }
        };

        let state_dir = env_string("TOME_STATE_DIR")
            .or_else(|| cfg.paths.state_dir.clone())
            .map(&anchor);
        let knowledge_dir = env_string("TOME_KNOWLEDGE_DIR")
            .or_else(|| cfg.paths.knowledge_dir.clone())
            .map(&anchor);
        if let Some(dir) = state_dir {
            settings.knowledge_dir = dir.join(DEFAULT_KNOWLEDGE_SUBDIR);
            settings.state_dir = dir;
        }
        if let Some(dir) = knowledge_dir {
            settings.knowledge_dir = dir;
        }

        if let Some(secs) = env_u64("TOME_STALE_PROCESSING_SECS").or(cfg.intake.stale_processing_secs)
        {
            settings.stale_processing = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("TOME_AUDIT_CONCURRENCY")
            .map(|n| n as usize)
            .or(cfg.audit.concurrency)
        {
            settings.audit_concurrency = n.clamp(1, MAX_AUDIT_CONCURRENCY);
        }
        settings.audit_force = env_bool("TOME_AUDIT_FORCE")
            .or(cfg.audit.force)
            .unwrap_or(false);

        let r = &cfg.reasoning;
        if let Some(cmd) = env_string("TOME_REASONING_CMD").or_else(|| r.command.clone()) {
            settings.reasoning.command = cmd;
        }
        if let Some(args) = r.args.clone() {
            settings.reasoning.args = args;
        }
        if let Some(flag) = r.resume_flag.clone() {
            settings.reasoning.resume_flag = Some(flag).filter(|f| !f.trim().is_empty());
        }
        if let Some(flag) = r.tools_flag.clone() {
            settings.reasoning.tools_flag = Some(flag).filter(|f| !f.trim().is_empty());
        }
        if let Some(secs) = env_u64("TOME_REASONING_TIMEOUT_SECS").or(r.timeout_secs) {
            settings.reasoning.timeout = Duration::from_secs(secs.max(1));
        }
        settings
    }

    pub fn intake_dir(&self) -> PathBuf {
        self.state_dir.join("intake")
    }

    pub fn reviews_dir(&self) -> PathBuf {
        self.state_dir.join("reviews")
    }

    pub fn analysis_state_path(&self) -> PathBuf {
        self.state_dir.join("analysis.json")
    }

    pub fn reconcile_lock_path(&self) -> PathBuf {
        self.state_dir.join("reconcile.lock")
    }

    pub fn audit_lock_path(&self) -> PathBuf {
        self.state_dir.join("audit.lock")
    }

    pub fn apply_lock_path(&self) -> PathBuf {
        self.state_dir.join("apply.lock")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Effective paths as JSON, for `tome paths`.
    pub fn describe(&self) -> serde_json::Value {
        let norm = |p: &Path| p.to_string_lossy().replace('\\', "/");
        json!({
            "repo_root": norm(&self.repo_root),
            "state_dir": norm(&self.state_dir),
            "knowledge_dir": norm(&self.knowledge_dir),
            "intake_dir": norm(&self.intake_dir()),
            "reviews_dir": norm(&self.reviews_dir()),
            "analysis_state": norm(&self.analysis_state_path()),
            "logs_dir": norm(&self.logs_dir()),
            "stale_processing_secs": self.stale_processing.as_secs(),
            "audit_concurrency": self.audit_concurrency,
            "reasoning_command": self.reasoning.command,
        })
    }
}
